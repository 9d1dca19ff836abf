//! Concrete reduction transports for the daemon.
//!
//! The core is transport-agnostic; this is the edge where a concrete
//! choice is made. `JsonLineTransport` speaks newline-delimited JSON over
//! TCP: one request line out, one correlated response line back.
//! `UnreachableTransport` stands in when no authority address is
//! configured; the pipeline then runs fully fail-closed.

use async_trait::async_trait;
use cortex_reduction::{Envelope, ReductionResponse, ReductionTransport, TransportError};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// Newline-delimited JSON over TCP. One exchange per call; the connection
/// is re-established per request so a dead authority surfaces as
/// `Unreachable` rather than a wedged stream.
pub struct JsonLineTransport {
    addr: String,
    // One exchange at a time per connection attempt.
    lock: Mutex<()>,
}

impl JsonLineTransport {
    /// Transport to `host:port`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            lock: Mutex::new(()),
        }
    }

    async fn exchange(&self, line: String) -> Result<String, TransportError> {
        let _guard = self.lock.lock().await;
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| TransportError::Unreachable(format!("{}: {e}", self.addr)))?;
        let (read_half, mut write_half) = stream.into_split();
        write_half
            .write_all(line.as_bytes())
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        write_half
            .write_all(b"\n")
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let mut reader = BufReader::new(read_half);
        let mut response = String::new();
        let n = reader
            .read_line(&mut response)
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        if n == 0 {
            return Err(TransportError::Protocol("authority closed the stream".into()));
        }
        Ok(response)
    }
}

#[async_trait]
impl ReductionTransport for JsonLineTransport {
    async fn send(&self, envelope: &Envelope) -> Result<ReductionResponse, TransportError> {
        let line = serde_json::to_string(envelope)
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        let response = self.exchange(line).await?;
        debug!(bytes = response.len(), "reduction response received");
        serde_json::from_str(&response).map_err(|e| TransportError::Protocol(e.to_string()))
    }

    async fn ping(&self) -> Result<(), TransportError> {
        let line = serde_json::to_string(&json!({"ping": true}))
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.exchange(line).await.map(|_| ())
    }
}

/// Stands in when no authority is configured. Every call fails, so every
/// reduction synthesizes fail-closed provenance.
pub struct UnreachableTransport;

#[async_trait]
impl ReductionTransport for UnreachableTransport {
    async fn send(&self, _envelope: &Envelope) -> Result<ReductionResponse, TransportError> {
        Err(TransportError::Unreachable("no authority configured".into()))
    }

    async fn ping(&self) -> Result<(), TransportError> {
        Err(TransportError::Unreachable("no authority configured".into()))
    }
}
