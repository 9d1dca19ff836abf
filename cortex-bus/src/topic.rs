//! Topic primitives with fixed backpressure policies.

use cortex_core::BoundedRing;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};

/// Bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    /// The receiving side of a blocking topic is gone.
    #[error("topic closed: {0}")]
    Closed(&'static str),
    /// The safety topic overflowed. Fatal by contract.
    #[error("safety topic overflow: {queued} alerts queued, capacity {capacity}")]
    SafetyOverflow {
        /// Alerts currently queued.
        queued: usize,
        /// Configured capacity.
        capacity: usize,
    },
}

/// Bounded blocking topic: `publish` awaits when the channel is full, so
/// producers slow down instead of dropping.
#[derive(Debug)]
pub struct BlockingTopic<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<Option<mpsc::Receiver<T>>>,
    name: &'static str,
    capacity: usize,
}

impl<T: Send + 'static> BlockingTopic<T> {
    /// Create a topic with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self::named(capacity, "topic")
    }

    /// Create a named topic (name appears in errors).
    pub fn named(capacity: usize, name: &'static str) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            name,
            capacity: capacity.max(1),
        }
    }

    /// Publish, applying backpressure when full.
    pub async fn publish(&self, value: T) -> Result<(), BusError> {
        self.tx
            .send(value)
            .await
            .map_err(|_| BusError::Closed(self.name))
    }

    /// A cloneable sender for producers.
    pub fn publisher(&self) -> mpsc::Sender<T> {
        self.tx.clone()
    }

    /// Take the single consumer end. Panics if taken twice.
    pub fn take_receiver(&self) -> mpsc::Receiver<T> {
        self.rx
            .lock()
            .expect("topic receiver lock poisoned")
            .take()
            .expect("topic receiver already taken")
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Lossy topic: publishing never blocks; on overflow the oldest buffered
/// element is dropped and counted. Consumers drain in batches.
#[derive(Debug)]
pub struct LossyTopic<T> {
    inner: Arc<LossyInner<T>>,
}

#[derive(Debug)]
struct LossyInner<T> {
    buf: Mutex<BoundedRing<T>>,
    notify: Notify,
}

impl<T> Clone for LossyTopic<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> LossyTopic<T> {
    /// Create a topic with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(LossyInner {
                buf: Mutex::new(BoundedRing::new(capacity)),
                notify: Notify::new(),
            }),
        }
    }

    /// Publish. Never blocks; evicts the oldest buffered element when full.
    pub fn publish(&self, value: T) {
        {
            let mut buf = self.inner.buf.lock().expect("lossy topic lock poisoned");
            buf.push(value);
        }
        self.inner.notify.notify_waiters();
    }

    /// Drain everything currently buffered, oldest first.
    pub fn drain(&self) -> Vec<T> {
        let mut buf = self.inner.buf.lock().expect("lossy topic lock poisoned");
        let mut out = Vec::with_capacity(buf.len());
        while let Some(front) = buf.pop_oldest() {
            out.push(front);
        }
        out
    }

    /// Await until at least one element is buffered, then drain.
    pub async fn recv_batch(&self) -> Vec<T> {
        loop {
            let batch = self.drain();
            if !batch.is_empty() {
                return batch;
            }
            let notified = self.inner.notify.notified();
            // Re-check: a publish may have landed between drain and register.
            if !self.is_empty() {
                continue;
            }
            notified.await;
        }
    }

    /// Number of buffered elements.
    pub fn len(&self) -> usize {
        self.inner.buf.lock().expect("lossy topic lock poisoned").len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total elements dropped to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.inner
            .buf
            .lock()
            .expect("lossy topic lock poisoned")
            .evicted()
    }
}

/// Reliable bounded topic: `try_publish` fails when full. The safety topic
/// uses this; overflow there is fatal by contract.
#[derive(Debug)]
pub struct ReliableTopic<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<Option<mpsc::Receiver<T>>>,
    capacity: usize,
}

impl<T: Send + 'static> ReliableTopic<T> {
    /// Create a topic with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            capacity: capacity.max(1),
        }
    }

    /// Publish without waiting. Overflow returns [`BusError::SafetyOverflow`].
    pub fn try_publish(&self, value: T) -> Result<(), BusError> {
        self.tx.try_send(value).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BusError::SafetyOverflow {
                queued: self.capacity,
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => BusError::Closed("safety"),
        })
    }

    /// A cloneable sender for producers.
    pub fn publisher(&self) -> mpsc::Sender<T> {
        self.tx.clone()
    }

    /// Take the single consumer end. Panics if taken twice.
    pub fn take_receiver(&self) -> mpsc::Receiver<T> {
        self.rx
            .lock()
            .expect("topic receiver lock poisoned")
            .take()
            .expect("topic receiver already taken")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn blocking_topic_delivers_in_order() {
        let topic: BlockingTopic<u32> = BlockingTopic::named(4, "tasks");
        let mut rx = topic.take_receiver();
        topic.publish(1).await.unwrap();
        topic.publish(2).await.unwrap();
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[test]
    fn lossy_topic_drops_oldest_and_counts() {
        let topic: LossyTopic<u32> = LossyTopic::new(3);
        for i in 0..7 {
            topic.publish(i);
        }
        assert_eq!(topic.dropped(), 4);
        assert_eq!(topic.drain(), vec![4, 5, 6]);
        assert!(topic.is_empty());
    }

    #[tokio::test]
    async fn lossy_recv_batch_wakes_on_publish() {
        let topic: LossyTopic<u32> = LossyTopic::new(8);
        let reader = topic.clone();
        let handle = tokio::spawn(async move { reader.recv_batch().await });
        tokio::task::yield_now().await;
        topic.publish(42);
        assert_eq!(handle.await.unwrap(), vec![42]);
    }

    #[test]
    fn reliable_topic_overflow_is_an_error() {
        let topic: ReliableTopic<u32> = ReliableTopic::new(2);
        topic.try_publish(1).unwrap();
        topic.try_publish(2).unwrap();
        let err = topic.try_publish(3).unwrap_err();
        assert!(matches!(err, BusError::SafetyOverflow { .. }));
    }
}
