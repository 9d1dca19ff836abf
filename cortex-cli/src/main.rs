//! cortexd: the cognitive control core as a process.
//!
//! Exit codes: 0 normal shutdown; 64 configuration error; 65 eligibility
//! invariant violated; 69 semantic authority permanently unreachable under
//! `--policy strict`.

mod modules;
mod transport;

use anyhow::Context;
use clap::Parser;
use cortex_arbiter::Arbiter;
use cortex_bus::CortexBus;
use cortex_core::{CancelToken, CortexConfig};
use cortex_perf::LatencyProfile;
use cortex_reduction::{
    assert_invariant, eligibility, ClientState, ReductionProvenance, ReductionTransport,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_OK: u8 = 0;
const EXIT_CONFIG: u8 = 64;
const EXIT_INVARIANT: u8 = 65;
const EXIT_AUTHORITY: u8 = 69;

/// Signal-driven cognitive control core.
#[derive(Debug, Parser)]
#[command(name = "cortexd", version, about)]
struct Args {
    /// Address of the semantic authority (host:port). Without it the
    /// daemon runs fully fail-closed.
    #[arg(long, env = "STERLING_ADDR")]
    sterling_addr: Option<String>,

    /// Path of the persisted latency profile.
    #[arg(long, env = "LATENCY_PROFILE_PATH", default_value = "latency-profile.json")]
    latency_profile: PathBuf,

    /// `strict` exits 69 when the authority never becomes reachable.
    #[arg(long, env = "STERLING_POLICY", default_value = "lenient")]
    policy: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = match CortexConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration rejected");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if gate_self_check().is_err() {
        error!("eligibility gate self-check failed at boot");
        return ExitCode::from(EXIT_INVARIANT);
    }

    match run(args, config) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

/// Boot-time exercise of the fail-closed gate across all quadrants.
fn gate_self_check() -> Result<(), ()> {
    for (processed, executable) in [(true, true), (true, false), (false, false), (false, true)] {
        let provenance = ReductionProvenance {
            sterling_processed: processed,
            envelope_id: "selfcheck00000000".to_string(),
            reducer_result: processed.then(|| serde_json::json!({})),
            is_executable: executable,
            block_reason: None,
            duration_ms: 0,
            sterling_error: None,
        };
        let decision = eligibility(Some(&provenance));
        if assert_invariant(Some(&provenance), &decision).is_err() {
            return Err(());
        }
    }
    let decision = eligibility(None);
    assert_invariant(None, &decision).map_err(|_| ())
}

#[tokio::main]
async fn run(args: Args, config: CortexConfig) -> anyhow::Result<u8> {
    let bus = CortexBus::new(&config);
    let transport: Arc<dyn ReductionTransport> = match &args.sterling_addr {
        Some(addr) => {
            info!(%addr, "using semantic authority");
            Arc::new(transport::JsonLineTransport::new(addr.clone()))
        }
        None => {
            warn!("no semantic authority configured; running fail-closed");
            Arc::new(transport::UnreachableTransport)
        }
    };

    let mut arbiter = Arbiter::new(config, &bus, transport);
    arbiter.register_module(Arc::new(modules::ReflexGuard))?;
    arbiter.register_module(Arc::new(modules::ReactiveResponder))?;

    match LatencyProfile::load(&args.latency_profile) {
        Ok(Some(profile)) => {
            info!(path = %args.latency_profile.display(), "latency profile loaded");
            arbiter.load_latency_profile(&profile);
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "ignoring unreadable latency profile"),
    }

    let cancel = CancelToken::new();

    let heartbeat = {
        let client = arbiter.client();
        let token = cancel.clone();
        tokio::spawn(async move { client.run_heartbeat(token).await })
    };

    // Drain outward topics so bounded channels never back up the loop.
    let mut tasks_rx = bus.tasks.take_receiver();
    let task_drain = tokio::spawn(async move {
        while let Some(task) = tasks_rx.recv().await {
            info!(
                task = %task.task_id,
                envelope = %task.source_envelope_id,
                module = %task.source_module,
                "task emitted"
            );
        }
    });

    let shutdown = {
        let token = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                token.cancel();
            }
        })
    };

    let run_result = arbiter.run(cancel.clone()).await;
    cancel.cancel();
    let _ = heartbeat.await;
    shutdown.abort();
    task_drain.abort();

    let profile = LatencyProfile::capture(arbiter.monitor());
    if !profile.modules.is_empty() {
        profile
            .save(&args.latency_profile)
            .with_context(|| format!("writing {}", args.latency_profile.display()))?;
    }

    run_result.context("arbiter loop failed")?;

    if arbiter.invariant_violations() > 0 {
        error!(
            count = arbiter.invariant_violations(),
            "invariant violations observed this run"
        );
        return Ok(EXIT_INVARIANT);
    }

    let client = arbiter.client();
    if args.policy == "strict"
        && client.state() == ClientState::Open
        && client.stats().successes == 0
    {
        error!("semantic authority never reachable under strict policy");
        return Ok(EXIT_AUTHORITY);
    }

    Ok(EXIT_OK)
}
