//! Background Runner: invokes the Broker for one session outside the
//! Renderer's hot path (§4.4, §9 "two binaries"). Spawned detached by the
//! entry wrapper script with its stdio redirected to `runner.log`; never
//! writes to the terminal itself.

use anyhow::{Context, Result};
use statline_core::broker::Broker;
use statline_core::config::Config;
use statline_core::registry::Registry;
use statline_core::session;
use statline_core::store::Store;
use std::io::Read;
use std::sync::mpsc;
use std::time::Duration;

/// Hard ceiling on top of the Broker's own `overall_deadline`: if a gather
/// is still running this long after the Runner started, the Runner exits
/// without waiting for it (the gather thread is left to finish and persist
/// whatever it completes).
const RUNNER_CEILING: Duration = Duration::from_secs(30);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut raw = String::new();
    std::io::stdin().read_to_string(&mut raw).context("Failed to read stdin")?;
    let Some(session) = session::parse_stdin_payload(&raw) else {
        tracing::warn!("runner: malformed invocation payload on stdin, exiting");
        return Ok(());
    };

    let config = Config::load().unwrap_or_default();
    let registry = Registry::with_overrides(config.thresholds.into_registry_overrides());
    let store = Store::new(Store::default_base());
    let overall_deadline = config.broker.overall_deadline();

    let sources_config = config.sources;
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let broker = Broker::with_sources(store, registry, overall_deadline, sources_config);
        let result = broker.gather(&session);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(RUNNER_CEILING) {
        Ok(Ok(health)) => {
            tracing::info!(session_id = %health.session_id, sources = health.sources.len(), "runner: gather complete");
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "runner: gather failed");
        }
        Err(_) => {
            tracing::warn!(ceiling_secs = RUNNER_CEILING.as_secs(), "runner: gather exceeded ceiling, exiting without it");
        }
    }
    Ok(())
}
