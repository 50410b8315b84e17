//! `statline`: CLI surface (C6, §6).
//!
//! Two fast paths and a handful of maintenance commands. `render` is what
//! the host CLI actually shells out to on every prompt; everything else is
//! for a human running `statline` directly at a terminal.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;

use statline_core::broker::Broker;
use statline_core::config::Config;
use statline_core::hooks;
use statline_core::registry::Registry;
use statline_core::renderer;
use statline_core::session;
use statline_core::store::Store;

#[derive(Parser)]
#[command(name = "statline", version, about = "Cache-coherent status line for interactive AI coding CLIs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reads the invocation payload from stdin and prints one status line.
    /// This is the Display Renderer (C5) entry point — the only command a
    /// host CLI's `statusLine` hook should ever invoke.
    Render {
        /// Terminal column width. Falls back to `STATLINE_TERM_WIDTH` if
        /// unset, and to single-line mode if neither is present.
        #[arg(long)]
        width: Option<u16>,
    },
    /// Runs a full gather (C4) for the session described on stdin and
    /// updates its cached health record. This is what the background
    /// Runner invokes; running it by hand forces an out-of-band refresh.
    Refresh,
    /// Registers (or removes) `statline render` as the host CLI's
    /// `statusLine` command.
    InstallHook {
        #[arg(long)]
        uninstall: bool,
        #[arg(long)]
        status: bool,
    },
    /// Reports on the health of the cache/coordination state without
    /// changing anything: config path, cache directory, stale intents.
    Doctor,
    /// Deletes all persisted cache/coordination state under the data
    /// directory. Does not touch the host's `settings.json` hook entry.
    Reset,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Render { width } => render(width),
        Commands::Refresh => refresh(),
        Commands::InstallHook { uninstall, status } => hooks::run_install_hook(uninstall, status),
        Commands::Doctor => doctor(),
        Commands::Reset => reset(),
    }
}

fn read_stdin() -> Result<String> {
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf).context("Failed to read stdin")?;
    Ok(buf)
}

fn render(width_arg: Option<u16>) -> Result<()> {
    let raw = read_stdin().unwrap_or_default();
    let config = Config::load().unwrap_or_default();
    let registry = Registry::with_overrides(config.thresholds.into_registry_overrides());
    let store = Store::new(Store::default_base());

    let width = width_arg
        .map(|w| w.to_string())
        .or_else(|| std::env::var("STATLINE_TERM_WIDTH").ok())
        .unwrap_or_default();
    let width_opt = if width.is_empty() { None } else { Some(width.as_str()) };

    let line = renderer::render_entrypoint(&raw, width_opt, &store, &registry);
    print!("{line}");
    use std::io::Write;
    std::io::stdout().flush().ok();
    Ok(())
}

fn refresh() -> Result<()> {
    let raw = read_stdin().unwrap_or_default();
    let Some(session) = session::parse_stdin_payload(&raw) else {
        anyhow::bail!("malformed invocation payload on stdin");
    };

    let config = Config::load().unwrap_or_default();
    let registry = Registry::with_overrides(config.thresholds.into_registry_overrides());
    let store = Store::new(Store::default_base());
    let overall_deadline = config.broker.overall_deadline();
    let broker = Broker::with_sources(store, registry, overall_deadline, config.sources);
    broker.gather(&session)?;
    Ok(())
}

fn doctor() -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let store = Store::new(Store::default_base());
    println!("config: overall_deadline_ms={}", config.broker.overall_deadline_ms);
    println!("config: inactive_window_secs={}", config.session.inactive_window_secs);
    println!("data dir: {}", store.health_dir().display());
    println!("intents dir: {}", store.intents_dir().display());
    let global = store.read_global();
    println!("global cache entries: {}", global.entries.len());
    Ok(())
}

fn reset() -> Result<()> {
    let store = Store::new(Store::default_base());
    let dir = store.health_dir();
    if dir.exists() {
        std::fs::remove_dir_all(&dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
        println!("removed {}", dir.display());
    } else {
        println!("nothing to remove at {}", dir.display());
    }
    Ok(())
}
