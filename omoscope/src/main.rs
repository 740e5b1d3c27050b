//! omoscope - status dashboard for OpenCode / oh-my-opencode sessions
//!
//! Reads OpenCode session storage (SQLite database or JSON file tree) and
//! prints what the active session for a project is doing, its background
//! tasks, recent tool activity and token usage. Nothing is ever written to
//! session storage.
//!
//! Uses XDG Base Directory specification for file locations:
//! - OpenCode data: $XDG_DATA_HOME/opencode (~/.local/share/opencode)
//! - Logs: $XDG_STATE_HOME/omoscope/omoscope.log (~/.local/state/omoscope/omoscope.log)
//! - Config: $XDG_CONFIG_HOME/omoscope/config.toml (~/.config/omoscope/config.toml)

mod render;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use omoscope_core::{Config, Dashboard};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "omoscope")]
#[command(about = "Show what an OpenCode agent session is doing")]
#[command(version)]
struct Args {
    /// Project directory (defaults to the current directory)
    #[arg(short, long)]
    project: Option<PathBuf>,

    /// Override the JSON storage root
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// Override the SQLite database path
    #[arg(long)]
    sqlite: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Watch mode - re-render until interrupted
    #[arg(short, long)]
    watch: bool,

    /// Poll interval in milliseconds (only with --watch)
    #[arg(long, default_value = "2000")]
    poll: u64,

    /// List redacted tool calls of the active session instead of the snapshot
    #[arg(long)]
    tool_calls: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(root) = &args.storage_root {
        config.storage.storage_root = Some(root.clone());
    }
    if let Some(sqlite) = &args.sqlite {
        config.storage.sqlite_path = Some(sqlite.clone());
    }

    let _log_guard =
        omoscope_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("omoscope starting");

    let project = match &args.project {
        Some(project) => project.clone(),
        None => std::env::current_dir().context("failed to read current directory")?,
    };
    let dashboard = Dashboard::from_config(&config.storage, config.dashboard.clone());
    tracing::info!(
        project = %project.display(),
        backend = %dashboard.primary().kind(),
        "Dashboard ready"
    );

    if args.watch {
        watch(&args, &dashboard, &project)
    } else {
        render_once(&args, &dashboard, &project)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn render_once(args: &Args, dashboard: &Dashboard, project: &Path) -> Result<()> {
    let output = if args.tool_calls {
        let payload = dashboard
            .tool_calls(project)
            .context("failed to list tool calls")?;
        match args.format {
            OutputFormat::Json => serde_json::to_string_pretty(&payload)?,
            OutputFormat::Text => render::tool_calls(payload.as_ref(), now_ms()),
        }
    } else {
        let snapshot = dashboard
            .snapshot(project, now_ms())
            .context("failed to build snapshot")?;
        match args.format {
            OutputFormat::Json => serde_json::to_string_pretty(&snapshot)?,
            OutputFormat::Text => render::snapshot(&snapshot),
        }
    };
    println!("{}", output);
    Ok(())
}

fn watch(args: &Args, dashboard: &Dashboard, project: &Path) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    let poll_duration = Duration::from_millis(args.poll.max(100));
    let mut iteration = 0u64;

    while running.load(Ordering::SeqCst) {
        iteration += 1;

        // A failed tick is reported and retried on the next one.
        if let Err(e) = render_once(args, dashboard, project) {
            tracing::warn!(iteration, error = %e, "Render failed");
            eprintln!(
                "Error: {:#} (log: {})",
                e,
                omoscope_core::logging::log_file_path().display()
            );
        }
        if args.format == OutputFormat::Text {
            println!();
        }

        // Sleep in small increments to respond to Ctrl+C quickly
        let mut remaining = poll_duration;
        while running.load(Ordering::SeqCst) && !remaining.is_zero() {
            let step = remaining.min(Duration::from_millis(100));
            thread::sleep(step);
            remaining -= step;
        }
    }

    tracing::info!(iterations = iteration, "Watch mode stopped");
    Ok(())
}
