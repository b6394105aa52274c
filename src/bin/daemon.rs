//! medialib daemon for periodic metadata updates.
//!
//! Registers the albums listed in the config, then runs the update process
//! every `process.interval_secs` until Ctrl-C or SIGTERM. A run in progress
//! stops dispatching new files as soon as the signal arrives.
//!
//! ## Usage
//!
//! ```bash
//! medialib-daemon              # Run in foreground
//! medialib-daemon --once       # Run one update and exit
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use medialib::config::Config;
use medialib::db::Database;
use medialib::error::PipelineError;
use medialib::logging;
use medialib::process::{ProcessOptions, ShutdownSignal, StatsStore, UpdateMetadataProcess};

struct DaemonArgs {
    /// Override of `process.interval_secs`
    interval: Option<u64>,
    once: bool,
    config_path: Option<PathBuf>,
}

fn parse_args() -> DaemonArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = DaemonArgs {
        interval: None,
        once: false,
        config_path: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--once" | "-1" => {
                parsed.once = true;
            }
            "--interval" | "-i" => {
                if i + 1 < args.len() {
                    if let Ok(interval) = args[i + 1].parse() {
                        parsed.interval = Some(interval);
                    }
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    parsed
}

fn print_help() {
    println!(
        r#"medialib-daemon - periodic metadata updates for medialib

USAGE:
    medialib-daemon [OPTIONS]

OPTIONS:
    --once, -1          Run one update and exit
    --interval, -i N    Seconds between runs (default: process.interval_secs)
    --config, -c PATH   Path to config file
    --help, -h          Show this help message

ENVIRONMENT:
    MEDIALIB_CONFIG     Path to config file (overrides default location)
    MEDIALIB_LOG        Log level (trace, debug, info, warn, error)
"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    logging::init(Some(Config::config_dir().join("logs")))?;
    info!("medialib daemon starting...");

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let db = Database::open(&config.db_path)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;
    db.initialize().context("Failed to initialize database")?;
    let db = Arc::new(db);
    info!("Database opened at {:?}", config.db_path);

    register_configured_albums(&db, &config);

    let shutdown = ShutdownSignal::new();
    shutdown.listen();

    let process = UpdateMetadataProcess::from_config(
        Arc::clone(&db),
        &config,
        StatsStore::new(),
        shutdown.clone(),
    );
    let opts = ProcessOptions::from_config(&config.process);
    let interval = Duration::from_secs(args.interval.unwrap_or(config.process.interval_secs).max(1));

    if args.once {
        info!("Running in single-shot mode");
        run_once(&process, &opts).await;
    } else {
        info!("Running in daemon mode, every {} seconds", interval.as_secs());
        while !shutdown.is_triggered() {
            run_once(&process, &opts).await;
            wait_for_next_run(&shutdown, interval).await;
        }
    }

    info!("medialib daemon stopped");
    Ok(())
}

fn register_configured_albums(db: &Database, config: &Config) {
    for path in &config.albums {
        match db.register_album(path, None) {
            Ok(album) => info!("Album {} at {}", album.name, album.base_path.display()),
            Err(e) => warn!("Cannot register album {}: {}", path.display(), e),
        }
    }
}

async fn run_once(process: &UpdateMetadataProcess, opts: &ProcessOptions) {
    match process.run(opts).await {
        Ok(stats) => match serde_json::to_string(&stats) {
            Ok(json) => info!("Run stats: {}", json),
            Err(_) => info!("Run stats: {:?}", stats),
        },
        Err(PipelineError::AlreadyRunning) => {
            info!("Another update run is in progress, skipping this cycle");
        }
        Err(e) => error!("Update run failed: {}", e),
    }
}

/// Sleep for `interval`, waking early on shutdown.
async fn wait_for_next_run(shutdown: &ShutdownSignal, interval: Duration) {
    let step = Duration::from_secs(1);
    let mut waited = Duration::ZERO;
    while waited < interval && !shutdown.is_triggered() {
        tokio::time::sleep(step).await;
        waited += step;
    }
}
