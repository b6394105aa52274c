use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use medialib::config::Config;
use medialib::db::Database;
use medialib::logging;
use medialib::process::{ProcessOptions, ShutdownSignal, StatsStore, UpdateMetadataProcess};
use medialib::scanner::ThumbnailStore;

enum Command {
    AddAlbum { path: PathBuf, name: Option<String> },
    Albums,
    Update {
        threads: Option<usize>,
        timeout: Option<u64>,
        album: Option<String>,
    },
    Reset { album: String },
    Thumbnail { file: String },
}

struct Args {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut positional = Vec::new();
    let mut name = None;
    let mut threads = None;
    let mut timeout = None;
    let mut album = None;

    let mut i = 1;
    while i < args.len() {
        let value = |i: usize| -> String {
            match args.get(i + 1) {
                Some(v) => v.clone(),
                None => {
                    eprintln!("Error: {} requires a value", args[i]);
                    std::process::exit(1);
                }
            }
        };
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("medialib {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                config_path = Some(PathBuf::from(value(i)));
                i += 1;
            }
            "--name" => {
                name = Some(value(i));
                i += 1;
            }
            "--threads" | "-t" => {
                threads = Some(parse_number(&args[i], &value(i)));
                i += 1;
            }
            "--timeout" => {
                timeout = Some(parse_number(&args[i], &value(i)));
                i += 1;
            }
            "--album" => {
                album = Some(value(i));
                i += 1;
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    let command = match (positional.next().as_deref(), positional.next()) {
        (Some("add-album"), Some(path)) => Command::AddAlbum {
            path: PathBuf::from(path),
            name,
        },
        (Some("albums"), None) => Command::Albums,
        (Some("update"), None) => Command::Update {
            threads,
            timeout,
            album,
        },
        (Some("reset"), Some(album)) => Command::Reset { album },
        (Some("thumbnail"), Some(file)) => Command::Thumbnail { file },
        _ => {
            print_help();
            std::process::exit(1);
        }
    };

    Args {
        config_path,
        command,
    }
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> T {
    match value.parse() {
        Ok(n) => n,
        Err(_) => {
            eprintln!("Error: {} expects a number, got {:?}", flag, value);
            std::process::exit(1);
        }
    }
}

fn print_help() {
    println!(
        r#"medialib - media library metadata and thumbnail pipeline

USAGE:
    medialib [OPTIONS] <COMMAND>

COMMANDS:
    add-album PATH [--name NAME]    Register a directory tree as an album
    albums                          List registered albums
    update [--threads N] [--timeout SECS] [--album ID]
                                    Sync albums and extract metadata, print run stats as JSON
    reset ALBUM_ID                  Forget extracted metadata so the next update redoes it
    thumbnail FILE_ID               Print the smallest thumbnail as base64

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    MEDIALIB_CONFIG     Path to config file (overrides default location)
    MEDIALIB_LOG        Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/medialib/config.toml

See also: medialib-daemon --help"#
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    // Stderr only: stdout carries command output
    let _ = logging::init_stderr();

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let db = Database::open(&config.db_path)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;
    db.initialize().context("Failed to initialize database")?;
    let db = Arc::new(db);

    match args.command {
        Command::AddAlbum { path, name } => {
            let path = std::fs::canonicalize(&path)
                .with_context(|| format!("Cannot resolve {}", path.display()))?;
            let album = db.register_album(&path, name.as_deref())?;
            println!("{}\t{}\t{}", album.id, album.name, album.base_path.display());
        }
        Command::Albums => {
            for album in db.list_albums()? {
                println!(
                    "{}\t{}\t{}\t{}",
                    album.id,
                    album.status.as_str(),
                    album.name,
                    album.base_path.display()
                );
            }
        }
        Command::Update {
            threads,
            timeout,
            album,
        } => {
            let mut opts = ProcessOptions::from_config(&config.process);
            if let Some(threads) = threads {
                opts.threads = threads;
            }
            if let Some(secs) = timeout {
                opts.timeout = Duration::from_secs(secs);
            }
            opts.album_id = album;

            let shutdown = ShutdownSignal::new();
            shutdown.listen();
            let process =
                UpdateMetadataProcess::from_config(Arc::clone(&db), &config, StatsStore::new(), shutdown);
            let stats = process.run(&opts).await.context("Update run failed")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Reset { album } => {
            if db.get_album(&album)?.is_none() {
                bail!("No album with id {}", album);
            }
            let reset = db.reset_album_metadata(&album)?;
            println!("Reset {} file(s)", reset);
        }
        Command::Thumbnail { file } => {
            let store = ThumbnailStore::new(&config.thumbnails);
            match store.read_base64_smallest(&file)? {
                Some(encoded) => println!("{}", encoded),
                None => bail!("No thumbnail for file {}", file),
            }
        }
    }

    Ok(())
}
