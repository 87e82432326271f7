// src/main.rs

//! Command-line entry point: keeps a client pool, monitors or pings a configured database.

use anyhow::{Result, anyhow};
use rediscope::app::{self, Mode};
use rediscope::config::Config;
use std::env;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*};

const USAGE: &str = "Usage: rediscope [--config <path>] [--monitor <database-id> [--log-file] | --ping <database-id>]";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|arg| arg == "--version") {
        println!("rediscope version {}", env!("REDISCOPE_BUILD_VERSION"));
        return Ok(());
    }
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("{USAGE}");
        return Ok(());
    }

    let config_path = flag_value(&args, "--config")?.unwrap_or("rediscope.toml");
    let mode = parse_mode(&args)?;

    let config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e:#}");
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level.
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(e) = app::run(config, mode).await {
        error!("rediscope failed: {e:#}");
        return Err(e);
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Result<Option<&'a str>> {
    match args.iter().position(|arg| arg == flag) {
        Some(i) => args
            .get(i + 1)
            .map(|value| Some(value.as_str()))
            .ok_or_else(|| anyhow!("{flag} flag requires a value\n{USAGE}")),
        None => Ok(None),
    }
}

fn parse_mode(args: &[String]) -> Result<Mode> {
    let monitor = flag_value(args, "--monitor")?;
    let ping = flag_value(args, "--ping")?;
    match (monitor, ping) {
        (Some(_), Some(_)) => Err(anyhow!("--monitor and --ping are exclusive\n{USAGE}")),
        (Some(database_id), None) => Ok(Mode::Monitor {
            database_id: database_id.to_string(),
            log_to_file: args.iter().any(|arg| arg == "--log-file"),
        }),
        (None, Some(database_id)) => Ok(Mode::Ping {
            database_id: database_id.to_string(),
        }),
        (None, None) => Ok(Mode::Serve),
    }
}
