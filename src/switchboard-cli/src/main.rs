//! Switchboard CLI - replays recorded gateway chat streams.
//!
//! Commands:
//! - `replay` - feed a JSON Lines recording through the live pipeline and
//!   print what the viewer would end up seeing
//! - `config` - print the effective live configuration as TOML

mod replay;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use switchboard_live::{LiveConfig, SessionKey};

/// Switchboard live pipeline tools
#[derive(Debug, Parser)]
#[command(name = "switchboard")]
#[command(about = "Replay gateway chat streams through the Switchboard live pipeline")]
#[command(version)]
struct Cli {
    /// Log level
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay a recorded event stream
    Replay(ReplayArgs),

    /// Print the effective configuration
    Config(ConfigArgs),
}

#[derive(Debug, Parser)]
struct ReplayArgs {
    /// JSON Lines recording to replay
    file: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Session the viewer is looking at
    #[arg(short, long, default_value = "main")]
    session: String,

    /// Replay on wall-clock time instead of virtual time
    #[arg(long)]
    realtime: bool,
}

#[derive(Debug, Parser)]
struct ConfigArgs {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
            .init();
    }
}

/// Config file if given, then environment overrides on top.
fn load_config(path: Option<&PathBuf>) -> Result<LiveConfig> {
    let mut config = match path {
        Some(path) => LiveConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => LiveConfig::default(),
    };
    config
        .apply_env()
        .context("Failed to apply environment overrides")?;
    Ok(config)
}

async fn run_replay(args: ReplayArgs) -> Result<()> {
    let config = load_config(args.config.as_ref())?;
    let steps = replay::load_steps(&args.file)?;
    let session = SessionKey::new(args.session);
    info!(
        file = %args.file.display(),
        steps = steps.len(),
        realtime = args.realtime,
        "Starting replay"
    );

    let report = if args.realtime {
        replay::replay_realtime(config, session, steps).await
    } else {
        replay::replay_virtual(config, session, steps)
    };
    print!("{}", report.render());
    Ok(())
}

fn run_config(args: ConfigArgs) -> Result<()> {
    let config = load_config(args.config.as_ref())?;
    print!("{}", config.to_toml());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs);

    let result = match cli.command {
        Command::Replay(args) => run_replay(args).await,
        Command::Config(args) => run_config(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_replay_args() {
        let cli = Cli::try_parse_from([
            "switchboard",
            "replay",
            "stream.jsonl",
            "--session",
            "ops",
            "--realtime",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        match cli.command {
            Command::Replay(args) => {
                assert_eq!(args.file, PathBuf::from("stream.jsonl"));
                assert_eq!(args.session, "ops");
                assert!(args.realtime);
                assert!(args.config.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.toml");
        std::fs::write(&path, "throttle_interval_ms = 80\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.throttle_interval_ms, 80);
        assert_eq!(config.reveal_rate, LiveConfig::default().reveal_rate);
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Some(&PathBuf::from("/nonexistent/live.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to load config"));
    }
}
