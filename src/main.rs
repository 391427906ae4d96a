//! tunnelsub - expose a local proxy through a tunnel and publish a subscription
//!
//! Starts the proxy and tunnel binaries, discovers the public tunnel
//! hostname, generates client links and serves them as a subscription.

mod config;
mod runner;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::{ConfigLayer, Settings};
use runner::Runner;

/// tunnelsub - Tunnel a local proxy and publish its subscription
#[derive(Parser, Debug)]
#[command(name = "tunnelsub")]
#[command(about = "Tunnel a local proxy and publish its subscription over HTTP")]
#[command(version)]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// YAML config file. Flags and environment variables override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: ConfigLayer,
}

impl Cli {
    fn settings(self) -> Result<Settings> {
        let file = match &self.config {
            Some(path) => ConfigLayer::load(path)?,
            None => ConfigLayer::default(),
        };
        Settings::resolve(self.overrides, file)
    }
}

/// Setup logging with the specified log level
fn setup_logging(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings().context("Invalid configuration")?;

    setup_logging(&settings.log_level);
    info!("tunnelsub {} starting...", env!("GIT_TAG"));

    let runner = Runner::new(settings).context("Failed to initialize launcher")?;

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let run_task = tokio::spawn(runner.run());

    tokio::select! {
        _ = &mut ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        result = run_task => {
            match result {
                Ok(Ok(())) => info!("Launcher stopped"),
                Ok(Err(e)) => {
                    error!("Launcher failed: {:#}", e);
                    return Err(e);
                }
                Err(e) => {
                    error!("Launcher task panicked: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}
