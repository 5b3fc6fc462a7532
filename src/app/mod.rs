//! `shopra-log-relay`: pipe stdin lines through a `LoggerService`.

pub mod tracing;

use crate::config::LoggerConfig;
use crate::domain::LogLevel;
use crate::logger::LoggerService;
use crate::shutdown::ShutdownCoordinator;
use anyhow::Context;
use clap::Parser;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use ::tracing::{info, warn};

#[derive(Parser, Debug, Clone)]
#[command(author, version, long_about = None)]
#[command(about = "Relay stdin lines to the configured log sinks")]
pub struct Cli {
    /// Level every relayed line is logged at
    #[arg(long, env = "RELAY_LEVEL", default_value = "info")]
    pub level: LogLevel,

    /// Sub-component name appended to the service name
    #[arg(long, env = "RELAY_CONTEXT")]
    pub context: Option<String>,

    /// How long to wait for the broker queue to drain at EOF, in seconds
    #[arg(long, env = "RELAY_DRAIN_TIMEOUT_SECS", default_value = "10")]
    pub drain_timeout_secs: u64,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing::init_tracing();

    let config = LoggerConfig::from_env().context("Failed to load logger configuration")?;
    info!(
        service = %config.service_name,
        console = config.log_to_console,
        file = config.log_to_file,
        broker = config.log_to_kafka,
        "Loaded settings"
    );

    let root = LoggerService::new(config).context("Failed to build logger")?;
    let coordinator = ShutdownCoordinator::global();
    root.register_shutdown(coordinator);
    coordinator.listen_for_signals();

    let derived;
    let logger = match cli.context.as_deref() {
        Some(name) => {
            derived = root.with_context(name);
            &derived
        }
        None => &root,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut relayed: u64 = 0;
    loop {
        tokio::select! {
            () = coordinator.cancelled() => {
                info!("Shutdown requested, stopping relay");
                break;
            }
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    logger.log(cli.level, line, None);
                    relayed += 1;
                }
                None => break,
            },
        }
    }

    let drain = Duration::from_secs(cli.drain_timeout_secs);
    if tokio::time::timeout(drain, root.flush()).await.is_err() {
        warn!("Broker queue not drained after {drain:?}, abandoning remaining entries");
    }
    coordinator.shutdown().await;

    info!(relayed, dropped = root.broker_dropped(), "Relay finished");
    Ok(())
}
