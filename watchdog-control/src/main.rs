//! Watchdog Control - one-shot MQTT commands for the ATX watchdog
//!
//! `power` and `reset` publish a command envelope and print whatever the
//! watchdog reports during the grace window. `listen` prints status messages
//! until Ctrl+C.

mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use watchdog_core::{
    CommandDispatch, DispatchOutcome, MqttRelay, PublishOutcome, RelayCommand, StatusMessage, WatchdogConfig,
};

use crate::cli::Args;

fn print_status(message: &StatusMessage) {
    println!(
        "\n[{}] {}",
        message.received_at.with_timezone(&chrono::Local).format("%H:%M:%S"),
        message.topic
    );
    println!("{}", message.payload.render());
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupted, closing session...");
                cancel.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let mut config = WatchdogConfig::load(args.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    args.apply(&mut config);

    let command = RelayCommand::from(args.command);
    if command == RelayCommand::Listen && args.duration.is_some() {
        warn!("--duration has no effect with listen");
    }
    let duration = if command == RelayCommand::Listen { None } else { args.duration };

    // Validate before touching the network
    let dispatch = CommandDispatch::new(config.identity.clone(), command, duration, config.broker.grace())
        .context("Invalid command")?;

    let relay = MqttRelay::connect(
        &config.broker.host,
        config.broker.port,
        config.broker.credentials().as_ref(),
        &config.broker.session_options(),
    )
    .await
    .context("Failed to connect to MQTT broker")?;

    if let Some(envelope) = dispatch.envelope() {
        info!(
            "Sending {} to {} (duration: {})",
            envelope.cmd(),
            config.identity.command_topic(),
            envelope
                .duration_ms()
                .map(|ms| format!("{}ms", ms))
                .unwrap_or_else(|| "firmware default".to_string())
        );
    } else {
        println!("Listening on {} - press Ctrl+C to stop", config.identity.status_topic());
    }

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match dispatch.run(&relay, &cancel, print_status).await? {
        DispatchOutcome::Published {
            outcome: PublishOutcome::Rejected { reason },
            ..
        } => bail!("Command {} was not published: {}", command, reason),
        DispatchOutcome::Published { statuses, .. } => {
            info!("Command {} sent", command);
            if statuses == 0 {
                info!("No status received from {} yet", config.identity);
            }
        }
        DispatchOutcome::Listened { statuses } => info!("Received {} status message(s)", statuses),
        DispatchOutcome::Cancelled => bail!("Interrupted before {} was sent", command),
    }
    Ok(())
}
