//! Watchdog Agent Host - keeps the ATX watchdog fed over USB serial
//!
//! Sends `KEEPALIVE` at a fixed interval and expects `ACK` back. Missed
//! replies are logged and counted; the firmware decides what a long silence
//! means. Runs until Ctrl+C, then releases the serial port.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use watchdog_core::error::PortCandidate;
use watchdog_core::{
    available_endpoints, KeepaliveReport, KeepaliveSupervisor, LinkUnavailable, SerialLinkChannel, SerialTransport,
    WatchdogConfig,
};

use crate::cli::Args;

/// Main agent state
struct Agent {
    config: WatchdogConfig,
    supervisor: KeepaliveSupervisor<SerialTransport>,
}

impl Agent {
    /// Open the serial link described by `config`
    fn open(config: WatchdogConfig) -> Result<Self, OpenError> {
        let state = config.serial.keepalive_state().map_err(|e| OpenError::Config(e.into()))?;
        info!("Connecting to {} @ {} baud...", config.serial.port, config.serial.baud_rate);
        let transport =
            SerialTransport::open(&config.serial.port, config.serial.baud_rate).map_err(OpenError::Link)?;

        let supervisor = KeepaliveSupervisor::new(
            SerialLinkChannel::new(transport),
            config.serial.timer(),
            state,
            config.serial.probe_timeout(),
        );
        Ok(Agent { config, supervisor })
    }

    /// Start agent main loop
    async fn run(self, cancel: CancellationToken) -> Result<KeepaliveReport, LinkUnavailable> {
        info!(
            "Watchdog {} - keepalive every {}s, press Ctrl+C to stop",
            self.config.identity, self.config.serial.interval_secs
        );
        self.supervisor.run(cancel).await
    }
}

enum OpenError {
    Config(anyhow::Error),
    Link(LinkUnavailable),
}

fn format_endpoints(endpoints: &[PortCandidate]) -> String {
    if endpoints.is_empty() {
        return "  (no serial ports found)".to_string();
    }
    endpoints
        .iter()
        .map(|endpoint| format!("  - {}", endpoint))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Used for both a port that never opened and one lost mid-session
fn link_loss_report(e: &LinkUnavailable) -> String {
    format!("{}\n\nAvailable ports:\n{}", e, format_endpoints(&e.alternatives))
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Stopping watchdog agent...");
                cancel.cancel();
            }
            // Keep feeding the watchdog; the process can still be killed
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

    if args.list_ports {
        println!("Available ports:\n{}", format_endpoints(&available_endpoints()));
        return Ok(());
    }

    let mut config = WatchdogConfig::load(args.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    args.apply(&mut config);

    info!("ATX Watchdog agent host starting...");
    let agent = match Agent::open(config) {
        Ok(agent) => agent,
        Err(OpenError::Config(e)) => return Err(e.context("Invalid keepalive settings")),
        Err(OpenError::Link(e)) => {
            println!("{}", link_loss_report(&e));
            return Err(e).context("Failed to open serial port");
        }
    };

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let report = match agent.run(cancel).await {
        Ok(report) => report,
        Err(e) => {
            println!("{}", link_loss_report(&e));
            return Err(e).context("Keepalive link lost");
        }
    };
    info!(
        "{} keepalives sent, {} acknowledged, {} timed out, {} malformed, longest miss streak {}",
        report.probes, report.acks, report.timeouts, report.malformed, report.longest_streak
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_loss_lists_alternatives() {
        let e = LinkUnavailable::new("/dev/ttyUSB0", "device disconnected").with_alternatives(vec![
            PortCandidate {
                device: "/dev/ttyACM0".to_string(),
                description: "CP2102 USB to UART".to_string(),
            },
            PortCandidate {
                device: "/dev/ttyS0".to_string(),
                description: "n/a".to_string(),
            },
        ]);
        let report = link_loss_report(&e);
        assert!(report.starts_with("serial link /dev/ttyUSB0 unavailable: device disconnected"));
        assert!(report.contains("  - /dev/ttyACM0: CP2102 USB to UART\n  - /dev/ttyS0: n/a"));
    }

    #[test]
    fn test_no_alternatives() {
        let report = link_loss_report(&LinkUnavailable::new("COM4", "access denied"));
        assert!(report.ends_with("(no serial ports found)"));
    }
}
