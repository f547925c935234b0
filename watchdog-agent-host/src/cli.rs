use clap::Parser;
use std::path::PathBuf;
use watchdog_core::{WatchdogConfig, WatchdogIdentity};

/// ATX Watchdog agent - sends keepalives over serial
#[derive(Parser, Debug)]
#[command(name = "watchdog-agent-host", version, about)]
pub struct Args {
    /// Serial port (default: COM4 on Windows, /dev/ttyUSB0 elsewhere)
    #[arg(short, long, env = "WATCHDOG_SERIAL_PORT")]
    pub port: Option<String>,

    /// Baud rate (default: 115200)
    #[arg(short, long, env = "WATCHDOG_BAUD_RATE")]
    pub baud: Option<u32>,

    /// Seconds between keepalives (default: 30)
    #[arg(short, long, env = "WATCHDOG_INTERVAL_SECS")]
    pub interval: Option<u64>,

    /// Milliseconds to wait for ACK (default: 2000)
    #[arg(long)]
    pub probe_timeout_ms: Option<u64>,

    /// Watchdog identity, only used to label logs
    #[arg(short = 'c', long, env = "WATCHDOG_IDENTITY")]
    pub identity: Option<WatchdogIdentity>,

    /// Config file (default: <config dir>/atx-watchdog/config.toml)
    #[arg(long, env = "WATCHDOG_CONFIG")]
    pub config: Option<PathBuf>,

    /// List serial ports and exit
    #[arg(long)]
    pub list_ports: bool,
}

impl Args {
    /// Command line wins over the config file
    pub fn apply(&self, config: &mut WatchdogConfig) {
        if let Some(port) = &self.port {
            config.serial.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.serial.baud_rate = baud;
        }
        if let Some(interval) = self.interval {
            config.serial.interval_secs = interval;
        }
        if let Some(timeout) = self.probe_timeout_ms {
            config.serial.probe_timeout_ms = timeout;
        }
        if let Some(identity) = &self.identity {
            config.identity = identity.clone();
        }
    }
}
