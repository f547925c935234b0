use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use watchdog_core::{RelayCommand, WatchdogConfig, WatchdogIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CommandArg {
    /// Pulse the power button
    Power,
    /// Pulse the reset button
    Reset,
    /// Print status messages until Ctrl+C
    Listen,
}

impl From<CommandArg> for RelayCommand {
    fn from(arg: CommandArg) -> Self {
        match arg {
            CommandArg::Power => RelayCommand::Power,
            CommandArg::Reset => RelayCommand::Reset,
            CommandArg::Listen => RelayCommand::Listen,
        }
    }
}

/// Control the ATX watchdog through MQTT
#[derive(Parser, Debug)]
#[command(name = "watchdog-control", version, about)]
pub struct Args {
    /// Command to send
    #[arg(value_enum)]
    pub command: CommandArg,

    /// MQTT broker host (default: localhost)
    #[arg(short = 'H', long, env = "WATCHDOG_MQTT_HOST")]
    pub host: Option<String>,

    /// MQTT broker port (default: 1883)
    #[arg(short, long, env = "WATCHDOG_MQTT_PORT")]
    pub port: Option<u16>,

    /// MQTT username
    #[arg(short, long, env = "WATCHDOG_MQTT_USER")]
    pub user: Option<String>,

    /// MQTT password
    #[arg(short = 'P', long, env = "WATCHDOG_MQTT_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Watchdog identity (default: watchdog-001)
    #[arg(short = 'c', long = "client-id", env = "WATCHDOG_IDENTITY")]
    pub identity: Option<WatchdogIdentity>,

    /// Button press duration in milliseconds (default: firmware setting)
    #[arg(short, long, allow_negative_numbers = true)]
    pub duration: Option<i64>,

    /// Milliseconds to wait for a status reply after publishing (default: 2000)
    #[arg(long)]
    pub grace_ms: Option<u64>,

    /// MQTT client id of this tool (default: watchdog-control)
    #[arg(long)]
    pub mqtt_client_id: Option<String>,

    /// Config file (default: <config dir>/atx-watchdog/config.toml)
    #[arg(long, env = "WATCHDOG_CONFIG")]
    pub config: Option<PathBuf>,
}

impl Args {
    /// Command line wins over the config file
    pub fn apply(&self, config: &mut WatchdogConfig) {
        if let Some(host) = &self.host {
            config.broker.host = host.clone();
        }
        if let Some(port) = self.port {
            config.broker.port = port;
        }
        if let Some(user) = &self.user {
            config.broker.username = Some(user.clone());
        }
        if let Some(password) = &self.password {
            config.broker.password = Some(password.clone());
        }
        if let Some(identity) = &self.identity {
            config.identity = identity.clone();
        }
        if let Some(grace) = self.grace_ms {
            config.broker.grace_ms = grace;
        }
        if let Some(client_id) = &self.mqtt_client_id {
            config.broker.client_id = client_id.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_with_duration() {
        let args = Args::parse_from(["watchdog-control", "power", "-d", "300", "-c", "rack-7"]);
        assert_eq!(RelayCommand::from(args.command), RelayCommand::Power);
        assert_eq!(args.duration, Some(300));

        let mut config = WatchdogConfig::default();
        args.apply(&mut config);
        assert_eq!(config.identity.command_topic(), "/watchdog/rack-7/cmd");
        assert_eq!(config.broker.host, "localhost");
    }

    #[test]
    fn test_negative_duration_reaches_validation() {
        let args = Args::parse_from(["watchdog-control", "reset", "-d", "-5"]);
        assert_eq!(args.duration, Some(-5));
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Args::try_parse_from(["watchdog-control", "shutdown"]).is_err());
    }

    #[test]
    fn test_broker_flags() {
        let args = Args::parse_from([
            "watchdog-control",
            "listen",
            "-H",
            "mqtt.lan",
            "-p",
            "8883",
            "-u",
            "ops",
            "-P",
            "secret",
        ]);
        let mut config = WatchdogConfig::default();
        args.apply(&mut config);
        assert_eq!(config.broker.host, "mqtt.lan");
        assert_eq!(config.broker.port, 8883);
        let credentials = config.broker.credentials().unwrap();
        assert_eq!(credentials.username, "ops");
        assert_eq!(credentials.password.as_deref(), Some("secret"));
    }
}
