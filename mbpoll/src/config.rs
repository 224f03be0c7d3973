//! Configuration for the polling engine and the `mbpoll` binary.

use mbpoll_common::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::item::PollItem;
use crate::transport::ConnectionKind;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] mbpoll_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MbpollConfig {
    /// Engine and link settings
    pub modbus: EngineConfig,

    /// Requests issued on every pass, in order
    #[serde(default)]
    pub poll_list: Vec<PollItem>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings owned by the engine. Replacing them requires re-initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Connection type, e.g. "tcp", "rtu", "tcprtubuffered"
    pub connection: String,

    /// Hostname or serial device path
    pub host: String,

    /// Transport-specific options
    #[serde(default)]
    pub options: ConnectOptions,

    /// Delay between state machine ticks in milliseconds
    #[serde(default = "default_scan_interval", alias = "scanInterval")]
    pub scan_interval_ms: u64,

    /// Period of the monitor loop in milliseconds
    #[serde(default = "default_monitor_interval", alias = "monitorInterval")]
    pub monitor_interval_ms: u64,

    /// Default Modbus unit/slave ID (1-247)
    #[serde(default = "default_device_id")]
    pub device_id: u8,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_scan_interval() -> u64 {
    1000
}

fn default_monitor_interval() -> u64 {
    5000
}

fn default_device_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1500
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub connection: String,
    pub host: String,
    #[serde(default)]
    pub options: ConnectOptions,
}

/// Transport-specific connection options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// TCP port (default: 502)
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    /// Baud rate (default: 9600)
    #[serde(default = "default_baud_rate", alias = "baudRate")]
    pub baud_rate: u32,
    /// Data bits (default: 8)
    #[serde(default = "default_data_bits", alias = "dataBits")]
    pub data_bits: u8,
    /// Parity: "none", "even", or "odd" (default: "none")
    #[serde(default = "default_parity")]
    pub parity: String,
    /// Stop bits: 1 or 2 (default: 1)
    #[serde(default = "default_stop_bits", alias = "stopBits")]
    pub stop_bits: u8,
}

fn default_modbus_port() -> u16 {
    502
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            port: default_modbus_port(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: default_parity(),
            stop_bits: default_stop_bits(),
        }
    }
}

impl EngineConfig {
    /// Modbus TCP settings with default timing.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            connection: "tcp".to_string(),
            host: host.into(),
            options: ConnectOptions {
                port,
                ..ConnectOptions::default()
            },
            scan_interval_ms: default_scan_interval(),
            monitor_interval_ms: default_monitor_interval(),
            device_id: default_device_id(),
            timeout_ms: default_timeout_ms(),
        }
    }

    pub fn with_intervals(mut self, scan_interval_ms: u64, monitor_interval_ms: u64) -> Self {
        self.scan_interval_ms = scan_interval_ms;
        self.monitor_interval_ms = monitor_interval_ms;
        self
    }

    /// The connection part of the settings.
    pub fn link(&self) -> ConnectionConfig {
        ConnectionConfig {
            connection: self.connection.clone(),
            host: self.host.clone(),
            options: self.options.clone(),
        }
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate the engine settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.parse::<ConnectionKind>().is_err() {
            return Err(ConfigError::Validation(format!(
                "unknown connection type '{}'",
                self.connection
            )));
        }

        if self.host.is_empty() {
            return Err(ConfigError::Validation("host cannot be empty".to_string()));
        }

        if self.scan_interval_ms == 0 || self.monitor_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "scan and monitor intervals must be non-zero".to_string(),
            ));
        }

        if !(1..=247).contains(&self.device_id) {
            return Err(ConfigError::Validation(
                "device_id must be 1-247".to_string(),
            ));
        }

        match self.options.parity.to_lowercase().as_str() {
            "none" | "even" | "odd" => Ok(()),
            _ => Err(ConfigError::Validation(format!(
                "invalid parity '{}' (use none, even, or odd)",
                self.options.parity
            ))),
        }
    }
}

impl MbpollConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: MbpollConfig = mbpoll_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: MbpollConfig = mbpoll_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.modbus.validate()?;

        if self.poll_list.is_empty() {
            return Err(ConfigError::Validation(
                "poll_list must contain at least one item".to_string(),
            ));
        }

        for (index, item) in self.poll_list.iter().enumerate() {
            if item.fc.is_none() {
                return Err(ConfigError::Validation(format!(
                    "poll_list[{}]: function code is not defined",
                    index
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_config() {
        let json = r#"{
            modbus: {
                connection: "tcp",
                host: "192.168.1.10",
            },
            poll_list: [
                { id: 1, fc: "FC3", address: 0, length: 10 }
            ]
        }"#;

        let config = MbpollConfig::parse(json).unwrap();
        assert_eq!(config.modbus.options.port, 502); // default
        assert_eq!(config.modbus.scan_interval(), Duration::from_millis(1000));
        assert_eq!(config.modbus.monitor_interval(), Duration::from_millis(5000));
        assert_eq!(config.modbus.device_id, 1);
        assert_eq!(config.modbus.timeout_ms, 1500);
        assert_eq!(config.poll_list.len(), 1);
    }

    #[test]
    fn test_camel_case_intervals() {
        let json = r#"{
            modbus: {
                connection: "tcp",
                host: "localhost",
                options: { port: 5020 },
                scanInterval: 250,
                monitorInterval: 2000,
            },
            poll_list: [ { fc: 1, address: 0, length: 1 } ]
        }"#;

        let config = MbpollConfig::parse(json).unwrap();
        assert_eq!(config.modbus.scan_interval_ms, 250);
        assert_eq!(config.modbus.monitor_interval_ms, 2000);
        assert_eq!(config.modbus.options.port, 5020);
    }

    #[test]
    fn test_parse_rtu_config() {
        let json = r#"{
            modbus: {
                connection: "rtu",
                host: "/dev/ttyUSB0",
                options: { baud_rate: 19200, parity: "even" },
                device_id: 5,
            },
            poll_list: [ { fc: "FC4", address: 0, length: 4 } ]
        }"#;

        let config = MbpollConfig::parse(json).unwrap();
        assert_eq!(config.modbus.device_id, 5);
        assert_eq!(config.modbus.options.baud_rate, 19200);
        assert_eq!(config.modbus.options.parity, "even");
        assert_eq!(config.modbus.link().host, "/dev/ttyUSB0");
    }

    #[test]
    fn test_validate_unknown_connection() {
        let mut config = EngineConfig::tcp("localhost", 502);
        config.connection = "zigbee".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_empty_poll_list() {
        let json = r#"{ modbus: { connection: "tcp", host: "localhost" } }"#;
        assert!(matches!(
            MbpollConfig::parse(json),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_missing_function_code() {
        let json = r#"{
            modbus: { connection: "tcp", host: "localhost" },
            poll_list: [ { address: 0, length: 1 } ]
        }"#;
        let err = MbpollConfig::parse(json).unwrap_err();
        assert!(err.to_string().contains("poll_list[0]"));
    }

    #[test]
    fn test_validate_zero_interval() {
        let config = EngineConfig::tcp("localhost", 502).with_intervals(0, 1000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = MbpollConfig::parse(include_str!("../mbpoll.example.json5")).unwrap();
        assert_eq!(config.poll_list.len(), 4);
        assert_eq!(config.poll_list[3].fc.as_deref(), Some("FC16"));
    }

    #[test]
    fn test_parse_error_surfaces_as_load_error() {
        assert!(matches!(
            MbpollConfig::parse("{ modbus: "),
            Err(ConfigError::Load(_))
        ));
    }
}
