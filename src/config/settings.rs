//! Application settings

use crate::core::codec::TextEncoding;
use crate::core::session::PortConfig;
use crate::core::transport::Parity;
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default connection parameters
    pub connection: ConnectionDefaults,
    /// Outbound defaults
    pub send: SendDefaults,
    /// Render inbound bytes as hex by default
    pub hex_display: bool,
}

/// Default line parameters applied when the user does not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDefaults {
    /// Last used port name, if any
    pub port: Option<String>,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1-2)
    pub stop_bits: u8,
    /// Parity
    pub parity: Parity,
    /// Text encoding
    pub encoding: TextEncoding,
}

impl Default for ConnectionDefaults {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            encoding: TextEncoding::Gbk,
        }
    }
}

/// Outbound defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendDefaults {
    /// Encode outbound payloads byte-by-byte
    pub hex_send: bool,
    /// Auto-send interval in milliseconds
    pub auto_send_interval_ms: u64,
}

impl Default for SendDefaults {
    fn default() -> Self {
        Self {
            hex_send: false,
            auto_send_interval_ms: 1000,
        }
    }
}

impl AppConfig {
    /// Load config from file
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = super::config_dir()
            .ok_or("Could not determine config directory")?
            .join("config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        super::init_directories()?;
        let config_path = super::config_dir()
            .ok_or("Could not determine config directory")?
            .join("config.toml");

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// Build a [`PortConfig`] for `port` from the stored defaults.
    pub fn port_config(&self, port: &str) -> PortConfig {
        PortConfig {
            port: port.to_string(),
            baud_rate: self.connection.baud_rate,
            data_bits: self.connection.data_bits,
            stop_bits: self.connection.stop_bits,
            parity: self.connection.parity,
            encoding: self.connection.encoding,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_classic_debugger() {
        let config = AppConfig::default();
        assert_eq!(config.connection.baud_rate, 9600);
        assert_eq!(config.connection.data_bits, 8);
        assert_eq!(config.connection.stop_bits, 1);
        assert_eq!(config.connection.parity, Parity::None);
        assert_eq!(config.send.auto_send_interval_ms, 1000);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.connection.baud_rate, config.connection.baud_rate);
        assert_eq!(parsed.connection.encoding, TextEncoding::Gbk);
    }

    #[test]
    fn test_port_config_from_defaults_is_valid() {
        let config = AppConfig::default();
        assert!(config.port_config("COM3").validate().is_ok());
    }
}
