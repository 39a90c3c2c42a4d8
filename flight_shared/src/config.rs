//! Configuration system.
//!
//! Loads configuration from JSON strings/files, then lets the environment
//! (`PORT`) and command-line flags override it.

use std::{net::SocketAddr, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net::MAX_FRAME_LEN;

/// Environment variable overriding the listen port.
pub const PORT_ENV: &str = "PORT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid server_addr {0:?}")]
    BadAddr(String),
    #[error("invalid port {0:?}")]
    BadPort(String),
    #[error("sync_interval_ms must be greater than zero")]
    ZeroSyncInterval,
    #[error("tick_hz must be greater than zero")]
    ZeroTickRate,
}

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightConfig {
    /// Server listen/connect address, e.g. `0.0.0.0:3000`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Interval between full-sync broadcasts.
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
    /// Client pose send rate.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

fn default_server_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_sync_interval_ms() -> u64 {
    3000
}

fn default_tick_hz() -> u32 {
    60
}

fn default_max_frame_len() -> usize {
    MAX_FRAME_LEN
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            sync_interval_ms: default_sync_interval_ms(),
            tick_hz: default_tick_hz(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl FlightConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Applies `PORT` from the process environment, if set.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        match std::env::var(PORT_ENV) {
            Ok(port) => self.set_port(&port),
            Err(_) => Ok(()),
        }
    }

    /// Replaces the port of `server_addr`, keeping the host.
    pub fn set_port(&mut self, port: &str) -> Result<(), ConfigError> {
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| ConfigError::BadPort(port.to_string()))?;
        let mut addr = self.socket_addr()?;
        addr.set_port(port);
        self.server_addr = addr.to_string();
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server_addr
            .parse()
            .map_err(|_| ConfigError::BadAddr(self.server_addr.clone()))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_hz.max(1)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        if self.sync_interval_ms == 0 {
            return Err(ConfigError::ZeroSyncInterval);
        }
        if self.tick_hz == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reconciliation_interval() {
        let cfg = FlightConfig::default();
        assert_eq!(cfg.sync_interval(), Duration::from_secs(3));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = FlightConfig::from_json_str(r#"{ "sync_interval_ms": 500 }"#).unwrap();
        assert_eq!(cfg.sync_interval_ms, 500);
        assert_eq!(cfg.server_addr, "127.0.0.1:3000");
        assert_eq!(cfg.max_frame_len, MAX_FRAME_LEN);
    }

    #[test]
    fn set_port_keeps_host() {
        let mut cfg = FlightConfig {
            server_addr: "0.0.0.0:3000".into(),
            ..Default::default()
        };
        cfg.set_port("8080").unwrap();
        assert_eq!(cfg.server_addr, "0.0.0.0:8080");
        assert!(matches!(cfg.set_port("http"), Err(ConfigError::BadPort(_))));
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let cfg = FlightConfig {
            sync_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroSyncInterval)));

        let cfg = FlightConfig {
            server_addr: "nowhere".into(),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::BadAddr(_))));
    }
}
