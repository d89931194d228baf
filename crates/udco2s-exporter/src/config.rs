//! Exporter configuration from the environment

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Address of the `/metrics` endpoint
pub const LISTEN_ADDR_VAR: &str = "LISTEN_ADDR";
/// Serial device path
pub const TTY_VAR: &str = "TTY";
/// Optional snapshot interval in milliseconds
pub const POLL_INTERVAL_VAR: &str = "POLL_INTERVAL_MS";

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("please specify the {0} environment variable")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterConfig {
    pub listen_addr: SocketAddr,
    pub tty: String,
    pub poll_interval: Duration,
}

impl ExporterConfig {
    /// Read the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name to
    /// its value
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let listen_addr = parse_listen_addr(&required(LISTEN_ADDR_VAR)?)?;
        let tty = required(TTY_VAR)?;

        let poll_interval = match lookup(POLL_INTERVAL_VAR).filter(|v| !v.trim().is_empty()) {
            None => Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            Some(value) => {
                let millis = value.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                    name: POLL_INTERVAL_VAR,
                    value: value.clone(),
                    reason: e.to_string(),
                })?;
                if millis == 0 {
                    return Err(ConfigError::Invalid {
                        name: POLL_INTERVAL_VAR,
                        value,
                        reason: "must be greater than zero".to_string(),
                    });
                }
                Duration::from_millis(millis)
            }
        };

        Ok(Self {
            listen_addr,
            tty,
            poll_interval,
        })
    }
}

/// Parse a listen address, accepting the `:9090` shorthand for all interfaces
fn parse_listen_addr(value: &str) -> Result<SocketAddr, ConfigError> {
    let expanded = match value.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => value.to_string(),
    };
    expanded.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
        name: LISTEN_ADDR_VAR,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
