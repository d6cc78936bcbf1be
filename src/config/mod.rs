//! Application configuration loaded from a TOML file.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a working setup.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::register::EngineConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid setting {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub serial: SerialDefaults,
    pub protocol: ProtocolConfig,
    pub ports: PortsConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket server binds to, e.g. `127.0.0.1:8000`
    pub bind_address: String,
    /// Origins allowed by CORS. Empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8000".to_string(),
            cors_origins: Vec::new(),
        }
    }
}

/// Serial side: defaults applied when a connect request leaves a field out
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SerialDefaults {
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    /// How often the passive forwarder polls for unsolicited bytes
    pub forward_interval_ms: u64,
    /// Serve a simulated register board instead of the OS serial ports
    pub simulated: bool,
}

impl Default for SerialDefaults {
    fn default() -> Self {
        Self {
            baud_rate: crate::serial::DEFAULT_BAUD_RATE,
            read_timeout_ms: crate::serial::DEFAULT_READ_TIMEOUT_MS,
            forward_interval_ms: 20,
            simulated: false,
        }
    }
}

/// Timeouts and limits of register exchanges
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub batch_read_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_block_size: usize,
    pub write_queue_capacity: usize,
    pub write_ack_grace_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            read_timeout_ms: engine.read_timeout.as_millis() as u64,
            write_timeout_ms: engine.write_timeout.as_millis() as u64,
            batch_read_timeout_ms: engine.batch_read_timeout.as_millis() as u64,
            poll_interval_ms: engine.poll_interval.as_millis() as u64,
            max_block_size: engine.max_block_size,
            write_queue_capacity: engine.write_queue_capacity,
            write_ack_grace_ms: engine.write_ack_grace.as_millis() as u64,
        }
    }
}

impl ProtocolConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            batch_read_timeout: Duration::from_millis(self.batch_read_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_block_size: self.max_block_size,
            write_queue_capacity: self.write_queue_capacity,
            write_ack_grace: Duration::from_millis(self.write_ack_grace_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PortsConfig {
    pub poll_interval_ms: u64,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/regbridge.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter (trace, debug, info, warn, error). `RUST_LOG` overrides it.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.protocol;
        if p.read_timeout_ms == 0 || p.write_timeout_ms == 0 || p.batch_read_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "protocol",
                message: "timeouts must be greater than zero".to_string(),
            });
        }
        if p.poll_interval_ms == 0 || p.poll_interval_ms >= 20 {
            return Err(ConfigError::Invalid {
                field: "protocol.poll_interval_ms",
                message: format!("{} must be between 1 and 19", p.poll_interval_ms),
            });
        }
        if p.write_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "protocol.write_queue_capacity",
                message: "must be at least 1".to_string(),
            });
        }
        if p.max_block_size == 0 {
            return Err(ConfigError::Invalid {
                field: "protocol.max_block_size",
                message: "must be at least 1".to_string(),
            });
        }
        if self.ports.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "ports.poll_interval_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
