//! Link configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! send_timeout_ms = 1000
//! register_backoff_ms = 50
//! partition_id = 3
//!
//! [protocol]
//! category = 8
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::Header;
use crate::error::ConfigError;

/// Partition id sent in REGISTER when the platform did not report one.
pub const UNKNOWN_PARTITION: u8 = 0xff;

/// Frame header tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub category: u8,
    pub major: u8,
    pub minor: u8,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            category: 8,
            major: 1,
            minor: 0,
        }
    }
}

impl ProtocolConfig {
    #[must_use]
    pub const fn header(&self) -> Header {
        Header {
            category: self.category,
            major: self.major,
            minor: self.minor,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` overrides it.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// How long an acked send waits for its reply.
    pub send_timeout_ms: u64,
    /// Sleep between REGISTER attempts.
    pub register_backoff_ms: u64,
    pub client_id: u32,
    /// Resource partition this AP runs in, if known.
    pub partition_id: Option<u8>,
    pub protocol: ProtocolConfig,
    pub logging: LoggingConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: 1000,
            register_backoff_ms: 50,
            client_id: 0,
            partition_id: None,
            protocol: ProtocolConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl LinkConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded link config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "send_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.register_backoff_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "register_backoff_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    #[must_use]
    pub const fn register_backoff(&self) -> Duration {
        Duration::from_millis(self.register_backoff_ms)
    }

    /// Partition id to put on the wire.
    #[must_use]
    pub fn wire_partition_id(&self) -> u8 {
        match self.partition_id {
            Some(id) => id,
            None => {
                tracing::warn!("partition id unknown, registering with {UNKNOWN_PARTITION:#x}");
                UNKNOWN_PARTITION
            }
        }
    }
}
