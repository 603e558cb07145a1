//! Server configuration file.
//!
//! Every section and key is optional; an empty file yields the defaults.
//!
//! # Example
//!
//! ```toml
//! [server]
//! server_number = 2
//! relay_stamp = 2
//!
//! [collections]
//! tasks = "tasks"
//! alias_families = "alias_families"
//! relay_items = "relay_items"
//!
//! [logging]
//! format = "json"
//! filter = "aafs_core=debug,info"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::observability::LogFormat;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AafsConfig {
    pub server: ServerConfig,
    pub collections: CollectionNames,
    pub logging: LoggingConfig,
}

/// `[server]`: which of the two peers this process is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// 1 or 2.
    pub server_number: u8,
    /// Stamp written on locally originated relay items. Must not be
    /// negative; negative stamps mark items applied from the peer.
    pub relay_stamp: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            server_number: 1,
            relay_stamp: 0,
        }
    }
}

impl ServerConfig {
    /// Submitter id recorded on tasks this server creates.
    pub fn submit_id(&self) -> String {
        format!("server{}", self.server_number)
    }
}

/// `[collections]`: store collection names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectionNames {
    pub tasks: String,
    pub alias_families: String,
    pub relay_items: String,
}

impl Default for CollectionNames {
    fn default() -> Self {
        CollectionNames {
            tasks: "tasks".to_string(),
            alias_families: "alias_families".to_string(),
            relay_items: "relay_items".to_string(),
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            format: LogFormat::Pretty,
            filter: "warn".to_string(),
        }
    }
}

impl AafsConfig {
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Check cross-field rules serde cannot express. Reports every problem,
    /// not just the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if !matches!(self.server.server_number, 1 | 2) {
            errors.push(format!(
                "server.server_number must be 1 or 2, got {}",
                self.server.server_number
            ));
        }
        if self.server.relay_stamp < 0 {
            errors.push(format!(
                "server.relay_stamp must not be negative, got {}",
                self.server.relay_stamp
            ));
        }

        let names = [
            ("collections.tasks", &self.collections.tasks),
            ("collections.alias_families", &self.collections.alias_families),
            ("collections.relay_items", &self.collections.relay_items),
        ];
        for (key, name) in names {
            if name.is_empty() {
                errors.push(format!("{key} must not be empty"));
            }
        }
        for (i, (key, name)) in names.iter().enumerate() {
            if names[..i].iter().any(|(_, other)| other == name) {
                errors.push(format!("{key} reuses collection name '{name}'"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors.join("; ")))
        }
    }
}

/// Read, parse, and validate a configuration file.
pub fn read_config(path: &Path) -> Result<AafsConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = AafsConfig::from_toml(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}
