//! Configuration file handling.
//!
//! The configuration is a TOML document whose keys are matched
//! case-insensitively. Unknown keys are rejected so a typoed option does
//! not silently disable recovery.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Default directory for recovered artifacts.
pub const DEFAULT_RECOVERY_DIR: &str = "/var/lib/diskalert/recovered";

/// Default location of the pre-compiled probe object.
pub const DEFAULT_PROBE_IMAGE: &str = "/usr/lib/diskalert/diskalert-probes.o";

/// Default cap on the number of recovered artifacts kept on disk.
pub const DEFAULT_RECOVERY_MAX_FILES: u64 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

/// Agent configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Block device path to monitor; may be a symbolic link.
    pub devicename: String,

    /// Percent-full trigger, 0-100.
    pub diskusage_threshold: u64,

    /// Command line spawned on a threshold breach.
    pub action: String,

    /// Maximum consecutive breach events that spawn the action.
    #[serde(default)]
    pub repeat_action: u64,

    /// Enable the deleted-open-file recovery engine.
    #[serde(default)]
    pub recovery_enabled: bool,

    /// Minimum size in bytes for a file to be tracked.
    #[serde(default)]
    pub recovery_min_size: u64,

    /// Directory receiving recovered artifacts.
    #[serde(default = "default_recovery_dir")]
    pub recovery_dir: PathBuf,

    /// Cap on the number of recovered artifacts kept on disk.
    #[serde(default = "default_recovery_max_files")]
    pub recovery_max_files: u64,

    /// Path to the pre-compiled probe object.
    #[serde(default = "default_probe_image")]
    pub probe_image: PathBuf,
}

fn default_recovery_dir() -> PathBuf {
    PathBuf::from(DEFAULT_RECOVERY_DIR)
}

fn default_recovery_max_files() -> u64 {
    DEFAULT_RECOVERY_MAX_FILES
}

fn default_probe_image() -> PathBuf {
    PathBuf::from(DEFAULT_PROBE_IMAGE)
}

impl Config {
    /// Load and validate the configuration from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration document, lowering top-level keys first so
    /// `DeviceName` and `devicename` mean the same thing.
    fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        let table: toml::Table = raw.parse()?;
        let lowered: toml::Table = table
            .into_iter()
            .map(|(key, value)| (key.to_ascii_lowercase(), value))
            .collect();
        toml::Value::Table(lowered).try_into()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.devicename.is_empty() {
            return Err(ConfigError::Invalid {
                message: "devicename must not be empty".into(),
            });
        }
        if self.diskusage_threshold > 100 {
            return Err(ConfigError::Invalid {
                message: format!(
                    "diskusage_threshold must be within 0-100, got {}",
                    self.diskusage_threshold
                ),
            });
        }
        if self.action.split_whitespace().next().is_none() {
            return Err(ConfigError::Invalid {
                message: "action must name an executable".into(),
            });
        }
        Ok(())
    }
}
