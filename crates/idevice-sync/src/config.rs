//! Sync configuration.
//!
//! Everything has a default matching what an iOS device expects, so an empty JSON object
//! is a valid config file.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Service name of the AFC file service on the lockdown channel.
pub const AFC_SERVICE_NAME: &str = "com.apple.afc";

/// Parent directory of the `Fnn` family directories on the device.
pub const DEFAULT_MUSIC_ROOT: &str = "/iTunes_Control/Music";

/// Copy buffer size in bytes (10 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 10 * 1024;

/// Configuration for device sessions, tree transfers, and filename allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Label presented to lockdownd during the handshake (shows up in the device's pairing records).
    #[serde(default = "default_client_label")]
    pub client_label: String,
    /// Name of the file service to start on the control channel.
    #[serde(default = "default_file_service_name")]
    pub file_service_name: String,
    /// The only subtrees that get mirrored, absolute device paths.
    #[serde(default = "default_important_directories")]
    pub important_directories: Vec<String>,
    /// Intermediate buffer size for streaming copies, in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Parent of the `F00`, `F01`, ... directories.
    #[serde(default = "default_music_root")]
    pub music_root: String,
    /// Prefix of generated track filenames.
    #[serde(default = "default_filename_prefix")]
    pub filename_prefix: String,
    /// Extension used when the source track has none.
    #[serde(default = "default_fallback_extension")]
    pub fallback_extension: String,
    /// How many colliding names to draw before giving up on a family directory.
    #[serde(default = "default_max_name_attempts")]
    pub max_name_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_label: default_client_label(),
            file_service_name: default_file_service_name(),
            important_directories: default_important_directories(),
            buffer_size: default_buffer_size(),
            music_root: default_music_root(),
            filename_prefix: default_filename_prefix(),
            fallback_extension: default_fallback_extension(),
            max_name_attempts: default_max_name_attempts(),
        }
    }
}

fn default_client_label() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_file_service_name() -> String {
    AFC_SERVICE_NAME.to_string()
}

fn default_important_directories() -> Vec<String> {
    vec![
        "/iTunes_Control/Artwork".to_string(),
        "/iTunes_Control/Device".to_string(),
        "/iTunes_Control/iTunes".to_string(),
    ]
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_music_root() -> String {
    DEFAULT_MUSIC_ROOT.to_string()
}

fn default_filename_prefix() -> String {
    "libgpod".to_string()
}

fn default_fallback_extension() -> String {
    "mp3".to_string()
}

fn default_max_name_attempts() -> u32 {
    10_000
}

/// Errors from loading or validating a config file.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfigError {
    /// The file could not be read.
    Io { path: String, message: String },
    /// The file is not valid JSON for `SyncConfig`.
    Parse { path: String, message: String },
    /// A field holds a value the sync engine can't work with.
    Invalid { field: &'static str, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "Failed to read config {path}: {message}"),
            Self::Parse { path, message } => write!(f, "Failed to parse config {path}: {message}"),
            Self::Invalid { field, message } => write!(f, "Invalid config field {field}: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl SyncConfig {
    /// Reads and validates a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config: SyncConfig = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        log::debug!("SyncConfig::load: loaded {}", path.display());
        Ok(config)
    }

    /// Checks the values the transfer code relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "bufferSize",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.important_directories.is_empty() {
            return Err(ConfigError::Invalid {
                field: "importantDirectories",
                message: "at least one directory is required".to_string(),
            });
        }
        if let Some(relative) = self.important_directories.iter().find(|d| !d.starts_with('/')) {
            return Err(ConfigError::Invalid {
                field: "importantDirectories",
                message: format!("\"{relative}\" is not an absolute device path"),
            });
        }
        if !self.music_root.starts_with('/') {
            return Err(ConfigError::Invalid {
                field: "musicRoot",
                message: format!("\"{}\" is not an absolute device path", self.music_root),
            });
        }
        if self.filename_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                field: "filenamePrefix",
                message: "must not be empty".to_string(),
            });
        }
        if self.max_name_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "maxNameAttempts",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
