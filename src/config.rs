//! Configuration for the pty pair and the cross-thread protocol

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::pty::WindowSize;
use crate::termios::PACKED_WORDS;

/// Environment variable naming a config file to use instead of the default
pub const CONFIG_ENV: &str = "TTY_BRIDGE_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pty: PtyConfig,
    pub protocol: ProtocolConfig,
}

/// Pty pair settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtyConfig {
    /// Held-back consumer output above this many bytes makes the slave
    /// unwritable; the renderer queue at or under it makes it writable again
    pub buffer_limit: usize,
    /// Largest chunk handed to the renderer at once
    pub chunk_size: usize,
    /// Window size reported before the first resize
    pub window: WindowSize,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            buffer_limit: 4096,
            chunk_size: 4096,
            window: WindowSize::default(),
        }
    }
}

/// Protocol settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Data words in the shared region, after the control word
    pub shared_words: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self { shared_words: 64 }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from `$TTY_BRIDGE_CONFIG`, then ~/.config/tty-bridge/config.json,
    /// falling back to the defaults
    pub fn load_or_default() -> Self {
        let Some(path) = config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("ignoring {}: {}", path.display(), err);
                Self::default()
            },
        }
    }

    /// Reject settings the pty pair or the protocol cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pty.chunk_size == 0 {
            return Err(ConfigError::Invalid("pty.chunk_size must be positive".into()));
        }
        if self.protocol.shared_words < PACKED_WORDS {
            return Err(ConfigError::Invalid(format!(
                "protocol.shared_words must hold a packed termios ({} words)",
                PACKED_WORDS
            )));
        }
        Ok(())
    }
}

fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    std::env::var("HOME").ok().map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("tty-bridge")
            .join("config.json")
    })
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
