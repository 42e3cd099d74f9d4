//! Terminal client configuration loaded from TOML files
//!
//! ```toml
//! relay_url = "http://127.0.0.1:3000"
//! user = "front-desk"
//! category = "chapter"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::conversation::Category;

/// Root client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the relay server
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// Stable user identifier sent upstream; generated per request when absent
    #[serde(default)]
    pub user: Option<String>,

    /// Category preselected on the category screen
    #[serde(default)]
    pub category: Category,
}

fn default_relay_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: default_relay_url(),
            user: None,
            category: Category::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a file, or use defaults if it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No client config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.relay_url.starts_with("http://") || self.relay_url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "relay_url must be an http(s) URL, got '{}'",
                self.relay_url
            )));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}
