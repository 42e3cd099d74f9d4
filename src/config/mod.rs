//! Application configuration

pub mod client;

use std::env;

use serde::{Deserialize, Serialize};

pub use client::{ClientConfig, ConfigError};

/// Relay server configuration, sourced from the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub upstream: UpstreamConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            upstream: UpstreamConfig::from_env(),
        })
    }
}

/// Upstream conversational API settings.
///
/// Both fields are mandatory for relaying, but they are checked per request
/// rather than at startup so a misconfigured relay answers with a clear 500.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

/// Missing upstream configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Upstream API configuration is missing: {0}")]
pub struct ConfigurationError(pub &'static str);

impl UpstreamConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            api_key: Some(api_key.into()),
        }
    }

    pub fn from_env() -> Self {
        Self {
            base_url: non_empty(env::var("UPSTREAM_BASE_URL").ok()),
            api_key: non_empty(env::var("UPSTREAM_API_KEY").ok()),
        }
    }

    /// Validated `(base_url, api_key)` pair, base URL without a trailing slash
    pub fn credentials(&self) -> Result<(&str, &str), ConfigurationError> {
        let base_url = self
            .base_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigurationError("UPSTREAM_BASE_URL"))?;
        let api_key = self
            .api_key
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigurationError("UPSTREAM_API_KEY"))?;
        Ok((base_url.trim_end_matches('/'), api_key))
    }

    pub fn is_complete(&self) -> bool {
        self.credentials().is_ok()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_trim_trailing_slash() {
        let config = UpstreamConfig::new("https://api.example.com/v1/", "secret");
        let (base_url, api_key) = config.credentials().unwrap();
        assert_eq!(base_url, "https://api.example.com/v1");
        assert_eq!(api_key, "secret");
    }

    #[test]
    fn test_missing_base_url() {
        let config = UpstreamConfig {
            base_url: None,
            api_key: Some("secret".into()),
        };
        assert_eq!(
            config.credentials().unwrap_err(),
            ConfigurationError("UPSTREAM_BASE_URL")
        );
    }

    #[test]
    fn test_blank_key_counts_as_missing() {
        let config = UpstreamConfig {
            base_url: Some("https://api.example.com".into()),
            api_key: Some("   ".into()),
        };
        assert_eq!(
            config.credentials().unwrap_err(),
            ConfigurationError("UPSTREAM_API_KEY")
        );
        assert!(!config.is_complete());
    }
}
