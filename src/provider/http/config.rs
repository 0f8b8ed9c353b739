//! HTTP provider configuration

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};

/// Connection settings for an OpenCode-style agent server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpConfig {
    /// Base URL of the agent server
    pub base_url: String,

    /// Working directory passed as the `directory` query parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,

    /// Timeout for request/response calls (seconds); the event stream has none
    pub request_timeout_secs: u64,

    /// Timeout for establishing the event stream connection (seconds)
    pub connect_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:4096".to_string(),
            directory: None,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

impl HttpConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Build an endpoint URL from a path (must start with `/`)
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Query parameters attached to every request
    pub fn query(&self) -> Vec<(&'static str, String)> {
        self.directory
            .iter()
            .map(|dir| ("directory", dir.clone()))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(BridgeError::Config(format!(
                "baseUrl must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(BridgeError::Config(
                "requestTimeoutSecs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
