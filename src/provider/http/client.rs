//! HTTP client for session calls and the SSE event stream

use super::config::HttpConfig;
use crate::error::{BridgeError, Result};
use crate::provider::ByteStream;
use crate::types::InteractionAnswer;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

/// HTTP client for an OpenCode-style agent server
///
/// Holds two connection pools: one with a request timeout for ordinary
/// calls, one without for the long-lived event stream.
pub struct HttpClient {
    /// Client for request/response calls
    client: reqwest::Client,

    /// Client for the event stream
    stream_client: reqwest::Client,

    /// Configuration
    config: Arc<HttpConfig>,
}

impl HttpClient {
    /// Build the underlying HTTP clients
    pub fn new(config: HttpConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BridgeError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let stream_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| BridgeError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            stream_client,
            config: Arc::new(config),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Create a session, returning its id
    pub async fn create_session(&self, title: Option<&str>) -> Result<String> {
        let mut body = serde_json::json!({});
        if let Some(title) = title {
            body["title"] = serde_json::Value::String(title.to_string());
        }

        let resp = self
            .client
            .post(self.config.url("/session"))
            .query(&self.config.query())
            .json(&body)
            .send()
            .await?;
        let resp = ensure_success(resp, "create session").await?;

        let session: serde_json::Value = resp.json().await?;
        let id = session["id"]
            .as_str()
            .ok_or_else(|| BridgeError::Agent("session response has no id".to_string()))?
            .to_string();

        tracing::info!(session_id = %id, "Remote session created");
        Ok(id)
    }

    /// Submit a prompt without waiting for the response
    pub async fn prompt_async(&self, session_id: &str, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "parts": [{ "type": "text", "text": text }]
        });

        let resp = self
            .client
            .post(self.config.url(&format!("/session/{}/prompt_async", session_id)))
            .query(&self.config.query())
            .json(&body)
            .send()
            .await?;
        ensure_success(resp, "send prompt").await?;

        tracing::debug!(session_id, bytes = text.len(), "Prompt submitted");
        Ok(())
    }

    /// Abort the running turn of a session
    pub async fn abort(&self, session_id: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.config.url(&format!("/session/{}/abort", session_id)))
            .query(&self.config.query())
            .send()
            .await?;
        ensure_success(resp, "abort session").await?;
        Ok(())
    }

    /// Answer a permission or question request
    pub async fn reply(&self, request_id: &str, answer: &InteractionAnswer) -> Result<()> {
        let request = match answer {
            InteractionAnswer::Permission { reply } => self
                .client
                .post(self.config.url(&format!("/permission/{}/reply", request_id)))
                .json(&serde_json::json!({ "reply": reply.as_str() })),
            InteractionAnswer::Question { answers } => self
                .client
                .post(self.config.url(&format!("/question/{}/reply", request_id)))
                .json(&serde_json::json!({ "answers": answers })),
            InteractionAnswer::Dismiss => self
                .client
                .post(self.config.url(&format!("/question/{}/reject", request_id))),
        };

        let resp = request.query(&self.config.query()).send().await?;
        ensure_success(resp, "reply to interaction").await?;

        tracing::debug!(request_id, "Interaction answered");
        Ok(())
    }

    /// Open the server-sent event stream
    pub async fn open_events(&self) -> Result<ByteStream> {
        let url = self.config.url("/event");

        let resp = self
            .stream_client
            .get(&url)
            .query(&self.config.query())
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| BridgeError::Connection(format!("{}: {}", url, e)))?;

        if !resp.status().is_success() {
            return Err(BridgeError::Connection(format!(
                "{}: unexpected status {}",
                url,
                resp.status()
            )));
        }

        let stream = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| BridgeError::Stream(e.to_string())));
        Ok(stream.boxed())
    }
}

/// Turn a non-2xx response into an agent error carrying the body
async fn ensure_success(resp: reqwest::Response, action: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BridgeError::Agent(format!(
        "Failed to {} ({}): {}",
        action, status, body
    )))
}
