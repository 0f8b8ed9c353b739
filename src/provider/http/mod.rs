//! HTTP/SSE agent provider
//!
//! Implements `AgentProvider` and `EventSource` against an OpenCode-style
//! agent server: JSON calls for sessions and interactions, `GET /event`
//! for the server-sent event stream.

mod client;
mod config;

pub use client::HttpClient;
pub use config::HttpConfig;

use crate::error::Result;
use crate::provider::{AgentProvider, ByteStream, EventSource};
use crate::types::InteractionAnswer;
use async_trait::async_trait;

/// HTTP agent provider
///
/// Wraps `HttpClient` and implements the provider traits.
pub struct HttpProvider {
    client: HttpClient,
}

impl HttpProvider {
    /// Build a provider for the configured server
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = HttpClient::new(config)?;
        Ok(Self { client })
    }

    /// Get the underlying HTTP client for advanced usage
    pub fn client(&self) -> &HttpClient {
        &self.client
    }
}

#[async_trait]
impl AgentProvider for HttpProvider {
    async fn create_session(&self, title: Option<&str>) -> Result<String> {
        self.client.create_session(title).await
    }

    async fn send_request(&self, session_id: &str, text: &str) -> Result<()> {
        self.client.prompt_async(session_id, text).await
    }

    async fn abort(&self, session_id: &str) -> Result<()> {
        self.client.abort(session_id).await
    }

    async fn reply_to_interaction(
        &self,
        request_id: &str,
        answer: &InteractionAnswer,
    ) -> Result<()> {
        self.client.reply(request_id, answer).await
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[async_trait]
impl EventSource for HttpProvider {
    async fn open(&self) -> Result<ByteStream> {
        self.client.open_events().await
    }

    fn endpoint(&self) -> String {
        self.client.config().url("/event")
    }
}
