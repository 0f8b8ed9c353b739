//! Remote agent provider traits, the core abstraction for agent backends
//!
//! A backend has two faces: `AgentProvider` for outbound requests and
//! `EventSource` for the server-pushed event stream. Outcomes of
//! `send_request` are observed later through the event stream, not through
//! its return value.

use crate::error::Result;
use crate::types::InteractionAnswer;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

pub mod http;
pub mod memory;

/// Raw byte stream of one event-source connection
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Outbound calls to the remote agent service
#[async_trait]
pub trait AgentProvider: Send + Sync {
    /// Create a new remote session, returning its id
    async fn create_session(&self, title: Option<&str>) -> Result<String>;

    /// Submit user text to a session
    ///
    /// Returns once the service accepted the request; the response arrives
    /// as events.
    async fn send_request(&self, session_id: &str, text: &str) -> Result<()>;

    /// Abort whatever the session is doing
    async fn abort(&self, session_id: &str) -> Result<()>;

    /// Answer a permission or question request
    async fn reply_to_interaction(&self, request_id: &str, answer: &InteractionAnswer)
        -> Result<()>;

    /// Provider name (e.g., "http", "memory")
    fn name(&self) -> &str;
}

/// Source of the server-pushed event stream
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open one streaming connection
    ///
    /// Called again with the same parameters on every reconnect.
    async fn open(&self) -> Result<ByteStream>;

    /// Endpoint description for logging
    fn endpoint(&self) -> String;
}
