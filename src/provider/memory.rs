//! In-memory agent provider
//!
//! A scripted backend for tests and single-process embedding. Outbound calls
//! are recorded; the event stream is fed by `push` and can be dropped with
//! `disconnect` to exercise reconnects.

use crate::error::{BridgeError, Result};
use crate::provider::{AgentProvider, ByteStream, EventSource};
use crate::types::InteractionAnswer;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;

/// In-memory provider implementing both provider traits
#[derive(Default)]
pub struct MemoryProvider {
    sessions: RwLock<Vec<String>>,
    requests: RwLock<Vec<(String, String)>>,
    aborts: RwLock<Vec<String>>,
    replies: RwLock<Vec<(String, InteractionAnswer)>>,

    /// Sender of the currently open stream
    stream: Mutex<Option<mpsc::UnboundedSender<Result<Bytes>>>>,

    fail_requests: AtomicBool,
    fail_connects: AtomicUsize,
    connects: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create_session` and `send_request` fail
    pub fn set_failing_requests(&self, failing: bool) {
        self.fail_requests.store(failing, Ordering::SeqCst);
    }

    /// Make the next `n` calls to `open` fail
    pub fn fail_next_connects(&self, n: usize) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Number of successful `open` calls
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Whether a stream is currently open
    pub async fn is_connected(&self) -> bool {
        self.stream
            .lock()
            .await
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Push raw bytes into the open stream
    ///
    /// Returns false when no stream is open.
    pub async fn push(&self, raw: &str) -> bool {
        match self.stream.lock().await.as_ref() {
            Some(tx) => tx.send(Ok(Bytes::from(raw.to_string()))).is_ok(),
            None => false,
        }
    }

    /// Push one event frame in the server's `{type, properties}` shape
    pub async fn push_event(&self, event_type: &str, properties: serde_json::Value) -> bool {
        let payload = serde_json::json!({ "type": event_type, "properties": properties });
        self.push(&format!("data: {}\n\n", payload)).await
    }

    /// Fail the open stream with a read error
    pub async fn fail_stream(&self, reason: &str) -> bool {
        match self.stream.lock().await.take() {
            Some(tx) => tx
                .send(Err(BridgeError::Stream(reason.to_string())))
                .is_ok(),
            None => false,
        }
    }

    /// End the open stream cleanly
    pub async fn disconnect(&self) {
        self.stream.lock().await.take();
    }

    /// Sessions created so far
    pub async fn sessions(&self) -> Vec<String> {
        self.sessions.read().await.clone()
    }

    /// Submitted requests as `(session_id, text)`
    pub async fn requests(&self) -> Vec<(String, String)> {
        self.requests.read().await.clone()
    }

    /// Sessions that were aborted
    pub async fn aborts(&self) -> Vec<String> {
        self.aborts.read().await.clone()
    }

    /// Interaction replies as `(request_id, answer)`
    pub async fn replies(&self) -> Vec<(String, InteractionAnswer)> {
        self.replies.read().await.clone()
    }

    fn check_failing(&self) -> Result<()> {
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(BridgeError::Agent("agent unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AgentProvider for MemoryProvider {
    async fn create_session(&self, _title: Option<&str>) -> Result<String> {
        self.check_failing()?;
        let id = format!("ses-{}", uuid::Uuid::new_v4());
        self.sessions.write().await.push(id.clone());
        Ok(id)
    }

    async fn send_request(&self, session_id: &str, text: &str) -> Result<()> {
        self.check_failing()?;
        self.requests
            .write()
            .await
            .push((session_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn abort(&self, session_id: &str) -> Result<()> {
        self.aborts.write().await.push(session_id.to_string());
        Ok(())
    }

    async fn reply_to_interaction(
        &self,
        request_id: &str,
        answer: &InteractionAnswer,
    ) -> Result<()> {
        self.check_failing()?;
        self.replies
            .write()
            .await
            .push((request_id.to_string(), answer.clone()));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[async_trait]
impl EventSource for MemoryProvider {
    async fn open(&self) -> Result<ByteStream> {
        let pending_failure = self
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if pending_failure {
            return Err(BridgeError::Connection("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.stream.lock().await = Some(tx);
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    fn endpoint(&self) -> String {
        "memory://events".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PermissionReply;

    #[tokio::test]
    async fn test_records_requests() {
        let provider = MemoryProvider::new();
        let session = provider.create_session(Some("chat")).await.unwrap();
        assert!(session.starts_with("ses-"));

        provider.send_request(&session, "hi").await.unwrap();
        provider.abort(&session).await.unwrap();
        provider
            .reply_to_interaction(
                "per_1",
                &InteractionAnswer::Permission {
                    reply: PermissionReply::Once,
                },
            )
            .await
            .unwrap();

        assert_eq!(provider.requests().await, vec![(session.clone(), "hi".to_string())]);
        assert_eq!(provider.aborts().await, vec![session]);
        assert_eq!(provider.replies().await.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_requests() {
        let provider = MemoryProvider::new();
        provider.set_failing_requests(true);
        assert!(provider.create_session(None).await.is_err());
        assert!(provider.send_request("ses-1", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_stream_push_and_disconnect() {
        let provider = MemoryProvider::new();
        assert!(!provider.push("data: {}\n\n").await);

        let mut stream = provider.open().await.unwrap();
        assert!(provider.is_connected().await);
        assert!(provider.push("data: {}\n\n").await);

        let chunk = stream.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"data: {}\n\n");

        provider.disconnect().await;
        assert!(stream.next().await.is_none());
        assert!(!provider.is_connected().await);
    }

    #[tokio::test]
    async fn test_connect_failures_count_down() {
        let provider = MemoryProvider::new();
        provider.fail_next_connects(2);
        assert!(provider.open().await.is_err());
        assert!(provider.open().await.is_err());
        assert!(provider.open().await.is_ok());
        assert_eq!(provider.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_error() {
        let provider = MemoryProvider::new();
        let mut stream = provider.open().await.unwrap();
        assert!(provider.fail_stream("reset by peer").await);
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }
}
