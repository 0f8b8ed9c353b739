//! Presentation collaborator
//!
//! The bridge never speaks a chat platform's wire protocol. Hosts implement
//! `Presenter` on top of their channel adapter; every call is scoped to the
//! conversation (chat) it targets.

use crate::error::{BridgeError, Result};
use crate::types::ReplyOption;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Outbound side of a chat channel
#[async_trait]
pub trait Presenter: Send + Sync {
    /// Send a new message, returning its channel message id
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<String>;

    /// Send a new message with selectable reply options
    async fn send_message_with_options(
        &self,
        conversation_id: &str,
        text: &str,
        options: &[ReplyOption],
    ) -> Result<String>;

    /// Replace the content of a previously sent message
    async fn edit_message(&self, conversation_id: &str, message_id: &str, text: &str)
        -> Result<()>;

    /// Replace content and reply options of a previously sent message
    ///
    /// Default implementation drops the options and delegates to `edit_message()`.
    async fn edit_message_with_options(
        &self,
        conversation_id: &str,
        message_id: &str,
        text: &str,
        _options: &[ReplyOption],
    ) -> Result<()> {
        self.edit_message(conversation_id, message_id, text).await
    }

    /// Show a typing indicator
    async fn send_typing(&self, conversation_id: &str) -> Result<()>;
}

/// One operation recorded by `MemoryPresenter`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentedOp {
    Send {
        conversation_id: String,
        message_id: String,
        text: String,
        options: Vec<ReplyOption>,
    },
    Edit {
        conversation_id: String,
        message_id: String,
        text: String,
        options: Vec<ReplyOption>,
    },
    Typing {
        conversation_id: String,
    },
}

/// In-memory presenter for testing
///
/// Records every operation and mimics the platform's rejection of edits
/// that leave a message unchanged.
#[derive(Default)]
pub struct MemoryPresenter {
    ops: RwLock<Vec<PresentedOp>>,
    current: RwLock<std::collections::HashMap<String, String>>,
    next_id: AtomicU64,
    fail_sends: AtomicBool,
}

impl MemoryPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends and edits fail
    pub fn set_failing(&self, failing: bool) {
        self.fail_sends.store(failing, Ordering::SeqCst);
    }

    /// All recorded operations, oldest first
    pub async fn ops(&self) -> Vec<PresentedOp> {
        self.ops.read().await.clone()
    }

    /// Texts of sent messages for a conversation
    pub async fn sent_texts(&self, conversation_id: &str) -> Vec<String> {
        self.ops
            .read()
            .await
            .iter()
            .filter_map(|op| match op {
                PresentedOp::Send {
                    conversation_id: c,
                    text,
                    ..
                } if c == conversation_id => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of typing indicators sent to a conversation
    pub async fn typing_count(&self, conversation_id: &str) -> usize {
        self.ops
            .read()
            .await
            .iter()
            .filter(|op| matches!(op, PresentedOp::Typing { conversation_id: c } if c == conversation_id))
            .count()
    }

    /// Current text of a message, after all edits
    pub async fn message_text(&self, message_id: &str) -> Option<String> {
        self.current.read().await.get(message_id).cloned()
    }

    fn check_failing(&self) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(BridgeError::Presentation("channel unavailable".to_string()));
        }
        Ok(())
    }

    async fn record_send(
        &self,
        conversation_id: &str,
        text: &str,
        options: &[ReplyOption],
    ) -> Result<String> {
        self.check_failing()?;
        let message_id = format!("m{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.current
            .write()
            .await
            .insert(message_id.clone(), text.to_string());
        self.ops.write().await.push(PresentedOp::Send {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.clone(),
            text: text.to_string(),
            options: options.to_vec(),
        });
        Ok(message_id)
    }

    async fn record_edit(
        &self,
        conversation_id: &str,
        message_id: &str,
        text: &str,
        options: &[ReplyOption],
    ) -> Result<()> {
        self.check_failing()?;
        {
            let mut current = self.current.write().await;
            let existing = current.get(message_id).cloned();
            match existing {
                None => {
                    return Err(BridgeError::Presentation(format!(
                        "message {} not found",
                        message_id
                    )))
                }
                Some(existing) if existing.as_str() == text && options.is_empty() => {
                    return Err(BridgeError::MessageNotModified)
                }
                Some(_) => {
                    current.insert(message_id.to_string(), text.to_string());
                }
            }
        }
        self.ops.write().await.push(PresentedOp::Edit {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
            text: text.to_string(),
            options: options.to_vec(),
        });
        Ok(())
    }
}

#[async_trait]
impl Presenter for MemoryPresenter {
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<String> {
        self.record_send(conversation_id, text, &[]).await
    }

    async fn send_message_with_options(
        &self,
        conversation_id: &str,
        text: &str,
        options: &[ReplyOption],
    ) -> Result<String> {
        self.record_send(conversation_id, text, options).await
    }

    async fn edit_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<()> {
        self.record_edit(conversation_id, message_id, text, &[]).await
    }

    async fn edit_message_with_options(
        &self,
        conversation_id: &str,
        message_id: &str,
        text: &str,
        options: &[ReplyOption],
    ) -> Result<()> {
        self.record_edit(conversation_id, message_id, text, options)
            .await
    }

    async fn send_typing(&self, conversation_id: &str) -> Result<()> {
        self.ops.write().await.push(PresentedOp::Typing {
            conversation_id: conversation_id.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_edit() {
        let presenter = MemoryPresenter::new();
        let id = presenter.send_message("chat1", "hello").await.unwrap();
        presenter.edit_message("chat1", &id, "hello world").await.unwrap();

        assert_eq!(presenter.message_text(&id).await.unwrap(), "hello world");
        assert_eq!(presenter.sent_texts("chat1").await, vec!["hello"]);
        assert_eq!(presenter.ops().await.len(), 2);
    }

    #[tokio::test]
    async fn test_unchanged_edit_is_not_modified() {
        let presenter = MemoryPresenter::new();
        let id = presenter.send_message("chat1", "same").await.unwrap();
        let err = presenter.edit_message("chat1", &id, "same").await.unwrap_err();
        assert!(err.is_not_modified());
    }

    #[tokio::test]
    async fn test_edit_unknown_message() {
        let presenter = MemoryPresenter::new();
        let err = presenter.edit_message("chat1", "m404", "x").await.unwrap_err();
        assert!(!err.is_not_modified());
    }

    #[tokio::test]
    async fn test_failing_presenter() {
        let presenter = MemoryPresenter::new();
        presenter.set_failing(true);
        assert!(presenter.send_message("chat1", "x").await.is_err());
        presenter.set_failing(false);
        assert!(presenter.send_message("chat1", "x").await.is_ok());
    }

    #[tokio::test]
    async fn test_typing_count() {
        let presenter = MemoryPresenter::new();
        presenter.send_typing("a").await.unwrap();
        presenter.send_typing("a").await.unwrap();
        presenter.send_typing("b").await.unwrap();
        assert_eq!(presenter.typing_count("a").await, 2);
        assert_eq!(presenter.typing_count("b").await, 1);
    }
}
