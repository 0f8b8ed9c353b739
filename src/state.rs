//! Conversation state
//!
//! `ConversationStore` holds every per-conversation map the coordinator
//! needs: status and session binding, pending debounce buffers, open
//! interactive requests and recent completion signals. It is injected into
//! the coordinator rather than living in globals.

use crate::types::{ConversationState, ConversationStatus, Question};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Coordinator bookkeeping for one conversation
#[derive(Debug)]
pub struct ConversationEntry {
    pub state: ConversationState,
    /// Remote session bound to this conversation
    pub session_id: Option<String>,
    /// Cancels the typing heartbeat while Busy
    pub heartbeat: Option<CancellationToken>,
    /// Last assistant message seen in the current turn
    pub last_message_id: Option<String>,
    /// Assistant message of the last completed turn
    pub completed_message_id: Option<String>,
    /// Dispatch counter, used to key completions without a message id
    pub turn: u64,
    /// Short key of a question waiting for a typed answer
    pub awaiting_custom: Option<String>,
}

impl ConversationEntry {
    pub fn new(conversation_id: &str) -> Self {
        Self {
            state: ConversationState::new(conversation_id),
            session_id: None,
            heartbeat: None,
            last_message_id: None,
            completed_message_id: None,
            turn: 0,
            awaiting_custom: None,
        }
    }

    pub fn status(&self) -> ConversationStatus {
        self.state.status
    }

    /// Change status, cancelling the heartbeat when leaving Busy
    pub fn set_status(&mut self, status: ConversationStatus) {
        if status != ConversationStatus::Busy {
            if let Some(token) = self.heartbeat.take() {
                token.cancel();
            }
        }
        self.state.status = status;
        self.state.last_activity = chrono::Utc::now();
    }
}

/// Input being coalesced before dispatch
#[derive(Debug)]
pub struct DebounceBuffer {
    pub conversation_id: String,
    pub pending_texts: Vec<String>,
    pub last_received_at: Instant,
    /// Pending flush; aborted when more input arrives
    pub timer: Option<JoinHandle<()>>,
}

impl DebounceBuffer {
    pub fn new(conversation_id: &str, text: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            pending_texts: vec![text.to_string()],
            last_received_at: Instant::now(),
            timer: None,
        }
    }
}

/// Progress of an interactive request
#[derive(Debug, Clone, PartialEq)]
pub enum InteractionKind {
    Permission {
        permission: String,
        patterns: Vec<String>,
    },
    Question {
        questions: Vec<Question>,
        /// Index of the question being shown
        current: usize,
        /// Toggled option indexes of a multi-select question
        selected: Vec<usize>,
        /// Answers to the questions before `current`
        answers: Vec<Vec<String>>,
    },
}

/// An open permission or question request
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionState {
    pub request_id: String,
    pub conversation_id: String,
    /// Channel message showing the prompt
    pub message_id: Option<String>,
    pub kind: InteractionKind,
}

/// Per-conversation state shared by the coordinator's tasks
#[derive(Default)]
pub struct ConversationStore {
    conversations: Mutex<HashMap<String, ConversationEntry>>,
    debounce: DashMap<String, Arc<Mutex<DebounceBuffer>>>,
    /// session id → conversation id
    sessions: DashMap<String, String>,
    /// short key → interaction
    interactions: DashMap<String, InteractionState>,
    /// dedup key → when the completion was first seen
    completions: Mutex<HashMap<String, Instant>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the coordinator-wide lock over all conversation entries
    pub async fn lock(&self) -> MutexGuard<'_, HashMap<String, ConversationEntry>> {
        self.conversations.lock().await
    }

    pub async fn snapshot(&self, conversation_id: &str) -> Option<ConversationState> {
        self.conversations
            .lock()
            .await
            .get(conversation_id)
            .map(|entry| entry.state.clone())
    }

    /// Bind a remote session, replacing any previous binding
    pub async fn bind_session(&self, conversation_id: &str, session_id: &str) {
        let mut conversations = self.conversations.lock().await;
        let entry = conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationEntry::new(conversation_id));
        if let Some(old) = entry.session_id.replace(session_id.to_string()) {
            self.sessions.remove(&old);
        }
        self.sessions
            .insert(session_id.to_string(), conversation_id.to_string());
    }

    /// Record a session created for a conversation, unless one won the race
    ///
    /// Must be called with the lock held; returns the session now bound.
    pub fn bind_if_absent(
        &self,
        conversations: &mut HashMap<String, ConversationEntry>,
        conversation_id: &str,
        session_id: &str,
    ) -> String {
        let entry = conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationEntry::new(conversation_id));
        match &entry.session_id {
            Some(existing) => existing.clone(),
            None => {
                entry.session_id = Some(session_id.to_string());
                self.sessions
                    .insert(session_id.to_string(), conversation_id.to_string());
                session_id.to_string()
            }
        }
    }

    pub fn conversation_for_session(&self, session_id: &str) -> Option<String> {
        self.sessions.get(session_id).map(|c| c.value().clone())
    }

    pub fn debounce_buffer(&self, conversation_id: &str) -> Option<Arc<Mutex<DebounceBuffer>>> {
        self.debounce.get(conversation_id).map(|b| b.value().clone())
    }

    pub fn insert_debounce(&self, buffer: DebounceBuffer) {
        self.debounce
            .insert(buffer.conversation_id.clone(), Arc::new(Mutex::new(buffer)));
    }

    pub fn take_debounce(&self, conversation_id: &str) -> Option<Arc<Mutex<DebounceBuffer>>> {
        self.debounce.remove(conversation_id).map(|(_, b)| b)
    }

    pub fn insert_interaction(&self, short_key: &str, state: InteractionState) {
        self.interactions.insert(short_key.to_string(), state);
    }

    pub fn interaction(&self, short_key: &str) -> Option<InteractionState> {
        self.interactions.get(short_key).map(|s| s.value().clone())
    }

    pub fn has_interaction(&self, short_key: &str) -> bool {
        self.interactions.contains_key(short_key)
    }

    pub fn remove_interaction(&self, short_key: &str) -> Option<InteractionState> {
        self.interactions.remove(short_key).map(|(_, s)| s)
    }

    /// Drop interactions whose handles expired, along with any typed-answer
    /// wait pointing at them; returns how many were dropped
    pub async fn forget_interactions(&self, short_keys: &[String]) -> usize {
        let mut conversations = self.conversations.lock().await;
        let mut dropped = 0;
        for key in short_keys {
            let Some((_, state)) = self.interactions.remove(key) else {
                continue;
            };
            dropped += 1;
            if let Some(entry) = conversations.get_mut(&state.conversation_id) {
                if entry.awaiting_custom.as_deref() == Some(key.as_str()) {
                    entry.awaiting_custom = None;
                }
            }
        }
        dropped
    }

    /// Short keys of the open interactions of a conversation
    pub fn interactions_for(&self, conversation_id: &str) -> Vec<String> {
        self.interactions
            .iter()
            .filter(|s| s.value().conversation_id == conversation_id)
            .map(|s| s.key().clone())
            .collect()
    }

    /// Note a completion signal; false if the same key was seen within `window`
    pub async fn record_completion(&self, key: &str, window: Duration) -> bool {
        let now = Instant::now();
        let mut completions = self.completions.lock().await;
        completions.retain(|_, seen| now.duration_since(*seen) < window);
        if completions.contains_key(key) {
            return false;
        }
        completions.insert(key.to_string(), now);
        true
    }
}
