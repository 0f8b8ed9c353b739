//! Session coordinator
//!
//! Owns the per-conversation state machine:
//!
//! ```text
//! Idle --input--> Collecting --timer, not Busy--> Busy --completion--> Idle
//!                                                 Busy --error--> Error --input--> Collecting
//! ```
//!
//! Input is coalesced in a debounce buffer, dispatched single-flight to the
//! agent, and the agent's events are routed back to the conversation through
//! an explicit dispatch table.

mod interaction;

pub use interaction::{CallbackData, CallbackOutcome};

use crate::channel::Presenter;
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::format::escape_html;
use crate::provider::AgentProvider;
use crate::registry::HandleRegistry;
use crate::renderer::StreamingRenderer;
use crate::state::{ConversationEntry, ConversationStore, DebounceBuffer};
use crate::types::{ConversationState, ConversationStatus, Event, EventKind, EventPayload};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Reply sent when input arrives while a request is in flight
pub const BUSY_NOTICE: &str = "⏳ Still working on your previous message. Please wait.";

/// Handler for one event kind
pub type EventHandler =
    for<'a> fn(&'a SessionCoordinator, &'a str, &'a Event) -> BoxFuture<'a, Result<()>>;

/// Coordinates conversations, the agent and the channel
pub struct SessionCoordinator {
    agent: Arc<dyn AgentProvider>,
    presenter: Arc<dyn Presenter>,
    renderer: Arc<StreamingRenderer>,
    registry: Arc<HandleRegistry>,
    store: Arc<ConversationStore>,
    config: BridgeConfig,
    handlers: HashMap<EventKind, EventHandler>,
}

impl SessionCoordinator {
    pub fn new(
        agent: Arc<dyn AgentProvider>,
        presenter: Arc<dyn Presenter>,
        renderer: Arc<StreamingRenderer>,
        registry: Arc<HandleRegistry>,
        store: Arc<ConversationStore>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            agent,
            presenter,
            renderer,
            registry,
            store,
            config,
            handlers: Self::dispatch_table(),
        }
    }

    fn dispatch_table() -> HashMap<EventKind, EventHandler> {
        let mut handlers: HashMap<EventKind, EventHandler> = HashMap::new();
        handlers.insert(EventKind::Idle, on_completion);
        handlers.insert(EventKind::MessageComplete, on_completion);
        handlers.insert(EventKind::Error, on_error);
        handlers.insert(EventKind::Delta, on_delta);
        handlers.insert(EventKind::PermissionRequested, on_permission);
        handlers.insert(EventKind::QuestionRequested, on_question);
        handlers
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    pub fn renderer(&self) -> &Arc<StreamingRenderer> {
        &self.renderer
    }

    /// Snapshot of a conversation's state
    pub async fn conversation(&self, conversation_id: &str) -> Option<ConversationState> {
        self.store.snapshot(conversation_id).await
    }

    /// Attach an existing remote session to a conversation
    pub async fn bind_session(&self, conversation_id: &str, session_id: &str) {
        self.store.bind_session(conversation_id, session_id).await;
        tracing::info!(conversation_id, session_id, "Session bound");
    }

    /// Accept user input for a conversation
    ///
    /// Input arriving within the debounce window of the previous one is
    /// coalesced; input arriving while a request is in flight gets a notice
    /// and is otherwise dropped.
    pub async fn handle_input(self: &Arc<Self>, conversation_id: &str, text: &str) -> Result<()> {
        if let Some(short_key) = self.take_awaiting_custom(conversation_id).await {
            if self.store.has_interaction(&short_key) {
                let outcome = self.answer_custom(&short_key, text).await?;
                if outcome == CallbackOutcome::Expired {
                    if let Some(notice) = outcome.notice() {
                        self.surface(conversation_id, notice).await;
                    }
                }
                return Ok(());
            }
        }

        self.ensure_session(conversation_id).await?;

        let mut conversations = self.store.lock().await;
        let entry = conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationEntry::new(conversation_id));
        entry.state.last_activity = chrono::Utc::now();

        if let Some(buffer) = self.store.debounce_buffer(conversation_id) {
            let mut buf = buffer.lock().await;
            buf.pending_texts.push(text.to_string());
            buf.last_received_at = Instant::now();
            if let Some(timer) = buf.timer.take() {
                timer.abort();
            }
            buf.timer = Some(self.schedule_flush(conversation_id));
            tracing::debug!(
                conversation_id,
                pending = buf.pending_texts.len(),
                "Input coalesced"
            );
            return Ok(());
        }

        if entry.status() == ConversationStatus::Busy {
            drop(conversations);
            tracing::debug!(conversation_id, "Input rejected while busy");
            self.presenter
                .send_message(conversation_id, BUSY_NOTICE)
                .await?;
            return Ok(());
        }

        let mut buffer = DebounceBuffer::new(conversation_id, text);
        buffer.timer = Some(self.schedule_flush(conversation_id));
        self.store.insert_debounce(buffer);
        tracing::debug!(conversation_id, "Collecting input");
        Ok(())
    }

    async fn take_awaiting_custom(&self, conversation_id: &str) -> Option<String> {
        self.store
            .lock()
            .await
            .get_mut(conversation_id)
            .and_then(|entry| entry.awaiting_custom.take())
    }

    async fn ensure_session(&self, conversation_id: &str) -> Result<String> {
        let existing = self
            .store
            .lock()
            .await
            .get(conversation_id)
            .and_then(|entry| entry.session_id.clone());
        if let Some(session_id) = existing {
            return Ok(session_id);
        }

        let created = match self.agent.create_session(Some(conversation_id)).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "Failed to create session");
                self.surface(conversation_id, &format!("Failed to start a session: {}", e))
                    .await;
                return Err(e);
            }
        };

        let mut conversations = self.store.lock().await;
        let session_id = self
            .store
            .bind_if_absent(&mut conversations, conversation_id, &created);
        tracing::info!(conversation_id, session_id = %session_id, "Session created");
        Ok(session_id)
    }

    fn schedule_flush(self: &Arc<Self>, conversation_id: &str) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let conversation_id = conversation_id.to_string();
        let deadline = Instant::now() + self.config.debounce();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            coordinator.flush_buffer(&conversation_id).await;
        })
    }

    /// Dispatch the coalesced input of a conversation
    ///
    /// Called when the debounce timer fires. Input is dropped if a request
    /// became in flight in the meantime.
    pub async fn flush_buffer(self: &Arc<Self>, conversation_id: &str) {
        let (text, session_id, heartbeat) = {
            let mut conversations = self.store.lock().await;
            let Some(buffer) = self.store.take_debounce(conversation_id) else {
                return;
            };
            let texts = std::mem::take(&mut buffer.lock().await.pending_texts);
            if texts.is_empty() {
                return;
            }

            let entry = conversations
                .entry(conversation_id.to_string())
                .or_insert_with(|| ConversationEntry::new(conversation_id));
            if entry.status() == ConversationStatus::Busy {
                tracing::debug!(conversation_id, "Dropping input, request already in flight");
                return;
            }
            let Some(session_id) = entry.session_id.clone() else {
                tracing::warn!(conversation_id, "No session bound, dropping input");
                return;
            };

            entry.set_status(ConversationStatus::Busy);
            entry.turn += 1;
            entry.last_message_id = None;
            // Leftover output from an earlier turn must not prefix this one
            self.renderer.discard(conversation_id);
            let heartbeat = CancellationToken::new();
            entry.heartbeat = Some(heartbeat.clone());

            (texts.join("\n"), session_id, heartbeat)
        };

        self.spawn_heartbeat(conversation_id, heartbeat);

        let coordinator = Arc::clone(self);
        let conversation_id = conversation_id.to_string();
        tokio::spawn(async move {
            tracing::info!(
                conversation_id = %conversation_id,
                session_id = %session_id,
                bytes = text.len(),
                "Dispatching request"
            );
            if let Err(e) = coordinator.agent.send_request(&session_id, &text).await {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Dispatch failed");
                coordinator.fail(&conversation_id, &e.to_string()).await;
            }
        });
    }

    fn spawn_heartbeat(&self, conversation_id: &str, cancel: CancellationToken) {
        let presenter = self.presenter.clone();
        let interval = self.config.heartbeat();
        let conversation_id = conversation_id.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = presenter.send_typing(&conversation_id).await {
                            tracing::debug!(conversation_id = %conversation_id, error = %e, "Typing indicator failed");
                        }
                    }
                }
            }
        });
    }

    /// Move a conversation to Error, surfacing the message on the transition
    async fn fail(&self, conversation_id: &str, message: &str) {
        let entered = {
            let mut conversations = self.store.lock().await;
            let entry = conversations
                .entry(conversation_id.to_string())
                .or_insert_with(|| ConversationEntry::new(conversation_id));
            let entered = entry.status() != ConversationStatus::Error;
            entry.set_status(ConversationStatus::Error);
            entered
        };
        self.renderer.discard(conversation_id);
        if entered {
            self.surface(conversation_id, &format!("⚠️ {}", message)).await;
        }
    }

    /// Best-effort user-visible notice
    async fn surface(&self, conversation_id: &str, text: &str) {
        if let Err(e) = self
            .presenter
            .send_message(conversation_id, &escape_html(text))
            .await
        {
            tracing::warn!(conversation_id, error = %e, "Failed to deliver notice");
        }
    }

    /// Stop whatever the conversation is doing
    pub async fn abort(&self, conversation_id: &str) -> Result<()> {
        let session_id = {
            let mut conversations = self.store.lock().await;
            if let Some(buffer) = self.store.take_debounce(conversation_id) {
                if let Some(timer) = buffer.lock().await.timer.take() {
                    timer.abort();
                }
            }
            conversations
                .get(conversation_id)
                .and_then(|entry| entry.session_id.clone())
        };

        if let Some(session_id) = &session_id {
            self.agent.abort(session_id).await?;
        }
        self.renderer.discard(conversation_id);

        if let Some(entry) = self.store.lock().await.get_mut(conversation_id) {
            entry.set_status(ConversationStatus::Idle);
        }
        tracing::info!(conversation_id, "Conversation aborted");
        Ok(())
    }

    /// Route one event to its conversation
    pub async fn handle_event(&self, event: &Event) -> Result<()> {
        let Some(session_id) = event.session_id() else {
            tracing::debug!(kind = ?event.kind, "Ignoring event without session");
            return Ok(());
        };
        let Some(conversation_id) = self.store.conversation_for_session(session_id) else {
            tracing::debug!(kind = ?event.kind, session_id, "Ignoring event for unknown session");
            return Ok(());
        };

        match self.handlers.get(&event.kind) {
            Some(handler) => handler(self, &conversation_id, event).await,
            None => {
                tracing::debug!(kind = ?event.kind, conversation_id = %conversation_id, "Event ignored");
                Ok(())
            }
        }
    }

    /// Consume events until the channel closes or `cancel` fires
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<Event>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            if let Err(e) = self.handle_event(&event).await {
                tracing::warn!(kind = ?event.kind, error = %e, "Event handling failed");
            }
        }
        tracing::debug!("Coordinator event loop exited");
    }

    async fn handle_completion(&self, conversation_id: &str, event: &Event) -> Result<()> {
        let (message_id, final_text) = match &event.payload {
            EventPayload::MessageComplete(m) => (Some(m.message_id.clone()), m.text.clone()),
            _ => (None, None),
        };

        let dedup_key = {
            let mut conversations = self.store.lock().await;
            let entry = conversations
                .entry(conversation_id.to_string())
                .or_insert_with(|| ConversationEntry::new(conversation_id));
            if message_id.is_some() {
                entry.last_message_id = message_id.clone();
            }
            match &entry.last_message_id {
                Some(id) => format!("{}:{}", conversation_id, id),
                None => format!("{}:turn-{}", conversation_id, entry.turn),
            }
        };

        if !self
            .store
            .record_completion(&dedup_key, self.config.dedup_window())
            .await
        {
            tracing::debug!(conversation_id, key = %dedup_key, "Duplicate completion suppressed");
            return Ok(());
        }

        if let Some(entry) = self.store.lock().await.get_mut(conversation_id) {
            entry.set_status(ConversationStatus::Idle);
            if message_id.is_some() {
                entry.completed_message_id = message_id.clone();
            }
        }
        tracing::info!(conversation_id, "Turn complete");
        self.renderer
            .on_complete(conversation_id, final_text.as_deref())
            .await
    }

    async fn handle_error(&self, conversation_id: &str, event: &Event) -> Result<()> {
        let message = match &event.payload {
            EventPayload::Error(e) => e.message.as_str(),
            _ => "unknown error",
        };
        tracing::warn!(conversation_id, error = %message, "Agent reported an error");
        self.fail(conversation_id, message).await;
        Ok(())
    }

    async fn handle_delta(&self, conversation_id: &str, event: &Event) -> Result<()> {
        let EventPayload::Delta(delta) = &event.payload else {
            return Ok(());
        };
        {
            let mut conversations = self.store.lock().await;
            let Some(entry) = conversations.get_mut(conversation_id) else {
                return Ok(());
            };
            if entry.status() != ConversationStatus::Busy
                || entry.completed_message_id.as_deref() == Some(delta.message_id.as_str())
            {
                tracing::debug!(
                    conversation_id,
                    message_id = %delta.message_id,
                    "Ignoring delta outside an active response"
                );
                return Ok(());
            }
            entry.last_message_id = Some(delta.message_id.clone());
        }
        self.renderer.on_delta(conversation_id, &delta.delta).await
    }
}

fn on_completion<'a>(
    coordinator: &'a SessionCoordinator,
    conversation_id: &'a str,
    event: &'a Event,
) -> BoxFuture<'a, Result<()>> {
    coordinator.handle_completion(conversation_id, event).boxed()
}

fn on_error<'a>(
    coordinator: &'a SessionCoordinator,
    conversation_id: &'a str,
    event: &'a Event,
) -> BoxFuture<'a, Result<()>> {
    coordinator.handle_error(conversation_id, event).boxed()
}

fn on_delta<'a>(
    coordinator: &'a SessionCoordinator,
    conversation_id: &'a str,
    event: &'a Event,
) -> BoxFuture<'a, Result<()>> {
    coordinator.handle_delta(conversation_id, event).boxed()
}

fn on_permission<'a>(
    coordinator: &'a SessionCoordinator,
    conversation_id: &'a str,
    event: &'a Event,
) -> BoxFuture<'a, Result<()>> {
    coordinator.present_permission(conversation_id, event).boxed()
}

fn on_question<'a>(
    coordinator: &'a SessionCoordinator,
    conversation_id: &'a str,
    event: &'a Event,
) -> BoxFuture<'a, Result<()>> {
    coordinator.present_question(conversation_id, event).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryPresenter;
    use crate::provider::memory::MemoryProvider;
    use crate::types::{DeltaEvent, ErrorEvent, IdleEvent, MessageCompleteEvent};
    use std::time::Duration;

    struct Harness {
        agent: Arc<MemoryProvider>,
        presenter: Arc<MemoryPresenter>,
        coordinator: Arc<SessionCoordinator>,
    }

    fn harness() -> Harness {
        let config = BridgeConfig {
            debounce_ms: 100,
            ..Default::default()
        };
        let agent = Arc::new(MemoryProvider::new());
        let presenter = Arc::new(MemoryPresenter::new());
        let renderer = Arc::new(StreamingRenderer::new(presenter.clone(), &config));
        let registry = Arc::new(HandleRegistry::new(config.handle_ttl(), config.max_callback_bytes));
        let coordinator = Arc::new(SessionCoordinator::new(
            agent.clone(),
            presenter.clone(),
            renderer,
            registry,
            Arc::new(ConversationStore::new()),
            config,
        ));
        Harness {
            agent,
            presenter,
            coordinator,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn session_of(h: &Harness) -> String {
        h.agent.sessions().await[0].clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_inputs_within_window_coalesce() {
        let h = harness();
        h.coordinator.handle_input("chat1", "hello").await.unwrap();
        tokio::time::advance(Duration::from_millis(50)).await;
        h.coordinator.handle_input("chat1", "world").await.unwrap();

        tokio::time::advance(Duration::from_millis(60)).await;
        settle().await;
        assert!(h.agent.requests().await.is_empty());

        tokio::time::advance(Duration::from_millis(50)).await;
        settle().await;
        let requests = h.agent.requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1, "hello\nworld");

        let state = h.coordinator.conversation("chat1").await.unwrap();
        assert_eq!(state.status, ConversationStatus::Busy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_input_gets_notice() {
        let h = harness();
        h.coordinator.handle_input("chat1", "first").await.unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;

        h.coordinator.handle_input("chat1", "second").await.unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;

        assert_eq!(h.agent.requests().await.len(), 1);
        assert_eq!(h.presenter.sent_texts("chat1").await, vec![BUSY_NOTICE]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_returns_to_idle_once() {
        let h = harness();
        h.coordinator.handle_input("chat1", "hi").await.unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;
        let session = session_of(&h).await;

        let delta = Event::new(EventPayload::Delta(DeltaEvent {
            session_id: session.clone(),
            message_id: "msg_1".to_string(),
            delta: "Hello".to_string(),
        }));
        h.coordinator.handle_event(&delta).await.unwrap();

        let complete = Event::new(EventPayload::MessageComplete(MessageCompleteEvent {
            session_id: session.clone(),
            message_id: "msg_1".to_string(),
            text: Some("Hello there".to_string()),
        }));
        let idle = Event::new(EventPayload::Idle(IdleEvent {
            session_id: session.clone(),
        }));
        h.coordinator.handle_event(&complete).await.unwrap();
        h.coordinator.handle_event(&idle).await.unwrap();

        let state = h.coordinator.conversation("chat1").await.unwrap();
        assert_eq!(state.status, ConversationStatus::Idle);
        assert_eq!(h.presenter.sent_texts("chat1").await, vec!["Hello"]);
        assert_eq!(
            h.presenter.message_text("m1").await.as_deref(),
            Some("Hello there")
        );
    }

    fn delta_event(session: &str, message_id: &str, text: &str) -> Event {
        Event::new(EventPayload::Delta(DeltaEvent {
            session_id: session.to_string(),
            message_id: message_id.to_string(),
            delta: text.to_string(),
        }))
    }

    fn complete_event(session: &str, message_id: &str) -> Event {
        Event::new(EventPayload::MessageComplete(MessageCompleteEvent {
            session_id: session.to_string(),
            message_id: message_id.to_string(),
            text: None,
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivered_delta_does_not_leak_into_next_turn() {
        let h = harness();
        h.coordinator.handle_input("chat1", "q1").await.unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;
        let session = session_of(&h).await;

        let first = delta_event(&session, "msg_1", "Answer one.");
        h.coordinator.handle_event(&first).await.unwrap();
        h.coordinator
            .handle_event(&complete_event(&session, "msg_1"))
            .await
            .unwrap();

        // Redelivered after completion
        h.coordinator.handle_event(&first).await.unwrap();
        assert!(!h.coordinator.renderer().is_streaming("chat1"));
        assert_eq!(h.presenter.sent_texts("chat1").await, vec!["Answer one."]);

        h.coordinator.handle_input("chat1", "q2").await.unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;
        assert_eq!(h.agent.requests().await.len(), 2);

        // Turn 1 delta arriving again while turn 2 is in flight
        h.coordinator.handle_event(&first).await.unwrap();
        h.coordinator
            .handle_event(&delta_event(&session, "msg_2", "Answer two."))
            .await
            .unwrap();
        h.coordinator
            .handle_event(&complete_event(&session, "msg_2"))
            .await
            .unwrap();

        assert_eq!(
            h.presenter.sent_texts("chat1").await,
            vec!["Answer one.", "Answer two."]
        );
        assert_eq!(
            h.presenter.message_text("m2").await.as_deref(),
            Some("Answer two.")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delta_after_abort_is_ignored() {
        let h = harness();
        h.coordinator.handle_input("chat1", "hi").await.unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;
        let session = session_of(&h).await;

        h.coordinator.abort("chat1").await.unwrap();
        h.coordinator
            .handle_event(&delta_event(&session, "msg_1", "too late"))
            .await
            .unwrap();

        assert!(h.presenter.sent_texts("chat1").await.is_empty());
        assert!(!h.coordinator.renderer().is_streaming("chat1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_surfaced_once() {
        let h = harness();
        h.coordinator.handle_input("chat1", "hi").await.unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;
        let session = session_of(&h).await;

        let error = Event::new(EventPayload::Error(ErrorEvent {
            session_id: Some(session),
            message: "model overloaded".to_string(),
        }));
        h.coordinator.handle_event(&error).await.unwrap();
        h.coordinator.handle_event(&error).await.unwrap();

        let sent = h.presenter.sent_texts("chat1").await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("model overloaded"));
        let state = h.coordinator.conversation("chat1").await.unwrap();
        assert_eq!(state.status, ConversationStatus::Error);

        // Error → Collecting → dispatch
        h.coordinator.handle_input("chat1", "retry").await.unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;
        assert_eq!(h.agent.requests().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_failure_moves_to_error() {
        let h = harness();
        h.coordinator.handle_input("chat1", "hi").await.unwrap();
        h.agent.set_failing_requests(true);
        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;

        let state = h.coordinator.conversation("chat1").await.unwrap();
        assert_eq!(state.status, ConversationStatus::Error);
        assert_eq!(h.presenter.sent_texts("chat1").await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_creation_failure() {
        let h = harness();
        h.agent.set_failing_requests(true);
        assert!(h.coordinator.handle_input("chat1", "hi").await.is_err());
        assert_eq!(h.presenter.sent_texts("chat1").await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_while_busy() {
        let h = harness();
        h.coordinator.handle_input("chat1", "hi").await.unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;
        tokio::time::advance(Duration::from_secs(9)).await;
        settle().await;
        let typing = h.presenter.typing_count("chat1").await;
        assert!(typing >= 2, "expected heartbeats, got {}", typing);

        let session = session_of(&h).await;
        h.coordinator
            .handle_event(&Event::new(EventPayload::Idle(IdleEvent { session_id: session })))
            .await
            .unwrap();
        settle().await;
        tokio::time::advance(Duration::from_secs(20)).await;
        settle().await;
        assert_eq!(h.presenter.typing_count("chat1").await, typing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort() {
        let h = harness();
        h.coordinator.handle_input("chat1", "hi").await.unwrap();
        h.coordinator.abort("chat1").await.unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;

        assert!(h.agent.requests().await.is_empty());
        assert_eq!(h.agent.aborts().await.len(), 1);
        let state = h.coordinator.conversation("chat1").await.unwrap();
        assert_eq!(state.status, ConversationStatus::Idle);
    }

    #[tokio::test]
    async fn test_events_for_unknown_sessions_ignored() {
        let h = harness();
        let idle = Event::new(EventPayload::Idle(IdleEvent {
            session_id: "ses_other".to_string(),
        }));
        h.coordinator.handle_event(&idle).await.unwrap();
        assert!(h.presenter.ops().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bound_session_is_reused() {
        let h = harness();
        h.coordinator.bind_session("chat1", "ses_saved").await;
        h.coordinator.handle_input("chat1", "hi").await.unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;
        settle().await;

        assert!(h.agent.sessions().await.is_empty());
        assert_eq!(h.agent.requests().await[0].0, "ses_saved");
    }
}
