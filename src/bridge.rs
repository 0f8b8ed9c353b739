//! High-level bridge built on pluggable collaborators
//!
//! `Bridge` wires the stream consumer, coordinator, renderer and registry
//! together and owns their background tasks.

use crate::channel::Presenter;
use crate::config::BridgeConfig;
use crate::consumer::{ConsumerStats, StreamConsumer};
use crate::coordinator::{CallbackOutcome, SessionCoordinator};
use crate::error::{BridgeError, Result};
use crate::provider::{AgentProvider, EventSource};
use crate::registry::HandleRegistry;
use crate::renderer::StreamingRenderer;
use crate::state::ConversationStore;
use crate::types::ConversationState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Chat-to-agent bridge
///
/// Construct with the agent, its event source and the channel presenter,
/// then `start()`. Feed user input and option callbacks in; output reaches
/// the channel through the presenter.
pub struct Bridge {
    config: BridgeConfig,
    consumer: Arc<StreamConsumer>,
    coordinator: Arc<SessionCoordinator>,
    registry: Arc<HandleRegistry>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Bridge {
    /// Create a bridge; nothing runs until `start()`
    pub fn new(
        config: BridgeConfig,
        agent: Arc<dyn AgentProvider>,
        source: Arc<dyn EventSource>,
        presenter: Arc<dyn Presenter>,
    ) -> Result<Self> {
        config.validate()?;

        let consumer = Arc::new(StreamConsumer::new(source, &config));
        let renderer = Arc::new(StreamingRenderer::new(presenter.clone(), &config));
        let registry = Arc::new(HandleRegistry::new(
            config.handle_ttl(),
            config.max_callback_bytes,
        ));
        let coordinator = Arc::new(SessionCoordinator::new(
            agent,
            presenter,
            renderer,
            registry.clone(),
            Arc::new(ConversationStore::new()),
            config.clone(),
        ));

        Ok(Self {
            config,
            consumer,
            coordinator,
            registry,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Create a bridge from a provider serving both requests and events
    pub fn from_provider<P>(
        config: BridgeConfig,
        provider: Arc<P>,
        presenter: Arc<dyn Presenter>,
    ) -> Result<Self>
    where
        P: AgentProvider + EventSource + 'static,
    {
        Self::new(config, provider.clone(), provider, presenter)
    }

    /// Connect the event stream and start the background tasks
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::Config("bridge already started".to_string()));
        }

        self.consumer.connect(&self.cancel).await?;
        let events = self
            .consumer
            .events()
            .await
            .ok_or_else(|| BridgeError::Closed("event channel already taken".to_string()))?;

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(
            self.coordinator.clone().run(events, self.cancel.child_token()),
        ));
        tasks.push(
            self.coordinator
                .spawn_sweeper(self.config.sweep_interval(), self.cancel.child_token()),
        );

        tracing::info!("Bridge started");
        Ok(())
    }

    /// Forward user input for a conversation
    pub async fn handle_input(&self, conversation_id: &str, text: &str) -> Result<()> {
        self.coordinator.handle_input(conversation_id, text).await
    }

    /// Forward a reply option callback payload
    pub async fn handle_callback(&self, data: &str) -> Result<CallbackOutcome> {
        self.coordinator.handle_callback(data).await
    }

    pub async fn abort(&self, conversation_id: &str) -> Result<()> {
        self.coordinator.abort(conversation_id).await
    }

    pub async fn conversation(&self, conversation_id: &str) -> Option<ConversationState> {
        self.coordinator.conversation(conversation_id).await
    }

    pub fn coordinator(&self) -> &Arc<SessionCoordinator> {
        &self.coordinator
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> ConsumerStats {
        self.consumer.stats()
    }

    /// Cancel every background task and wait for them to finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.consumer.close().await;
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("Bridge stopped");
    }
}
