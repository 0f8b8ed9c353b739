//! # a3s-bridge
//!
//! Event-driven bridge between chat channels and remote agent sessions for
//! the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-bridge` connects a chat platform to a long-running AI agent service
//! that pushes server-sent events. It consumes the event stream, coalesces
//! user input per conversation, keeps one request in flight per
//! conversation, renders streaming output into size-bounded HTML messages,
//! and maps long request ids to compact callback handles for permission and
//! question prompts.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use a3s_bridge::{Bridge, BridgeConfig, HttpConfig, HttpProvider, MemoryPresenter};
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_bridge::Result<()> {
//! let provider = Arc::new(HttpProvider::new(HttpConfig::new("http://127.0.0.1:4096"))?);
//! let presenter = Arc::new(MemoryPresenter::new());
//!
//! let bridge = Bridge::from_provider(BridgeConfig::default(), provider, presenter)?;
//! bridge.start().await?;
//!
//! bridge.handle_input("chat-42", "Summarize the open pull requests").await?;
//! # bridge.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Providers
//!
//! - **http**: OpenCode-style HTTP API with an SSE event stream
//! - **memory**: In-memory scripted provider for testing and embedding
//!
//! ## Architecture
//!
//! - **StreamConsumer**: reconnecting SSE consumer publishing typed events
//! - **SessionCoordinator**: per-conversation debounce and single-flight state machine
//! - **StreamingRenderer**: rate-limited message edits for partial output
//! - **HandleRegistry**: expiring short keys for callback payloads
//! - **format**: Markdown to HTML conversion and balanced splitting
//! - **Presenter** / **AgentProvider** / **EventSource**: collaborator traits

pub mod bridge;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod error;
pub mod format;
pub mod provider;
pub mod registry;
pub mod renderer;
pub mod state;
pub mod types;

// Re-export core types
pub use bridge::Bridge;
pub use channel::{MemoryPresenter, PresentedOp, Presenter};
pub use config::BridgeConfig;
pub use consumer::{Backoff, ConsumerStats, StreamConsumer};
pub use coordinator::{CallbackData, CallbackOutcome, SessionCoordinator, BUSY_NOTICE};
pub use error::{BridgeError, Result};
pub use format::{convert_markup, escape_html, split_content, ContentFormatter};
pub use provider::{AgentProvider, ByteStream, EventSource};
pub use registry::HandleRegistry;
pub use renderer::StreamingRenderer;
pub use state::ConversationStore;
pub use types::{
    ConversationState, ConversationStatus, Event, EventKind, EventPayload, InteractionAnswer,
    PermissionReply, ReplyOption,
};

// Re-export providers for convenience
pub use provider::http::{HttpClient, HttpConfig, HttpProvider};
pub use provider::memory::MemoryProvider;
