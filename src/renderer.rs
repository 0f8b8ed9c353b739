//! Streaming renderer
//!
//! Accumulates partial assistant output per conversation and keeps one
//! channel message up to date with it, rate limited by the flush interval.
//! On completion the final text is rendered in full, overflowing into
//! additional messages when it exceeds the channel limit.

use crate::channel::Presenter;
use crate::config::BridgeConfig;
use crate::error::Result;
use crate::format::ContentFormatter;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Output of one in-progress response
#[derive(Debug, Clone)]
pub struct StreamBuffer {
    pub conversation_id: String,
    pub accumulated: String,
    pub last_flush_at: Option<Instant>,
    /// Channel message being edited in place
    pub target: Option<String>,
    last_rendered: String,
}

impl StreamBuffer {
    fn new(conversation_id: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            accumulated: String::new(),
            last_flush_at: None,
            target: None,
            last_rendered: String::new(),
        }
    }
}

/// Renders streaming output into edited channel messages
pub struct StreamingRenderer {
    presenter: Arc<dyn Presenter>,
    buffers: DashMap<String, Arc<Mutex<StreamBuffer>>>,
    flush_interval: Duration,
    formatter: ContentFormatter,
}

impl StreamingRenderer {
    pub fn new(presenter: Arc<dyn Presenter>, config: &BridgeConfig) -> Self {
        Self {
            presenter,
            buffers: DashMap::new(),
            flush_interval: config.flush_interval(),
            formatter: ContentFormatter::new(config.max_message_bytes),
        }
    }

    fn buffer(&self, conversation_id: &str) -> Arc<Mutex<StreamBuffer>> {
        self.buffers
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(StreamBuffer::new(conversation_id))))
            .clone()
    }

    /// Append a delta, flushing to the channel when due
    ///
    /// A flush is due on the first delta, once the flush interval has passed
    /// since the previous one, or when the text ends a paragraph.
    pub async fn on_delta(&self, conversation_id: &str, delta: &str) -> Result<()> {
        let buffer = self.buffer(conversation_id);
        let mut buf = buffer.lock().await;
        buf.accumulated.push_str(delta);

        let now = Instant::now();
        let due = buf
            .last_flush_at
            .map_or(true, |at| now.duration_since(at) >= self.flush_interval)
            || buf.accumulated.ends_with("\n\n");
        if !due {
            return Ok(());
        }

        let Some(first) = self.formatter.render(&buf.accumulated).into_iter().next() else {
            return Ok(());
        };
        if first == buf.last_rendered {
            return Ok(());
        }

        match buf.target.clone() {
            Some(message_id) => {
                self.edit(conversation_id, &message_id, &first).await?;
            }
            None => {
                let message_id = self.presenter.send_message(conversation_id, &first).await?;
                buf.target = Some(message_id);
            }
        }
        buf.last_rendered = first;
        buf.last_flush_at = Some(now);

        tracing::debug!(
            conversation_id,
            bytes = buf.accumulated.len(),
            "Streaming output flushed"
        );
        Ok(())
    }

    /// Render the final text and drop the buffer
    ///
    /// `final_text` is the authoritative full response when the agent sent
    /// one; otherwise the accumulated deltas are used.
    pub async fn on_complete(&self, conversation_id: &str, final_text: Option<&str>) -> Result<()> {
        let (text, target, last_rendered) = match self.buffers.remove(conversation_id) {
            Some((_, buffer)) => {
                let buf = buffer.lock().await;
                let text = final_text
                    .map(str::to_string)
                    .unwrap_or_else(|| buf.accumulated.clone());
                (text, buf.target.clone(), buf.last_rendered.clone())
            }
            None => (final_text.unwrap_or_default().to_string(), None, String::new()),
        };

        let mut chunks = self.formatter.render(&text).into_iter();
        let Some(first) = chunks.next() else {
            return Ok(());
        };

        match target {
            Some(message_id) => {
                if first != last_rendered {
                    self.edit(conversation_id, &message_id, &first).await?;
                }
            }
            None => {
                self.presenter.send_message(conversation_id, &first).await?;
            }
        }

        let mut overflow = 0;
        for chunk in chunks {
            self.presenter.send_message(conversation_id, &chunk).await?;
            overflow += 1;
        }

        tracing::debug!(
            conversation_id,
            bytes = text.len(),
            overflow,
            "Final output rendered"
        );
        Ok(())
    }

    /// Edit an existing message instead of sending a new one on first flush
    pub async fn attach(&self, conversation_id: &str, message_id: &str) {
        let buffer = self.buffer(conversation_id);
        buffer.lock().await.target = Some(message_id.to_string());
    }

    /// Drop any partial output; returns whether a buffer existed
    pub fn discard(&self, conversation_id: &str) -> bool {
        self.buffers.remove(conversation_id).is_some()
    }

    pub fn is_streaming(&self, conversation_id: &str) -> bool {
        self.buffers.contains_key(conversation_id)
    }

    async fn edit(&self, conversation_id: &str, message_id: &str, text: &str) -> Result<()> {
        match self
            .presenter
            .edit_message(conversation_id, message_id, text)
            .await
        {
            Err(e) if e.is_not_modified() => Ok(()),
            other => other,
        }
    }
}
