//! Stream consumer
//!
//! Maintains one long-lived connection to an `EventSource`, decodes the
//! server-sent frames into typed events and publishes them on a bounded
//! channel. Connection failures are never fatal: the loop reconnects with
//! exponential backoff until it is cancelled.

pub mod frame;

pub use frame::{decode_frame, FrameDecoder, RawFrame};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::provider::{ByteStream, EventSource};
use crate::types::Event;
use futures::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Exponential reconnect delay
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait now; doubles the next one up to the ceiling
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Back to the initial delay after a successful connect
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Counters describing the consumer's activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStats {
    /// Successful connections
    pub connects: u64,
    /// Events handed to the channel
    pub published: u64,
    /// Events dropped because the channel was full
    pub dropped: u64,
    /// Frames that failed to decode
    pub malformed: u64,
}

#[derive(Default)]
struct Counters {
    connects: AtomicU64,
    published: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
}

/// How one connection ended
enum ReadEnd {
    Cancelled,
    ReceiverClosed,
    Eof,
    Failed(BridgeError),
}

/// Long-lived consumer of the remote event stream
pub struct StreamConsumer {
    source: Arc<dyn EventSource>,
    tx: Mutex<Option<mpsc::Sender<Event>>>,
    rx: Mutex<Option<mpsc::Receiver<Event>>>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    counters: Arc<Counters>,
    backoff_initial: Duration,
    backoff_max: Duration,
}

impl StreamConsumer {
    /// Create a consumer; nothing connects until `connect`
    pub fn new(source: Arc<dyn EventSource>, config: &BridgeConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));
        Self {
            source,
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            cancel: Mutex::new(None),
            task: Mutex::new(None),
            closed: AtomicBool::new(false),
            counters: Arc::new(Counters::default()),
            backoff_initial: config.backoff_initial(),
            backoff_max: config.backoff_max(),
        }
    }

    /// Start the background connect/reconnect loop
    ///
    /// The loop stops when `parent` or the consumer itself is cancelled.
    pub async fn connect(&self, parent: &CancellationToken) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Closed("stream consumer".to_string()));
        }

        let mut task = self.task.lock().await;
        if task.is_some() {
            return Err(BridgeError::Config(
                "stream consumer already connected".to_string(),
            ));
        }
        let tx = self
            .tx
            .lock()
            .await
            .clone()
            .ok_or_else(|| BridgeError::Closed("stream consumer".to_string()))?;

        let token = parent.child_token();
        *self.cancel.lock().await = Some(token.clone());

        let source = self.source.clone();
        let counters = self.counters.clone();
        let backoff = Backoff::new(self.backoff_initial, self.backoff_max);
        *task = Some(tokio::spawn(run_loop(source, tx, token, backoff, counters)));

        tracing::info!(endpoint = %self.source.endpoint(), "Stream consumer started");
        Ok(())
    }

    /// Take the receiving end of the event channel (only once)
    pub async fn events(&self) -> Option<mpsc::Receiver<Event>> {
        self.rx.lock().await.take()
    }

    /// Stop the loop and close the channel; repeated calls are no-ops
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(token) = self.cancel.lock().await.take() {
            token.cancel();
        }
        self.tx.lock().await.take();
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        tracing::info!(endpoint = %self.source.endpoint(), "Stream consumer closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            connects: self.counters.connects.load(Ordering::Relaxed),
            published: self.counters.published.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
        }
    }
}

async fn run_loop(
    source: Arc<dyn EventSource>,
    tx: mpsc::Sender<Event>,
    cancel: CancellationToken,
    mut backoff: Backoff,
    counters: Arc<Counters>,
) {
    let endpoint = source.endpoint();
    loop {
        let opened = tokio::select! {
            _ = cancel.cancelled() => break,
            opened = source.open() => opened,
        };

        match opened {
            Ok(stream) => {
                counters.connects.fetch_add(1, Ordering::Relaxed);
                backoff.reset();
                tracing::info!(endpoint = %endpoint, "Event stream connected");

                match read_stream(stream, &tx, &cancel, &counters).await {
                    ReadEnd::Cancelled => break,
                    ReadEnd::ReceiverClosed => {
                        tracing::info!(endpoint = %endpoint, "Event receiver dropped, stopping");
                        break;
                    }
                    ReadEnd::Eof => {
                        tracing::warn!(endpoint = %endpoint, "Event stream ended");
                    }
                    ReadEnd::Failed(e) => {
                        tracing::warn!(endpoint = %endpoint, error = %e, "Event stream failed");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(endpoint = %endpoint, error = %e, "Failed to connect event stream");
            }
        }

        let delay = backoff.next_delay();
        tracing::debug!(
            endpoint = %endpoint,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting after backoff"
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    tracing::debug!(endpoint = %endpoint, "Stream consumer loop exited");
}

async fn read_stream(
    mut stream: ByteStream,
    tx: &mpsc::Sender<Event>,
    cancel: &CancellationToken,
    counters: &Counters,
) -> ReadEnd {
    let mut decoder = FrameDecoder::new();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return ReadEnd::Cancelled,
            chunk = stream.next() => chunk,
        };

        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => return ReadEnd::Failed(e),
            None => return ReadEnd::Eof,
        };

        for raw in decoder.push(&bytes) {
            let event = match decode_frame(&raw) {
                Ok(event) => event,
                Err(e) => {
                    counters.malformed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %e, "Skipping malformed event frame");
                    continue;
                }
            };

            match tx.try_send(event) {
                Ok(()) => {
                    counters.published.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(event)) => {
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(kind = ?event.kind, "Event channel full, dropping event");
                }
                Err(TrySendError::Closed(_)) => return ReadEnd::ReceiverClosed,
            }
        }
    }
}
