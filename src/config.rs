//! Bridge configuration
//!
//! All timings and size ceilings used by the consumer, coordinator,
//! renderer and registry. Loading from files is left to the host; the
//! struct deserializes from any serde format with camelCase keys.

use crate::error::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default debounce window before coalesced input is dispatched (ms)
const DEFAULT_DEBOUNCE_MS: u64 = 1_500;

/// Default typing-indicator interval while a conversation is busy (seconds)
const DEFAULT_HEARTBEAT_SECS: u64 = 4;

/// Default window for suppressing duplicate completion signals (seconds)
const DEFAULT_DEDUP_WINDOW_SECS: u64 = 5;

/// Default minimum interval between streaming edits (ms)
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 500;

/// Default outbound message ceiling (bytes)
const DEFAULT_MAX_MESSAGE_BYTES: usize = 4_096;

/// Default callback payload ceiling (bytes)
const DEFAULT_MAX_CALLBACK_BYTES: usize = 64;

/// Configuration shared by all bridge components
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Debounce window for coalescing user input (milliseconds)
    pub debounce_ms: u64,

    /// Interval between typing indicators while busy (seconds)
    pub heartbeat_secs: u64,

    /// Window in which repeated completion signals are ignored (seconds)
    pub dedup_window_secs: u64,

    /// Minimum interval between streaming message edits (milliseconds)
    pub flush_interval_ms: u64,

    /// Maximum size of a single outbound display message (bytes)
    pub max_message_bytes: usize,

    /// Maximum size of an interactive callback payload (bytes)
    pub max_callback_bytes: usize,

    /// Lifetime of a registered short key (seconds)
    pub handle_ttl_secs: u64,

    /// Interval between registry sweeps (seconds)
    pub sweep_interval_secs: u64,

    /// Capacity of the event channel between consumer and coordinator
    pub event_buffer: usize,

    /// First reconnect delay (milliseconds)
    pub backoff_initial_ms: u64,

    /// Reconnect delay ceiling (milliseconds)
    pub backoff_max_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            dedup_window_secs: DEFAULT_DEDUP_WINDOW_SECS,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_callback_bytes: DEFAULT_MAX_CALLBACK_BYTES,
            handle_ttl_secs: 3_600,
            sweep_interval_secs: 300,
            event_buffer: 256,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 30_000,
        }
    }
}

impl BridgeConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn handle_ttl(&self) -> Duration {
        Duration::from_secs(self.handle_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Reject values that would stall timers or make output impossible
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_secs == 0 {
            return Err(BridgeError::Config("heartbeatSecs must be > 0".to_string()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(BridgeError::Config("sweepIntervalSecs must be > 0".to_string()));
        }
        if self.event_buffer == 0 {
            return Err(BridgeError::Config("eventBuffer must be > 0".to_string()));
        }
        if self.max_message_bytes < 64 {
            return Err(BridgeError::Config(format!(
                "maxMessageBytes must be at least 64, got {}",
                self.max_message_bytes
            )));
        }
        if self.max_callback_bytes < 16 {
            return Err(BridgeError::Config(format!(
                "maxCallbackBytes must be at least 16, got {}",
                self.max_callback_bytes
            )));
        }
        if self.backoff_initial_ms == 0 || self.backoff_max_ms < self.backoff_initial_ms {
            return Err(BridgeError::Config(format!(
                "invalid backoff range {}ms..{}ms",
                self.backoff_initial_ms, self.backoff_max_ms
            )));
        }
        Ok(())
    }
}
