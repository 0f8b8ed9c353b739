//! Handle registry
//!
//! Maps long opaque request ids to short keys that fit inside bounded
//! callback payloads. Keys expire after a TTL and are swept periodically.

use crate::error::{BridgeError, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    full_id: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    /// short key → entry
    forward: HashMap<String, Entry>,
    /// full id → short key
    reverse: HashMap<String, String>,
    counter: u64,
}

impl Inner {
    fn remove(&mut self, short_key: &str) -> Option<Entry> {
        let entry = self.forward.remove(short_key)?;
        if self.reverse.get(&entry.full_id).map(String::as_str) == Some(short_key) {
            self.reverse.remove(&entry.full_id);
        }
        Some(entry)
    }
}

/// Bidirectional, expiring map of short keys to full ids
///
/// One lock covers both directions and the expiries, so a full id never
/// resolves to two live keys.
pub struct HandleRegistry {
    inner: Mutex<Inner>,
    ttl: Duration,
    max_key_len: usize,
}

impl HandleRegistry {
    pub fn new(ttl: Duration, max_key_len: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            ttl,
            max_key_len,
        }
    }

    /// Short key for `full_id`, reusing the live one if present
    ///
    /// New keys have the form `namespace:counter:suffix`.
    pub async fn register(&self, full_id: &str, namespace: &str, suffix: &str) -> Result<String> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        if let Some(key) = inner.reverse.get(full_id).cloned() {
            let live = inner
                .forward
                .get(&key)
                .is_some_and(|entry| entry.expires_at > now);
            if live {
                return Ok(key);
            }
            inner.remove(&key);
        }

        let key = format!("{}:{}:{}", namespace, inner.counter + 1, suffix);
        if key.len() > self.max_key_len {
            return Err(BridgeError::Config(format!(
                "short key '{}' exceeds {} bytes",
                key, self.max_key_len
            )));
        }

        inner.counter += 1;
        inner.forward.insert(
            key.clone(),
            Entry {
                full_id: full_id.to_string(),
                expires_at: now + self.ttl,
            },
        );
        inner.reverse.insert(full_id.to_string(), key.clone());

        tracing::debug!(short_key = %key, full_id, "Handle registered");
        Ok(key)
    }

    /// Full id behind a live short key
    pub async fn lookup(&self, short_key: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        inner
            .forward
            .get(short_key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.full_id.clone())
    }

    /// Remove a key once its request is answered, returning the full id
    pub async fn consume(&self, short_key: &str) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let entry = inner.remove(short_key)?;
        (entry.expires_at > Instant::now()).then_some(entry.full_id)
    }

    /// Drop every expired entry, returning the removed short keys
    pub async fn sweep(&self) -> Vec<String> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let expired: Vec<String> = inner
            .forward
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        if !expired.is_empty() {
            tracing::debug!(removed = expired.len(), "Registry swept");
        }
        expired
    }

    /// Number of entries, including expired ones not yet swept
    pub async fn len(&self) -> usize {
        self.inner.lock().await.forward.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
