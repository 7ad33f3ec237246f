//! Correlation cache: `msg_id -> raw reply bytes`.
//!
//! Filled by the receive paths (serial reader thread, WebSocket read tasks)
//! and drained by callers waiting in [`CorrelationCache::wait_take`]. Capacity
//! is bounded with FIFO eviction on overflow; entries older than the TTL are
//! treated as absent when read.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use ecrlink_core::error::{EcrError, Result};

use crate::config::CacheSection;

#[derive(Debug)]
struct Entry {
    value: Bytes,
    inserted_at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Insertion order of `entries` keys.
    order: VecDeque<String>,
}

#[derive(Debug)]
pub struct CorrelationCache {
    inner: Mutex<Inner>,
    capacity: usize,
    ttl: Duration,
}

impl CorrelationCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn from_config(cfg: &CacheSection) -> Self {
        Self::new(cfg.capacity, cfg.ttl())
    }

    pub fn put(&self, key: impl Into<String>, value: Bytes) {
        let key = key.into();
        let mut inner = self.inner.lock();

        if inner.entries.contains_key(&key) {
            tracing::warn!(msg_id = %key, "duplicate reply replaces pending entry");
        } else {
            while inner.entries.len() >= self.capacity {
                let Some(oldest) = inner.order.pop_front() else { break };
                if inner.entries.remove(&oldest).is_some() {
                    tracing::debug!(msg_id = %oldest, "correlation cache full, evicted oldest");
                }
            }
            inner.order.push_back(key.clone());
        }

        inner.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Look up without consuming. Expired entries are dropped and reported absent.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        let expired = inner.entries.get(key)?.inserted_at.elapsed() >= self.ttl;
        if expired {
            inner.entries.remove(key);
            inner.order.retain(|k| k != key);
            tracing::debug!(msg_id = %key, "correlation entry expired");
            return None;
        }
        inner.entries.get(key).map(|e| e.value.clone())
    }

    pub fn remove(&self, key: &str) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.remove(key)?;
        inner.order.retain(|k| k != key);
        Some(entry.value)
    }

    /// `get` + `remove` under one lock, so an entry is handed out at most once.
    pub fn take(&self, key: &str) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.remove(key)?;
        inner.order.retain(|k| k != key);
        if entry.inserted_at.elapsed() >= self.ttl {
            tracing::debug!(msg_id = %key, "correlation entry expired");
            return None;
        }
        Some(entry.value)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Poll for `key` every `poll` until it arrives or `timeout` elapses.
    ///
    /// Fails no earlier than `timeout` and no later than `timeout + poll`.
    pub async fn wait_take(&self, key: &str, timeout: Duration, poll: Duration) -> Result<Bytes> {
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            if let Some(v) = self.take(key) {
                return Ok(v);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(EcrError::ReadTimeout {
                    msg_id: key.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }
}
