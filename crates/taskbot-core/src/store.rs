//! Keyed in-memory state with per-key locking and expiry.
//!
//! Every key owns its own async mutex, so a read-modify-write for one chat
//! or album never blocks work on another. The outer map lock is only held
//! long enough to find or create a slot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::clock::Clock;

#[derive(Debug)]
struct Slot<V> {
    value: Option<V>,
    expires_at: Option<DateTime<Utc>>,
}

impl<V> Slot<V> {
    fn empty() -> Self {
        Self {
            value: None,
            expires_at: None,
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.value.is_some() && self.expires_at.map_or(true, |at| now < at)
    }

    /// Clear an expired value, returning it.
    fn expire_if_needed(&mut self, now: DateTime<Utc>) -> Option<V> {
        if self.is_live(now) {
            return None;
        }
        self.expires_at = None;
        self.value.take()
    }
}

/// Async keyed store.
pub struct KeyedStore<V> {
    slots: Mutex<HashMap<String, Arc<Mutex<Slot<V>>>>>,
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl<V> KeyedStore<V>
where
    V: Clone + Send + 'static,
{
    /// Create a store whose entries never expire.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl: None,
            clock,
        }
    }

    /// Expire entries `ttl` after their last write.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// The clock this store measures expiry with.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    async fn slot(&self, key: &str) -> Arc<Mutex<Slot<V>>> {
        let mut slots = self.slots.lock().await;
        Arc::clone(
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Slot::empty()))),
        )
    }

    /// Run `f` on the value under the key's exclusive lock.
    ///
    /// `f` sees `None` for absent or expired entries. Leaving `Some` in place
    /// stores the value and refreshes its expiry; leaving `None` removes it.
    pub async fn update<R, F>(&self, key: &str, f: F) -> R
    where
        F: FnOnce(&mut Option<V>) -> R,
    {
        let slot = self.slot(key).await;
        let mut guard = slot.lock().await;
        let now = self.clock.now();
        if guard.expire_if_needed(now).is_some() {
            debug!(key = %key, "Expired entry dropped");
        }

        let result = f(&mut guard.value);

        guard.expires_at = match (&guard.value, self.ttl) {
            (Some(_), Some(ttl)) => Some(now + ttl),
            _ => None,
        };
        trace!(key = %key, live = guard.value.is_some(), "Keyed store updated");
        result
    }

    /// Clone the live value for a key.
    pub async fn get(&self, key: &str) -> Option<V> {
        let slot = {
            let slots = self.slots.lock().await;
            slots.get(key).map(Arc::clone)
        }?;
        let guard = slot.lock().await;
        if guard.is_live(self.clock.now()) {
            guard.value.clone()
        } else {
            None
        }
    }

    /// Store a value, replacing any previous one.
    pub async fn insert(&self, key: &str, value: V) {
        self.update(key, |entry| *entry = Some(value)).await;
    }

    /// Remove and return the live value for a key.
    pub async fn remove(&self, key: &str) -> Option<V> {
        self.update(key, Option::take).await
    }

    /// Keys that currently hold a live value.
    pub async fn keys(&self) -> Vec<String> {
        let snapshot: Vec<(String, Arc<Mutex<Slot<V>>>)> = {
            let slots = self.slots.lock().await;
            slots
                .iter()
                .map(|(k, v)| (k.clone(), Arc::clone(v)))
                .collect()
        };

        let now = self.clock.now();
        let mut keys = Vec::new();
        for (key, slot) in snapshot {
            if slot.lock().await.is_live(now) {
                keys.push(key);
            }
        }
        keys
    }

    /// Take every value whose expiry has passed, so callers can act on it
    /// instead of losing it to the next read.
    pub async fn take_expired(&self) -> Vec<(String, V)> {
        let snapshot: Vec<(String, Arc<Mutex<Slot<V>>>)> = {
            let slots = self.slots.lock().await;
            slots
                .iter()
                .map(|(k, v)| (k.clone(), Arc::clone(v)))
                .collect()
        };

        let now = self.clock.now();
        let mut expired = Vec::new();
        for (key, slot) in snapshot {
            if let Some(value) = slot.lock().await.expire_if_needed(now) {
                expired.push((key, value));
            }
        }
        expired
    }

    /// Drop empty or expired slots nobody is using. Returns how many were dropped.
    pub async fn prune(&self) -> usize {
        let now = self.clock.now();
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(guard) => guard.is_live(now),
                Err(_) => true,
            }
        });
        before - slots.len()
    }

    /// Number of allocated slots, live or not.
    pub async fn slot_count(&self) -> usize {
        self.slots.lock().await.len()
    }
}
