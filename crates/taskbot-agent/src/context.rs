//! Per-user conversation context.
//!
//! The context id is the handle of the user's provider-side conversation.
//! It is refreshed on every turn, goes stale after [`context_ttl`] of
//! inactivity and is dropped once a task is committed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use taskbot_core::{Clock, KeyedStore};
use tracing::debug;

/// Age after which a context must not be reused.
pub fn context_ttl() -> Duration {
    Duration::hours(1)
}

/// Conversation handle for one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationContext {
    pub context_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationContext {
    pub fn new(context_id: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            context_id: Some(context_id.into()),
            updated_at,
        }
    }

    /// Whether the context must be replaced rather than reused.
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.context_id.is_none() || now - self.updated_at >= ttl
    }

    /// The context id, if still fresh.
    pub fn fresh_id(&self, now: DateTime<Utc>, ttl: Duration) -> Option<&str> {
        if self.is_stale(now, ttl) {
            None
        } else {
            self.context_id.as_deref()
        }
    }
}

/// Storage for conversation contexts.
#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn get(&self, user_id: i64) -> Option<ConversationContext>;

    /// Record `context_id` as the user's latest context, stamped now.
    async fn touch(&self, user_id: i64, context_id: &str);

    /// Forget the user's context.
    async fn clear(&self, user_id: i64);
}

/// Process-local context store.
pub struct InMemoryContextStore {
    store: KeyedStore<ConversationContext>,
}

impl InMemoryContextStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: KeyedStore::new(clock),
        }
    }

    fn key(user_id: i64) -> String {
        format!("conversation:{user_id}")
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn get(&self, user_id: i64) -> Option<ConversationContext> {
        self.store.get(&Self::key(user_id)).await
    }

    async fn touch(&self, user_id: i64, context_id: &str) {
        let now = self.store.clock().now();
        self.store
            .insert(&Self::key(user_id), ConversationContext::new(context_id, now))
            .await;
        debug!(user_id, context_id = %context_id, "Conversation context updated");
    }

    async fn clear(&self, user_id: i64) {
        if self.store.remove(&Self::key(user_id)).await.is_some() {
            debug!(user_id, "Conversation context cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskbot_core::ManualClock;

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let ctx = ConversationContext::new("conv_1", now);
        assert!(!ctx.is_stale(now + Duration::minutes(59), context_ttl()));
        assert!(ctx.is_stale(now + Duration::hours(1), context_ttl()));
        assert_eq!(ctx.fresh_id(now, context_ttl()), Some("conv_1"));

        let empty = ConversationContext {
            context_id: None,
            updated_at: now,
        };
        assert!(empty.is_stale(now, context_ttl()));
    }

    #[tokio::test]
    async fn test_touch_and_clear() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = InMemoryContextStore::new(clock.clone());

        assert!(store.get(7).await.is_none());
        store.touch(7, "conv_1").await;
        let ctx = store.get(7).await.unwrap();
        assert_eq!(ctx.context_id.as_deref(), Some("conv_1"));
        assert_eq!(ctx.updated_at, clock.now());

        store.clear(7).await;
        assert!(store.get(7).await.is_none());
    }
}
