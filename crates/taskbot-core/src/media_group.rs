//! Album batching.
//!
//! Telegram delivers an album as separate updates sharing a `media_group_id`.
//! [`MediaGroupBuffer`] collects them so the album is handled as one upload:
//! a buffer is flushed when it reaches [`MAX_GROUP_SIZE`] units, when a late
//! unit arrives after the quiet window, or when [`MediaGroupBuffer::sweep`]
//! finds it idle for at least the window.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::store::KeyedStore;

/// Most files carried by one logical upload.
pub const MAX_GROUP_SIZE: usize = 3;

const KEY_PREFIX: &str = "media_group:";

/// One inbound Telegram message reduced to what the bot acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundUnit {
    pub message_id: i32,
    pub chat_id: i64,
    pub user_id: i64,
    /// Text or caption.
    pub text: Option<String>,
    /// Photo (largest size) and document file ids, in message order.
    pub file_ids: Vec<String>,
    pub voice_file_id: Option<String>,
    pub media_group_id: Option<String>,
    /// Sender display name, a hint for the task's sender field.
    pub sender_name: Option<String>,
}

impl InboundUnit {
    /// Text with surrounding whitespace removed, if any remains.
    pub fn trimmed_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Batching limits.
#[derive(Debug, Clone)]
pub struct MediaGroupConfig {
    /// Quiet period after the last unit before a buffer counts as complete.
    pub window: Duration,
    /// Units that complete a buffer immediately.
    pub max_size: usize,
}

impl Default for MediaGroupConfig {
    fn default() -> Self {
        Self {
            window: Duration::seconds(2),
            max_size: MAX_GROUP_SIZE,
        }
    }
}

impl MediaGroupConfig {
    /// Lifetime of an abandoned buffer in the store.
    pub fn retention(&self) -> Duration {
        self.window + Duration::seconds(5)
    }
}

#[derive(Debug, Clone)]
struct PendingGroup {
    units: Vec<InboundUnit>,
    first_received_at: DateTime<Utc>,
    last_received_at: DateTime<Utc>,
}

impl PendingGroup {
    fn start(unit: InboundUnit, now: DateTime<Utc>) -> Self {
        Self {
            units: vec![unit],
            first_received_at: now,
            last_received_at: now,
        }
    }
}

/// Buffers album units until the album is complete.
pub struct MediaGroupBuffer {
    store: KeyedStore<PendingGroup>,
    config: MediaGroupConfig,
}

impl MediaGroupBuffer {
    /// Buffer with the default 2 s window and cap of 3.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_config(clock, MediaGroupConfig::default())
    }

    pub fn with_config(clock: Arc<dyn Clock>, config: MediaGroupConfig) -> Self {
        Self {
            store: KeyedStore::new(clock).with_ttl(config.retention()),
            config,
        }
    }

    /// Add a unit.
    ///
    /// Returns the completed batch, or `None` while the album is still open.
    /// Units without a media group are returned immediately on their own.
    pub async fn add(&self, unit: InboundUnit) -> Option<Vec<InboundUnit>> {
        let Some(group_id) = unit.media_group_id.clone() else {
            return Some(vec![unit]);
        };

        let key = format!("{KEY_PREFIX}{group_id}");
        let now = self.store.clock().now();
        let window = self.config.window;
        let max_size = self.config.max_size.max(1);
        let message_id = unit.message_id;

        let flushed = self
            .store
            .update(&key, |entry| match entry.take() {
                Some(mut group) if now - group.last_received_at >= window => {
                    group.units.push(unit);
                    Some(group.units)
                }
                Some(mut group) => {
                    group.units.push(unit);
                    group.last_received_at = now;
                    if group.units.len() >= max_size {
                        Some(group.units)
                    } else {
                        *entry = Some(group);
                        None
                    }
                }
                None if max_size == 1 => Some(vec![unit]),
                None => {
                    *entry = Some(PendingGroup::start(unit, now));
                    None
                }
            })
            .await;

        match &flushed {
            Some(units) => info!(
                media_group_id = %group_id,
                units = units.len(),
                "Media group ready"
            ),
            None => debug!(
                media_group_id = %group_id,
                message_id,
                "Buffered media group unit"
            ),
        }
        flushed
    }

    /// Flush every buffer idle for at least the window.
    ///
    /// Meant to be called periodically so the final album is not left waiting
    /// for a unit that never comes.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<Vec<InboundUnit>> {
        let window = self.config.window;
        let mut batches = Vec::new();

        // Albums the sweep did not reach within their retention.
        for (key, group) in self.store.take_expired().await {
            warn!(
                key = %key,
                units = group.units.len(),
                idle_ms = (now - group.last_received_at).num_milliseconds(),
                "Media group outlived its retention, flushing late"
            );
            batches.push(group.units);
        }

        for key in self.store.keys().await {
            let flushed = self
                .store
                .update(&key, |entry| {
                    let idle = entry
                        .as_ref()
                        .is_some_and(|group| now - group.last_received_at >= window);
                    if idle {
                        entry.take()
                    } else {
                        None
                    }
                })
                .await;

            if let Some(group) = flushed {
                info!(
                    key = %key,
                    units = group.units.len(),
                    waited_ms = (now - group.first_received_at).num_milliseconds(),
                    "Swept idle media group"
                );
                batches.push(group.units);
            }
        }

        self.store.prune().await;
        batches
    }

    /// Number of albums still waiting.
    pub async fn pending(&self) -> usize {
        self.store.keys().await.len()
    }
}

/// All file ids of a batch in order, at most [`MAX_GROUP_SIZE`].
pub fn collect_file_ids(units: &[InboundUnit]) -> Vec<String> {
    units
        .iter()
        .flat_map(|u| u.file_ids.iter().cloned())
        .take(MAX_GROUP_SIZE)
        .collect()
}

/// First non-empty text of a batch; albums usually caption only one item.
pub fn first_text(units: &[InboundUnit]) -> Option<String> {
    units
        .iter()
        .find_map(|u| u.trimmed_text())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn unit(message_id: i32, group: Option<&str>, file: &str) -> InboundUnit {
        InboundUnit {
            message_id,
            chat_id: 10,
            user_id: 20,
            text: None,
            file_ids: vec![file.to_string()],
            voice_file_id: None,
            media_group_id: group.map(str::to_string),
            sender_name: Some("Иван Петров".into()),
        }
    }

    fn buffer() -> (MediaGroupBuffer, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let buffer = MediaGroupBuffer::new(clock.clone() as Arc<dyn Clock>);
        (buffer, clock)
    }

    #[tokio::test]
    async fn test_ungrouped_passes_through() {
        let (buffer, _clock) = buffer();
        let batch = buffer.add(unit(1, None, "f1")).await;
        assert_eq!(batch.map(|b| b.len()), Some(1));
        assert_eq!(buffer.pending().await, 0);
    }

    #[tokio::test]
    async fn test_two_units_wait_then_sweep() {
        let (buffer, clock) = buffer();

        assert!(buffer.add(unit(1, Some("g"), "f1")).await.is_none());
        clock.advance(Duration::milliseconds(500));
        assert!(buffer.add(unit(2, Some("g"), "f2")).await.is_none());

        // Not idle long enough yet
        clock.advance(Duration::milliseconds(2000));
        assert!(buffer.sweep(clock.now() - Duration::milliseconds(1)).await.is_empty());

        let batches = buffer.sweep(clock.now()).await;
        assert_eq!(batches.len(), 1);
        let ids: Vec<i32> = batches[0].iter().map(|u| u.message_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(batches[0][0].sender_name.as_deref(), Some("Иван Петров"));
        assert_eq!(buffer.pending().await, 0);
    }

    #[tokio::test]
    async fn test_cap_flushes_immediately() {
        let (buffer, _clock) = buffer();
        assert!(buffer.add(unit(1, Some("g"), "f1")).await.is_none());
        assert!(buffer.add(unit(2, Some("g"), "f2")).await.is_none());

        let batch = buffer.add(unit(3, Some("g"), "f3")).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(collect_file_ids(&batch), vec!["f1", "f2", "f3"]);
        assert_eq!(buffer.pending().await, 0);
    }

    #[tokio::test]
    async fn test_late_unit_flushes_with_stale_buffer() {
        let (buffer, clock) = buffer();
        assert!(buffer.add(unit(1, Some("g"), "f1")).await.is_none());

        clock.advance(Duration::seconds(2));
        let batch = buffer.add(unit(2, Some("g"), "f2")).await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let (buffer, clock) = buffer();
        assert!(buffer.add(unit(1, Some("a"), "a1")).await.is_none());
        clock.advance(Duration::seconds(1));
        assert!(buffer.add(unit(2, Some("b"), "b1")).await.is_none());
        clock.advance(Duration::seconds(1));

        // Only "a" has been idle for the full window
        let batches = buffer.sweep(clock.now()).await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].message_id, 1);
        assert_eq!(buffer.pending().await, 1);
    }

    #[tokio::test]
    async fn test_overdue_buffer_is_flushed_not_lost() {
        let (buffer, clock) = buffer();
        assert!(buffer.add(unit(1, Some("g"), "f1")).await.is_none());
        assert!(buffer.add(unit(2, Some("g"), "f2")).await.is_none());

        // The sweep missed the whole retention period
        clock.advance(Duration::seconds(8));
        assert_eq!(buffer.pending().await, 0);

        let batches = buffer.sweep(clock.now()).await;
        assert_eq!(batches.len(), 1);
        assert_eq!(collect_file_ids(&batches[0]), vec!["f1", "f2"]);
        assert!(buffer.sweep(clock.now()).await.is_empty());
    }

    #[test]
    fn test_collect_file_ids_caps_at_three() {
        let mut first = unit(1, Some("g"), "f1");
        first.file_ids.push("f2".into());
        let second = InboundUnit {
            file_ids: vec!["f3".into(), "f4".into()],
            ..unit(2, Some("g"), "")
        };
        assert_eq!(collect_file_ids(&[first, second]), vec!["f1", "f2", "f3"]);
    }

    #[test]
    fn test_first_text_skips_blank() {
        let blank = InboundUnit {
            text: Some("   ".into()),
            ..unit(1, Some("g"), "f1")
        };
        let captioned = InboundUnit {
            text: Some(" Отчёт ".into()),
            ..unit(2, Some("g"), "f2")
        };
        assert_eq!(first_text(&[blank.clone(), captioned]), Some("Отчёт".into()));
        assert_eq!(first_text(&[blank]), None);
    }
}
