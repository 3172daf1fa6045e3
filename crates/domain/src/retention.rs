use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::documents::{self, collections, fields};
use crate::ports::store::{CollectionPath, DocumentStore, MAX_BATCH_WRITES, Query, WriteBatch};

pub const DEFAULT_RETENTION_DAYS: i64 = 30;
const DAY_MS: i64 = 24 * 60 * 60 * 1_000;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionReport {
    pub cutoff_ms: i64,
    pub rooms_scanned: usize,
    pub rooms_failed: usize,
    pub messages_deleted: usize,
    pub batches_committed: usize,
}

/// Deletes chat messages older than the retention window.
#[derive(Clone)]
pub struct RetentionJob {
    store: Arc<dyn DocumentStore>,
    retention_days: i64,
}

impl RetentionJob {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    pub fn with_retention_days(mut self, retention_days: i64) -> Self {
        self.retention_days = retention_days.max(1);
        self
    }

    pub fn cutoff_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.retention_days * DAY_MS
    }

    /// Sweeps every room. A room that fails is counted and skipped.
    pub async fn sweep(&self, now_ms: i64) -> DomainResult<RetentionReport> {
        let cutoff_ms = self.cutoff_ms(now_ms);
        let rooms = self
            .store
            .query(&Query::new(CollectionPath::root(collections::CHAT_ROOMS)))
            .await?;

        let mut report = RetentionReport {
            cutoff_ms,
            ..RetentionReport::default()
        };
        for room in &rooms {
            report.rooms_scanned += 1;
            match self.sweep_room(room.id(), cutoff_ms).await {
                Ok((deleted, batches)) => {
                    report.messages_deleted += deleted;
                    report.batches_committed += batches;
                }
                Err(err) => {
                    report.rooms_failed += 1;
                    tracing::error!(
                        chat_room_id = room.id(),
                        error = %err,
                        "retention sweep failed for room"
                    );
                }
            }
        }
        tracing::info!(
            cutoff = %crate::util::format_ms_rfc3339(cutoff_ms),
            rooms_scanned = report.rooms_scanned,
            rooms_failed = report.rooms_failed,
            messages_deleted = report.messages_deleted,
            "retention sweep finished"
        );
        Ok(report)
    }

    async fn sweep_room(&self, chat_room_id: &str, cutoff_ms: i64) -> DomainResult<(usize, usize)> {
        let query = Query::new(documents::messages_collection(chat_room_id))
            .where_lt(fields::CREATED_AT, cutoff_ms)
            .limit(MAX_BATCH_WRITES);
        let mut deleted = 0;
        let mut batches = 0;
        loop {
            let expired = self.store.query(&query).await?;
            if expired.is_empty() {
                break;
            }
            let mut batch = WriteBatch::new();
            for message in &expired {
                batch.delete(message.path.clone())?;
            }
            self.store.commit(batch).await?;
            deleted += expired.len();
            batches += 1;
            if expired.len() < MAX_BATCH_WRITES {
                break;
            }
        }
        if deleted > 0 {
            tracing::debug!(chat_room_id, deleted, batches, "expired messages deleted");
        }
        Ok((deleted, batches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDocumentStore;
    use crate::testing::{FaultyStore, fields as json_fields, read, seed};
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    async fn seed_messages(
        store: &InMemoryDocumentStore,
        room: &str,
        count: usize,
        created_at: i64,
    ) {
        seed(store, &format!("chatRooms/{room}"), json!({"participants": []})).await;
        let mut batch = WriteBatch::new();
        for index in 0..count {
            batch
                .set(
                    documents::messages_collection(room).doc(&format!("old{index}")),
                    json_fields(json!({"text": "x", "senderId": "u1", "createdAt": created_at})),
                )
                .unwrap();
            if batch.remaining() == 0 {
                store.commit(std::mem::take(&mut batch)).await.unwrap();
            }
        }
        if !batch.is_empty() {
            store.commit(batch).await.unwrap();
        }
    }

    #[tokio::test]
    async fn boundary_messages_are_deleted_or_kept() {
        let store = InMemoryDocumentStore::new();
        seed(&store, "chatRooms/global", json!({"participants": []})).await;
        seed(
            &store,
            "chatRooms/global/messages/expired",
            json!({"text": "a", "senderId": "u1", "createdAt": NOW - 30 * DAY_MS - 1_000}),
        )
        .await;
        seed(
            &store,
            "chatRooms/global/messages/recent",
            json!({"text": "b", "senderId": "u1", "createdAt": NOW - 29 * DAY_MS}),
        )
        .await;
        let job = RetentionJob::new(Arc::new(store.clone()));

        let report = job.sweep(NOW).await.unwrap();
        assert_eq!(report.messages_deleted, 1);
        assert_eq!(report.rooms_scanned, 1);
        assert!(read(&store, "chatRooms/global/messages/expired").await.is_none());
        assert!(read(&store, "chatRooms/global/messages/recent").await.is_some());
    }

    #[tokio::test]
    async fn large_rooms_are_swept_in_several_batches() {
        let store = InMemoryDocumentStore::new();
        seed_messages(&store, "event_e1", 1_200, NOW - 40 * DAY_MS).await;
        let job = RetentionJob::new(Arc::new(store.clone()));

        let report = job.sweep(NOW).await.unwrap();
        assert_eq!(report.messages_deleted, 1_200);
        assert_eq!(report.batches_committed, 3);
        let left = store
            .query(&Query::new(documents::messages_collection("event_e1")))
            .await
            .unwrap();
        assert!(left.is_empty());
    }

    #[tokio::test]
    async fn exact_multiple_of_the_limit_needs_a_final_empty_query() {
        let store = InMemoryDocumentStore::new();
        seed_messages(&store, "r1", MAX_BATCH_WRITES, NOW - 31 * DAY_MS).await;
        let report = RetentionJob::new(Arc::new(store)).sweep(NOW).await.unwrap();
        assert_eq!(report.messages_deleted, MAX_BATCH_WRITES);
        assert_eq!(report.batches_committed, 1);
    }

    #[tokio::test]
    async fn failing_room_does_not_stop_the_sweep() {
        let inner = InMemoryDocumentStore::new();
        seed_messages(&inner, "broken", 2, NOW - 40 * DAY_MS).await;
        seed_messages(&inner, "healthy", 3, NOW - 40 * DAY_MS).await;
        let store = FaultyStore::new(inner.clone());
        store.fail_commits_touching("chatRooms/broken/");

        let report = RetentionJob::new(Arc::new(store)).sweep(NOW).await.unwrap();
        assert_eq!(report.rooms_scanned, 2);
        assert_eq!(report.rooms_failed, 1);
        assert_eq!(report.messages_deleted, 3);
    }

    #[test]
    fn retention_window_is_configurable() {
        let job = RetentionJob::new(Arc::new(InMemoryDocumentStore::new())).with_retention_days(7);
        assert_eq!(job.cutoff_ms(NOW), NOW - 7 * DAY_MS);
    }
}
