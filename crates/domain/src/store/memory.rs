use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, RwLock};

use crate::jobs::now_ms;
use crate::ports::BoxFuture;
use crate::ports::store::{
    ChangeEntry, DocumentChange, DocumentPath, DocumentSnapshot, DocumentStore, Fields, Query,
    StoreError, WriteBatch,
};
use crate::store::engine;

/// Committed changes kept until every known consumer has acknowledged them.
#[derive(Default)]
struct ChangeLog {
    next_seq: u64,
    entries: VecDeque<(u64, DocumentChange)>,
    cursors: BTreeMap<String, u64>,
}

impl ChangeLog {
    fn append(&mut self, change: DocumentChange) {
        self.next_seq += 1;
        self.entries.push_back((self.next_seq, change));
    }

    fn pending(&mut self, consumer: &str, limit: usize) -> Vec<ChangeEntry> {
        let cursor = *self.cursors.entry(consumer.to_string()).or_insert(0);
        self.entries
            .iter()
            .filter(|(seq, _)| *seq > cursor)
            .take(limit)
            .map(|(seq, change)| ChangeEntry {
                id: seq.to_string(),
                change: change.clone(),
            })
            .collect()
    }

    fn ack(&mut self, consumer: &str, seq: u64) {
        let cursor = self.cursors.entry(consumer.to_string()).or_insert(0);
        *cursor = (*cursor).max(seq);
        let Some(oldest_needed) = self.cursors.values().min().copied() else {
            return;
        };
        while self
            .entries
            .front()
            .is_some_and(|(seq, _)| *seq <= oldest_needed)
        {
            self.entries.pop_front();
        }
    }
}

/// Process-local document store used for development and tests.
#[derive(Clone)]
pub struct InMemoryDocumentStore {
    docs: Arc<RwLock<BTreeMap<DocumentPath, Fields>>>,
    log: Arc<Mutex<ChangeLog>>,
    appended: Arc<Notify>,
    commits: Arc<RwLock<usize>>,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            docs: Arc::new(RwLock::new(BTreeMap::new())),
            log: Arc::new(Mutex::new(ChangeLog::default())),
            appended: Arc::new(Notify::new()),
            commits: Arc::new(RwLock::new(0)),
        }
    }

    /// Number of successful commits so far.
    pub async fn commit_count(&self) -> usize {
        *self.commits.read().await
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn get(
        &self,
        path: &DocumentPath,
    ) -> BoxFuture<'_, Result<Option<DocumentSnapshot>, StoreError>> {
        let path = path.clone();
        let docs = self.docs.clone();
        Box::pin(async move {
            let docs = docs.read().await;
            Ok(docs.get(&path).map(|fields| DocumentSnapshot {
                path: path.clone(),
                fields: fields.clone(),
            }))
        })
    }

    fn query(&self, query: &Query) -> BoxFuture<'_, Result<Vec<DocumentSnapshot>, StoreError>> {
        let query = query.clone();
        let docs = self.docs.clone();
        Box::pin(async move {
            let docs = docs.read().await;
            let candidates = docs
                .iter()
                .filter(|(path, _)| path.collection() == query.collection)
                .map(|(path, fields)| DocumentSnapshot {
                    path: path.clone(),
                    fields: fields.clone(),
                })
                .collect();
            Ok(engine::run_query(&query, candidates))
        })
    }

    fn commit(&self, batch: WriteBatch) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut docs = self.docs.write().await;
            let current: BTreeMap<DocumentPath, Option<Fields>> = batch
                .writes()
                .iter()
                .map(|write| (write.path().clone(), docs.get(write.path()).cloned()))
                .collect();
            let staged = engine::stage_batch(&current, batch.writes(), now_ms())?;
            let changes = engine::diff_changes(&current, &staged);
            for (path, next) in staged {
                match next {
                    Some(fields) => {
                        docs.insert(path, fields);
                    }
                    None => {
                        docs.remove(&path);
                    }
                }
            }
            *self.commits.write().await += 1;
            // Appended under the document lock so the log follows commit order.
            if !changes.is_empty() {
                let mut log = self.log.lock().await;
                for change in changes {
                    log.append(change);
                }
                self.appended.notify_waiters();
            }
            Ok(())
        })
    }

    fn read_changes(
        &self,
        consumer: &str,
        limit: usize,
        wait: Duration,
    ) -> BoxFuture<'_, Result<Vec<ChangeEntry>, StoreError>> {
        let consumer = consumer.to_string();
        Box::pin(async move {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let pending = self.log.lock().await.pending(&consumer, limit);
            if !pending.is_empty() || wait.is_zero() {
                return Ok(pending);
            }
            let _ = tokio::time::timeout(wait, notified).await;
            Ok(self.log.lock().await.pending(&consumer, limit))
        })
    }

    fn ack_changes(&self, consumer: &str, id: &str) -> BoxFuture<'_, Result<(), StoreError>> {
        let consumer = consumer.to_string();
        let seq = id.parse::<u64>();
        let id = id.to_string();
        Box::pin(async move {
            let seq = seq.map_err(|_| StoreError::Operation(format!("invalid change id '{id}'")))?;
            self.log.lock().await.ack(&consumer, seq);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::store::{ChangeKind, FieldUpdate};
    use serde_json::json;

    const NO_WAIT: Duration = Duration::ZERO;

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn failed_batch_applies_nothing() {
        let store = InMemoryDocumentStore::new();
        let event = DocumentPath::new("events", "e1");
        store
            .set(event.clone(), fields(json!({"registeredVolunteers": ["u1"]})), false)
            .await
            .unwrap();

        let mut batch = WriteBatch::new();
        batch
            .update(
                event.clone(),
                vec![FieldUpdate::array_remove("registeredVolunteers", ["u1"])],
            )
            .unwrap();
        batch
            .update(
                DocumentPath::new("users", "missing"),
                vec![FieldUpdate::array_remove("registeredEvents", ["e1"])],
            )
            .unwrap();

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        let snapshot = store.get(&event).await.unwrap().unwrap();
        assert_eq!(snapshot.fields["registeredVolunteers"], json!(["u1"]));
        assert_eq!(store.commit_count().await, 1);
    }

    #[tokio::test]
    async fn committed_writes_are_logged_in_order() {
        let store = InMemoryDocumentStore::new();
        let path = DocumentPath::new("events", "e1");
        store
            .set(path.clone(), fields(json!({"title": "cleanup"})), false)
            .await
            .unwrap();
        store.delete(path.clone()).await.unwrap();

        let entries = store.read_changes("triggers", 10, NO_WAIT).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].change.kind(), ChangeKind::Created);
        assert_eq!(entries[1].change.kind(), ChangeKind::Deleted);
        assert_eq!(entries[1].change.before.as_ref().unwrap()["title"], json!("cleanup"));
    }

    #[tokio::test]
    async fn unacknowledged_changes_are_read_again() {
        let store = InMemoryDocumentStore::new();
        for id in ["e1", "e2", "e3"] {
            store
                .set(DocumentPath::new("events", id), Fields::new(), false)
                .await
                .unwrap();
        }

        let first = store.read_changes("triggers", 2, NO_WAIT).await.unwrap();
        assert_eq!(first.len(), 2);
        let again = store.read_changes("triggers", 2, NO_WAIT).await.unwrap();
        assert_eq!(again, first);

        store.ack_changes("triggers", &first[1].id).await.unwrap();
        let rest = store.read_changes("triggers", 10, NO_WAIT).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].change.path.id(), "e3");
        assert!(store.ack_changes("triggers", "not-a-number").await.is_err());
    }

    #[tokio::test]
    async fn consumers_keep_independent_cursors_past_any_backlog() {
        let store = InMemoryDocumentStore::new();
        let mut batch = WriteBatch::new();
        for index in 0..500 {
            batch
                .set(DocumentPath::new("messages", &format!("m{index:03}")), Fields::new())
                .unwrap();
        }
        store.read_changes("audit", 1, NO_WAIT).await.unwrap();
        store.commit(batch.clone()).await.unwrap();
        for write in batch.writes() {
            store.delete(write.path().clone()).await.unwrap();
        }

        let mut seen = 0;
        loop {
            let entries = store.read_changes("triggers", 128, NO_WAIT).await.unwrap();
            let Some(last) = entries.last() else {
                break;
            };
            seen += entries.len();
            store.ack_changes("triggers", &last.id).await.unwrap();
        }
        assert_eq!(seen, 1_000);
        let other = store.read_changes("audit", 2_000, NO_WAIT).await.unwrap();
        assert_eq!(other.len(), 1_000);
    }

    #[tokio::test]
    async fn waiting_reader_wakes_on_commit() {
        let store = InMemoryDocumentStore::new();
        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .read_changes("triggers", 10, Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };
        tokio::task::yield_now().await;
        store
            .set(DocumentPath::new("events", "e1"), Fields::new(), false)
            .await
            .unwrap();
        let entries = reader.await.unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn query_only_sees_direct_children() {
        let store = InMemoryDocumentStore::new();
        store
            .set(DocumentPath::new("chatRooms", "r1"), Fields::new(), false)
            .await
            .unwrap();
        store
            .set(
                DocumentPath::new("chatRooms", "r1")
                    .subcollection("messages")
                    .doc("m1"),
                Fields::new(),
                false,
            )
            .await
            .unwrap();
        let rooms = store
            .query(&Query::new(crate::ports::store::CollectionPath::root("chatRooms")))
            .await
            .unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].id(), "r1");
    }
}
