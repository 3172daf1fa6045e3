use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::ports::BoxFuture;
use crate::ports::media::{MediaError, MediaStorage};
use crate::ports::store::{
    ChangeEntry, DocumentPath, DocumentSnapshot, DocumentStore, Fields, Query, StoreError,
    WriteBatch,
};
use crate::store::InMemoryDocumentStore;

pub fn fields(value: Value) -> Fields {
    value.as_object().cloned().expect("fixture must be a JSON object")
}

pub async fn seed(store: &dyn DocumentStore, path: &str, value: Value) {
    store
        .set(DocumentPath::parse(path).unwrap(), fields(value), false)
        .await
        .unwrap();
}

pub async fn read(store: &dyn DocumentStore, path: &str) -> Option<Fields> {
    store
        .get(&DocumentPath::parse(path).unwrap())
        .await
        .unwrap()
        .map(|snapshot| snapshot.fields)
}

/// Wraps the in-memory store and rejects commits that touch a chosen path prefix.
#[derive(Clone)]
pub struct FaultyStore {
    pub inner: InMemoryDocumentStore,
    failing_prefixes: Arc<Mutex<Vec<String>>>,
    rejected: Arc<Mutex<usize>>,
}

impl FaultyStore {
    pub fn new(inner: InMemoryDocumentStore) -> Self {
        Self {
            inner,
            failing_prefixes: Arc::new(Mutex::new(vec![])),
            rejected: Arc::new(Mutex::new(0)),
        }
    }

    pub fn fail_commits_touching(&self, prefix: &str) {
        self.failing_prefixes.lock().unwrap().push(prefix.to_string());
    }

    pub fn rejected_commits(&self) -> usize {
        *self.rejected.lock().unwrap()
    }
}

impl DocumentStore for FaultyStore {
    fn get(
        &self,
        path: &DocumentPath,
    ) -> BoxFuture<'_, Result<Option<DocumentSnapshot>, StoreError>> {
        self.inner.get(path)
    }

    fn query(&self, query: &Query) -> BoxFuture<'_, Result<Vec<DocumentSnapshot>, StoreError>> {
        self.inner.query(query)
    }

    fn commit(&self, batch: WriteBatch) -> BoxFuture<'_, Result<(), StoreError>> {
        let prefixes = self.failing_prefixes.lock().unwrap().clone();
        let touches_failing = batch.writes().iter().any(|write| {
            prefixes
                .iter()
                .any(|prefix| write.path().as_str().starts_with(prefix.as_str()))
        });
        if touches_failing {
            *self.rejected.lock().unwrap() += 1;
            return Box::pin(async { Err(StoreError::Unavailable("injected failure".into())) });
        }
        self.inner.commit(batch)
    }

    fn read_changes(
        &self,
        consumer: &str,
        limit: usize,
        wait: Duration,
    ) -> BoxFuture<'_, Result<Vec<ChangeEntry>, StoreError>> {
        self.inner.read_changes(consumer, limit, wait)
    }

    fn ack_changes(&self, consumer: &str, id: &str) -> BoxFuture<'_, Result<(), StoreError>> {
        self.inner.ack_changes(consumer, id)
    }
}

#[derive(Clone, Default)]
pub struct RecordingMedia {
    pub deleted: Arc<Mutex<Vec<String>>>,
    pub fail: bool,
}

impl RecordingMedia {
    pub fn failing() -> Self {
        Self {
            deleted: Arc::default(),
            fail: true,
        }
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

impl MediaStorage for RecordingMedia {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn delete(&self, object_key: &str) -> BoxFuture<'_, Result<(), MediaError>> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            if self.fail {
                return Err(MediaError::Unavailable("bucket offline".into()));
            }
            self.deleted.lock().unwrap().push(object_key);
            Ok(())
        })
    }
}
