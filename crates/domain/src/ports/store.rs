use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::BoxFuture;

/// Hard cap on writes in one atomic commit.
pub const MAX_BATCH_WRITES: usize = 500;

pub type Fields = Map<String, Value>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("batch exceeds {MAX_BATCH_WRITES} writes")]
    BatchLimitExceeded,
    #[error("invalid document path: {0}")]
    InvalidPath(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store serialization error: {0}")]
    Serialization(String),
    #[error("store commit conflict: {0}")]
    Conflict(String),
    #[error("store operation failed: {0}")]
    Operation(String),
}

/// Slash separated path to a document, e.g. `chatRooms/event_e1/messages/m1`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentPath(String);

impl DocumentPath {
    pub fn new(collection: &str, id: &str) -> Self {
        Self(format!("{collection}/{id}"))
    }

    pub fn parse(path: &str) -> Result<Self, StoreError> {
        let segments: Vec<&str> = path.split('/').collect();
        if segments.len() % 2 != 0 || segments.iter().any(|segment| segment.is_empty()) {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(Self(path.to_string()))
    }

    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    pub fn collection(&self) -> CollectionPath {
        match self.0.rsplit_once('/') {
            Some((collection, _)) => CollectionPath(collection.to_string()),
            None => CollectionPath(String::new()),
        }
    }

    pub fn subcollection(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{name}", self.0))
    }

    pub fn segments(&self) -> Vec<&str> {
        self.0.split('/').collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DocumentPath {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DocumentPath> for String {
    fn from(value: DocumentPath) -> Self {
        value.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn root(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn doc(&self, id: &str) -> DocumentPath {
        DocumentPath(format!("{}/{id}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum FieldOp {
    Set(Value),
    ArrayUnion(Vec<Value>),
    ArrayRemove(Vec<Value>),
    ServerTimestamp,
    Delete,
}

/// Path to a field as literal segments into nested maps.
///
/// Segments are never split, so map keys built from ids such as `jane.doe`
/// address a single entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for FieldPath {
    fn from(field: &str) -> Self {
        Self(vec![field.to_string()])
    }
}

impl From<String> for FieldPath {
    fn from(field: String) -> Self {
        Self(vec![field])
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// A single field mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub field: FieldPath,
    pub op: FieldOp,
}

impl FieldUpdate {
    pub fn set(field: impl Into<FieldPath>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FieldOp::Set(value.into()),
        }
    }

    pub fn array_union<I, V>(field: impl Into<FieldPath>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            field: field.into(),
            op: FieldOp::ArrayUnion(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn array_remove<I, V>(field: impl Into<FieldPath>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            field: field.into(),
            op: FieldOp::ArrayRemove(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn server_timestamp(field: impl Into<FieldPath>) -> Self {
        Self {
            field: field.into(),
            op: FieldOp::ServerTimestamp,
        }
    }

    pub fn delete(field: impl Into<FieldPath>) -> Self {
        Self {
            field: field.into(),
            op: FieldOp::Delete,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Write {
    Set {
        path: DocumentPath,
        fields: Fields,
        merge: bool,
    },
    Update {
        path: DocumentPath,
        updates: Vec<FieldUpdate>,
    },
    Delete {
        path: DocumentPath,
    },
}

impl Write {
    pub fn path(&self) -> &DocumentPath {
        match self {
            Self::Set { path, .. } | Self::Update { path, .. } | Self::Delete { path } => path,
        }
    }
}

/// Writes applied all-or-nothing by [`DocumentStore::commit`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: Write) -> Result<(), StoreError> {
        if self.writes.len() >= MAX_BATCH_WRITES {
            return Err(StoreError::BatchLimitExceeded);
        }
        self.writes.push(write);
        Ok(())
    }

    pub fn set(&mut self, path: DocumentPath, fields: Fields) -> Result<(), StoreError> {
        self.push(Write::Set {
            path,
            fields,
            merge: false,
        })
    }

    pub fn update(
        &mut self,
        path: DocumentPath,
        updates: Vec<FieldUpdate>,
    ) -> Result<(), StoreError> {
        self.push(Write::Update { path, updates })
    }

    pub fn delete(&mut self, path: DocumentPath) -> Result<(), StoreError> {
        self.push(Write::Delete { path })
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn remaining(&self) -> usize {
        MAX_BATCH_WRITES - self.writes.len()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Lt,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub collection: CollectionPath,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: vec![],
            order_by: None,
            limit: None,
        }
    }

    fn filter(
        mut self,
        field: impl Into<String>,
        op: FilterOp,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    pub fn where_lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Lt, value)
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub path: DocumentPath,
    pub fields: Fields,
}

impl DocumentSnapshot {
    pub fn id(&self) -> &str {
        self.path.id()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// One committed document transition as delivered to listeners.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentChange {
    pub path: DocumentPath,
    pub before: Option<Fields>,
    pub after: Option<Fields>,
}

impl DocumentChange {
    pub fn kind(&self) -> ChangeKind {
        match (&self.before, &self.after) {
            (None, _) => ChangeKind::Created,
            (Some(_), Some(_)) => ChangeKind::Updated,
            (Some(_), None) => ChangeKind::Deleted,
        }
    }
}

/// A committed change as recorded in the store's change log.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEntry {
    /// Position in the log, opaque to consumers and increasing in commit order.
    pub id: String,
    pub change: DocumentChange,
}

pub trait DocumentStore: Send + Sync {
    fn get(&self, path: &DocumentPath)
    -> BoxFuture<'_, Result<Option<DocumentSnapshot>, StoreError>>;

    fn query(&self, query: &Query) -> BoxFuture<'_, Result<Vec<DocumentSnapshot>, StoreError>>;

    /// Applies `batch` atomically and appends its changes to the change log.
    fn commit(&self, batch: WriteBatch) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Up to `limit` changes committed after the last entry `consumer`
    /// acknowledged, oldest first. Waits up to `wait` when none are pending.
    /// Unacknowledged entries are returned again on the next read, also after
    /// a restart.
    fn read_changes(
        &self,
        consumer: &str,
        limit: usize,
        wait: Duration,
    ) -> BoxFuture<'_, Result<Vec<ChangeEntry>, StoreError>>;

    /// Moves `consumer` past `id`. Entries every consumer has passed may be
    /// discarded.
    fn ack_changes(&self, consumer: &str, id: &str) -> BoxFuture<'_, Result<(), StoreError>>;

    fn set(
        &self,
        path: DocumentPath,
        fields: Fields,
        merge: bool,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        let mut batch = WriteBatch::new();
        if let Err(err) = batch.push(Write::Set {
            path,
            fields,
            merge,
        }) {
            return Box::pin(async move { Err(err) });
        }
        self.commit(batch)
    }

    fn update(
        &self,
        path: DocumentPath,
        updates: Vec<FieldUpdate>,
    ) -> BoxFuture<'_, Result<(), StoreError>> {
        let mut batch = WriteBatch::new();
        if let Err(err) = batch.update(path, updates) {
            return Box::pin(async move { Err(err) });
        }
        self.commit(batch)
    }

    fn delete(&self, path: DocumentPath) -> BoxFuture<'_, Result<(), StoreError>> {
        let mut batch = WriteBatch::new();
        if let Err(err) = batch.delete(path) {
            return Box::pin(async move { Err(err) });
        }
        self.commit(batch)
    }
}
