//! Reactions to committed document changes.
//!
//! [`TriggerDispatcher`] reads the store's change log and routes each change
//! to the matching handler. A page of changes is acknowledged only after its
//! handlers ran, so changes committed while no dispatcher is running are
//! handled once one starts. Handlers are idempotent with respect to replays:
//! removing an id twice or deleting a missing document leaves the same state.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::documents::{self, ChatMessage, Event, collections, fields};
use crate::error::DomainError;
use crate::mentions::MentionNotifier;
use crate::ports::media::MediaStorage;
use crate::ports::store::{
    ChangeKind, CollectionPath, DocumentChange, DocumentSnapshot, DocumentStore, FieldUpdate,
    Fields, MAX_BATCH_WRITES, Query, StoreError, Write, WriteBatch,
};

/// Change log consumer shared by every trigger dispatcher.
pub const TRIGGER_CONSUMER: &str = "triggers";
const CHANGE_PAGE_SIZE: usize = 256;
const CHANGE_POLL_WAIT: Duration = Duration::from_secs(5);
const CHANGE_READ_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ImageCleanup {
    NotRequested,
    Deleted,
    Failed { error: String },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CascadeReport {
    pub event_id: String,
    pub documents_updated: usize,
    pub documents_deleted: usize,
    pub messages_deleted: usize,
    pub batches_committed: usize,
    pub image: ImageCleanup,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MembershipSync {
    Unchanged,
    ChatDisabled,
    RoomMissing,
    Synced {
        added: Vec<String>,
        removed: Vec<String>,
    },
}

/// Registration changes between two versions of an event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub newly_added: Vec<String>,
    pub newly_removed: Vec<String>,
}

impl MembershipDiff {
    pub fn between(before: &[String], after: &[String]) -> Self {
        let before_set: BTreeSet<&String> = before.iter().collect();
        let after_set: BTreeSet<&String> = after.iter().collect();
        Self {
            newly_added: after
                .iter()
                .filter(|id| !before_set.contains(id))
                .cloned()
                .collect(),
            newly_removed: before
                .iter()
                .filter(|id| !after_set.contains(id))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.newly_added.is_empty() && self.newly_removed.is_empty()
    }
}

#[derive(Clone)]
pub struct EventTriggers {
    store: Arc<dyn DocumentStore>,
    media: Arc<dyn MediaStorage>,
}

impl EventTriggers {
    pub fn new(store: Arc<dyn DocumentStore>, media: Arc<dyn MediaStorage>) -> Self {
        Self { store, media }
    }

    /// Removes everything that referenced a deleted event.
    ///
    /// Metadata writes (organization and user back-references) go first. A
    /// cascade that fits in one batch is committed atomically; a larger one is
    /// committed in order in chunks of [`MAX_BATCH_WRITES`].
    pub async fn on_event_deleted(
        &self,
        event_id: &str,
        deleted: &Event,
    ) -> DomainResult<CascadeReport> {
        let mut writes = Vec::new();

        let organization_path = documents::organization_path(&deleted.organization_id);
        if self.store.get(&organization_path).await?.is_some() {
            writes.push(Write::Update {
                path: organization_path,
                updates: vec![FieldUpdate::array_remove(fields::EVENTS, [event_id])],
            });
        }
        for user_id in &deleted.registered_volunteers {
            let user_path = documents::user_path(user_id);
            if self.store.get(&user_path).await?.is_none() {
                continue;
            }
            writes.push(Write::Update {
                path: user_path,
                updates: vec![FieldUpdate::array_remove(fields::REGISTERED_EVENTS, [event_id])],
            });
        }
        let documents_updated = writes.len();

        for collection in [
            collections::NOTIFICATIONS,
            collections::ACTIVITIES,
            collections::APPLICATIONS,
        ] {
            let query = Query::new(CollectionPath::root(collection))
                .where_eq(fields::EVENT_ID, event_id);
            for snapshot in self.store.query(&query).await? {
                writes.push(Write::Delete {
                    path: snapshot.path,
                });
            }
        }

        let room_path = documents::chat_room_path(&documents::event_chat_room_id(event_id));
        let mut messages_deleted = 0;
        if self.store.get(&room_path).await?.is_some() {
            let messages = self
                .store
                .query(&Query::new(room_path.subcollection(collections::MESSAGES)))
                .await?;
            messages_deleted = messages.len();
            writes.extend(messages.into_iter().map(|snapshot| Write::Delete {
                path: snapshot.path,
            }));
            writes.push(Write::Delete { path: room_path });
        }
        let documents_deleted = writes.len() - documents_updated;

        let batches_committed = self.commit_in_chunks(writes).await?;
        tracing::info!(
            event_id,
            documents_updated,
            documents_deleted,
            messages_deleted,
            batches_committed,
            "event deletion cascade committed"
        );

        let image = if deleted.has_custom_image {
            let object_key = documents::event_image_key(event_id);
            match self.media.delete(&object_key).await {
                Ok(()) => ImageCleanup::Deleted,
                Err(err) => {
                    tracing::error!(
                        event_id,
                        object_key = %object_key,
                        backend = self.media.name(),
                        error = %err,
                        "failed to delete event image"
                    );
                    ImageCleanup::Failed {
                        error: err.to_string(),
                    }
                }
            }
        } else {
            ImageCleanup::NotRequested
        };

        Ok(CascadeReport {
            event_id: event_id.to_string(),
            documents_updated,
            documents_deleted,
            messages_deleted,
            batches_committed,
            image,
        })
    }

    async fn commit_in_chunks(&self, writes: Vec<Write>) -> DomainResult<usize> {
        let mut committed = 0;
        let mut pending = writes.into_iter().peekable();
        while pending.peek().is_some() {
            let mut batch = WriteBatch::new();
            while batch.len() < MAX_BATCH_WRITES {
                let Some(write) = pending.next() else {
                    break;
                };
                batch.push(write)?;
            }
            self.store.commit(batch).await?;
            committed += 1;
        }
        Ok(committed)
    }

    /// Mirrors registration changes into the event chat room.
    pub async fn on_event_updated(
        &self,
        event_id: &str,
        before: &Event,
        after: &Event,
    ) -> DomainResult<MembershipSync> {
        let diff =
            MembershipDiff::between(&before.registered_volunteers, &after.registered_volunteers);
        if diff.is_empty() {
            return Ok(MembershipSync::Unchanged);
        }
        if !after.with_chat {
            return Ok(MembershipSync::ChatDisabled);
        }
        let room_path = documents::chat_room_path(&documents::event_chat_room_id(event_id));
        if self.store.get(&room_path).await?.is_none() {
            tracing::warn!(event_id, "event chat room missing, membership not synced");
            return Ok(MembershipSync::RoomMissing);
        }

        let mut updates = Vec::with_capacity(2);
        if !diff.newly_added.is_empty() {
            updates.push(FieldUpdate::array_union(
                fields::PARTICIPANTS,
                diff.newly_added.iter().map(String::as_str),
            ));
        }
        if !diff.newly_removed.is_empty() {
            updates.push(FieldUpdate::array_remove(
                fields::PARTICIPANTS,
                diff.newly_removed.iter().map(String::as_str),
            ));
        }
        self.store.update(room_path, updates).await?;
        tracing::info!(
            event_id,
            added = diff.newly_added.len(),
            removed = diff.newly_removed.len(),
            "event chat membership synced"
        );
        Ok(MembershipSync::Synced {
            added: diff.newly_added,
            removed: diff.newly_removed,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerKind {
    EventDeleted,
    EventUpdated,
    MessageCreated,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EventDeleted => "event_deleted",
            Self::EventUpdated => "event_updated",
            Self::MessageCreated => "message_created",
        }
    }

    /// The trigger a committed change should fire, if any.
    pub fn route(change: &DocumentChange) -> Option<Self> {
        let segments = change.path.segments();
        match (segments.as_slice(), change.kind()) {
            ([collection, _], ChangeKind::Deleted) if *collection == collections::EVENTS => {
                Some(Self::EventDeleted)
            }
            ([collection, _], ChangeKind::Updated) if *collection == collections::EVENTS => {
                Some(Self::EventUpdated)
            }
            ([rooms, _, messages, _], ChangeKind::Created)
                if *rooms == collections::CHAT_ROOMS && *messages == collections::MESSAGES =>
            {
                Some(Self::MessageCreated)
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Ignored,
    Handled(TriggerKind),
    Failed(TriggerKind, String),
}

#[derive(Clone)]
pub struct TriggerDispatcher {
    events: EventTriggers,
    mentions: MentionNotifier,
}

impl TriggerDispatcher {
    pub fn new(events: EventTriggers, mentions: MentionNotifier) -> Self {
        Self { events, mentions }
    }

    /// Runs the handler for `change`. Handler errors are logged and reported,
    /// never returned.
    pub async fn dispatch(&self, change: &DocumentChange) -> DispatchOutcome {
        let Some(kind) = TriggerKind::route(change) else {
            return DispatchOutcome::Ignored;
        };
        match self.handle(kind, change).await {
            Ok(()) => DispatchOutcome::Handled(kind),
            Err(err) => {
                tracing::error!(
                    trigger = kind.as_str(),
                    path = %change.path,
                    error = %err,
                    "trigger failed"
                );
                DispatchOutcome::Failed(kind, err.to_string())
            }
        }
    }

    /// Handles the next page of unacknowledged changes from `feed`, then
    /// acknowledges it. Returns the number of log entries consumed.
    pub async fn drain_once<F>(
        &self,
        feed: &dyn DocumentStore,
        wait: Duration,
        on_outcome: &mut F,
    ) -> Result<usize, StoreError>
    where
        F: FnMut(&DispatchOutcome),
    {
        let entries = feed
            .read_changes(TRIGGER_CONSUMER, CHANGE_PAGE_SIZE, wait)
            .await?;
        let Some(last) = entries.last() else {
            return Ok(0);
        };
        for entry in &entries {
            let outcome = self.dispatch(&entry.change).await;
            if outcome != DispatchOutcome::Ignored {
                on_outcome(&outcome);
            }
        }
        feed.ack_changes(TRIGGER_CONSUMER, &last.id).await?;
        Ok(entries.len())
    }

    /// Consumes the change log of `feed` until `shutdown` resolves. A page cut
    /// short by shutdown stays unacknowledged and is handled again next run.
    pub async fn run<F, S>(&self, feed: Arc<dyn DocumentStore>, shutdown: S, mut on_outcome: F)
    where
        F: FnMut(&DispatchOutcome) + Send,
        S: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("trigger dispatcher stopping");
                    return;
                }
                result = self.drain_once(feed.as_ref(), CHANGE_POLL_WAIT, &mut on_outcome) => {
                    if let Err(err) = result {
                        tracing::warn!(error = %err, "reading the change log failed");
                        tokio::time::sleep(CHANGE_READ_RETRY_DELAY).await;
                    }
                }
            }
        }
    }

    async fn handle(&self, kind: TriggerKind, change: &DocumentChange) -> DomainResult<()> {
        let segments = change.path.segments();
        match kind {
            TriggerKind::EventDeleted => {
                let deleted: Event = decode_side(change, change.before.as_ref())?;
                self.events.on_event_deleted(change.path.id(), &deleted).await?;
            }
            TriggerKind::EventUpdated => {
                let before: Event = decode_side(change, change.before.as_ref())?;
                let after: Event = decode_side(change, change.after.as_ref())?;
                self.events
                    .on_event_updated(change.path.id(), &before, &after)
                    .await?;
            }
            TriggerKind::MessageCreated => {
                let message: ChatMessage = decode_side(change, change.after.as_ref())?;
                let chat_room_id = segments.get(1).copied().unwrap_or_default();
                self.mentions.on_message_created(chat_room_id, &message).await?;
            }
        }
        Ok(())
    }
}

fn decode_side<T>(change: &DocumentChange, side: Option<&Fields>) -> DomainResult<T>
where
    T: serde::de::DeserializeOwned,
{
    let fields = side.cloned().ok_or_else(|| {
        DomainError::Internal(format!("change for {} is missing a document side", change.path))
    })?;
    documents::decode(&DocumentSnapshot {
        path: change.path.clone(),
        fields,
    })
}
