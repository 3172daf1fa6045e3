use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::documents::{self, ChatRoom, Event, EventStatus, fields};
use crate::error::DomainError;
use crate::jobs::now_ms;
use crate::participants::ensure_owner;
use crate::ports::store::{DocumentStore, FieldPath, FieldUpdate, WriteBatch};
use crate::session::SessionSnapshot;

const MAX_TITLE_LENGTH: usize = 200;
const MAX_CAPACITY: u32 = 10_000;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default, rename = "date")]
    pub date_ms: Option<i64>,
    pub max_volunteers: u32,
    #[serde(default)]
    pub with_chat: bool,
    /// Publish later instead of opening registrations immediately.
    #[serde(default)]
    pub draft: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub event_id: String,
    pub user_id: String,
    pub registered: bool,
}

/// Organization event publication and volunteer self-registration.
///
/// Registration only touches the event and user documents; the event chat
/// room catches up through the update trigger.
#[derive(Clone)]
pub struct EventService {
    store: Arc<dyn DocumentStore>,
}

impl EventService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn create_event(
        &self,
        session: &SessionSnapshot,
        draft: EventDraft,
    ) -> DomainResult<Event> {
        let organization_id = session.require_organization()?.to_string();
        let draft = validate_draft(draft)?;
        let organization_path = documents::organization_path(&organization_id);
        if self.store.get(&organization_path).await?.is_none() {
            return Err(DomainError::NotFound(format!(
                "organization {organization_id}"
            )));
        }

        let event = Event {
            id: crate::util::uuid_v7_without_dashes(),
            organization_id: organization_id.clone(),
            title: draft.title,
            description: draft.description,
            location: draft.location,
            date_ms: draft.date_ms,
            status: if draft.draft {
                EventStatus::Draft
            } else {
                EventStatus::Active
            },
            registered_volunteers: vec![],
            max_volunteers: draft.max_volunteers,
            with_chat: draft.with_chat,
            participant_statuses: Default::default(),
            registration_dates: Default::default(),
            has_custom_image: false,
            image_url: None,
            created_at: now_ms(),
        };

        let mut batch = WriteBatch::new();
        batch.set(documents::event_path(&event.id), documents::encode(&event)?)?;
        batch.update(
            organization_path,
            vec![FieldUpdate::array_union(fields::EVENTS, [event.id.as_str()])],
        )?;
        if event.with_chat {
            let room = ChatRoom {
                id: event.chat_room_id(),
                participants: vec![organization_id.clone()],
                admin_id: Some(organization_id.clone()),
                event_id: Some(event.id.clone()),
                name: Some(event.title.clone()),
            };
            batch.set(documents::chat_room_path(&room.id), documents::encode(&room)?)?;
        }
        self.store.commit(batch).await?;
        tracing::info!(
            event_id = %event.id,
            organization_id = %organization_id,
            status = event.status.as_str(),
            with_chat = event.with_chat,
            "event created"
        );
        Ok(event)
    }

    pub async fn transition_event_status(
        &self,
        event_id: &str,
        next: &str,
        acting_organization_id: &str,
    ) -> DomainResult<EventStatus> {
        let next: EventStatus = next.parse()?;
        let event = self.load_event(event_id).await?;
        ensure_owner(&event, acting_organization_id)?;
        let status = event.status.transition(next)?;
        self.store
            .update(
                documents::event_path(event_id),
                vec![FieldUpdate::set(fields::STATUS, status.as_str())],
            )
            .await?;
        tracing::info!(
            event_id,
            from = event.status.as_str(),
            to = status.as_str(),
            "event status changed"
        );
        Ok(status)
    }

    /// Deletes the event document. References are cleaned up by the delete trigger.
    pub async fn delete_event(
        &self,
        event_id: &str,
        acting_organization_id: &str,
    ) -> DomainResult<()> {
        let event = self.load_event(event_id).await?;
        ensure_owner(&event, acting_organization_id)?;
        self.store.delete(documents::event_path(event_id)).await?;
        tracing::info!(event_id, organization_id = acting_organization_id, "event deleted");
        Ok(())
    }

    /// Capacity is checked against the snapshot read here. Two concurrent
    /// registrations for the last spot can both succeed.
    pub async fn register_volunteer(
        &self,
        event_id: &str,
        session: &SessionSnapshot,
    ) -> DomainResult<Registration> {
        let user_id = session.require_volunteer()?;
        let event = self.load_event(event_id).await?;
        if !event.status.accepts_registrations() {
            return Err(DomainError::InvalidState(format!(
                "event {event_id} is {} and not open for registration",
                event.status
            )));
        }
        if event.is_registered(user_id) {
            return Err(DomainError::InvalidState(format!(
                "already registered for event {event_id}"
            )));
        }
        if event.is_full() {
            return Err(DomainError::InvalidState(format!("event {event_id} is full")));
        }
        let user_path = documents::user_path(user_id);
        if self.store.get(&user_path).await?.is_none() {
            return Err(DomainError::NotFound(format!("user {user_id}")));
        }

        let mut batch = WriteBatch::new();
        batch.update(
            documents::event_path(event_id),
            vec![
                FieldUpdate::array_union(fields::REGISTERED_VOLUNTEERS, [user_id]),
                FieldUpdate::server_timestamp(FieldPath::new([
                    fields::REGISTRATION_DATES,
                    user_id,
                ])),
            ],
        )?;
        batch.update(
            user_path,
            vec![FieldUpdate::array_union(fields::REGISTERED_EVENTS, [event_id])],
        )?;
        self.store.commit(batch).await?;
        tracing::info!(event_id, user_id, "volunteer registered");
        Ok(Registration {
            event_id: event_id.to_string(),
            user_id: user_id.to_string(),
            registered: true,
        })
    }

    pub async fn unregister_volunteer(
        &self,
        event_id: &str,
        session: &SessionSnapshot,
    ) -> DomainResult<Registration> {
        let user_id = session.require_volunteer()?;
        let event = self.load_event(event_id).await?;
        if !event.is_registered(user_id) {
            return Err(DomainError::InvalidState(format!(
                "not registered for event {event_id}"
            )));
        }

        let mut batch = WriteBatch::new();
        batch.update(
            documents::event_path(event_id),
            vec![
                FieldUpdate::array_remove(fields::REGISTERED_VOLUNTEERS, [user_id]),
                FieldUpdate::delete(FieldPath::new([fields::REGISTRATION_DATES, user_id])),
            ],
        )?;
        let user_path = documents::user_path(user_id);
        if self.store.get(&user_path).await?.is_some() {
            batch.update(
                user_path,
                vec![FieldUpdate::array_remove(fields::REGISTERED_EVENTS, [event_id])],
            )?;
        }
        self.store.commit(batch).await?;
        tracing::info!(event_id, user_id, "volunteer unregistered");
        Ok(Registration {
            event_id: event_id.to_string(),
            user_id: user_id.to_string(),
            registered: false,
        })
    }

    async fn load_event(&self, event_id: &str) -> DomainResult<Event> {
        let snapshot = self
            .store
            .get(&documents::event_path(event_id))
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("event {event_id}")))?;
        documents::decode(&snapshot)
    }
}

fn validate_draft(draft: EventDraft) -> DomainResult<EventDraft> {
    let title = draft.title.trim().to_string();
    if title.is_empty() {
        return Err(DomainError::InvalidArgument("title is required".into()));
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(DomainError::InvalidArgument(format!(
            "title exceeds max length of {MAX_TITLE_LENGTH}"
        )));
    }
    if draft.max_volunteers == 0 || draft.max_volunteers > MAX_CAPACITY {
        return Err(DomainError::InvalidArgument(format!(
            "maxVolunteers must be between 1 and {MAX_CAPACITY}"
        )));
    }
    Ok(EventDraft { title, ..draft })
}
