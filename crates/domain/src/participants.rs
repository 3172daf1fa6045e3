//! Participant consistency between events, users and event chat rooms.
//!
//! Removal runs in two tiers. The event and user documents change together in
//! one atomic batch; the chat room is reconciled afterwards and a failure there
//! is reported on the [`RemovalOutcome`] instead of undoing the removal.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::documents::{
    self, Event, ParticipantStatus, ParticipantStatusEntry, User, collections, fields,
};
use crate::error::DomainError;
use crate::jobs::now_ms;
use crate::session::SessionSnapshot;
use crate::ports::store::{
    CollectionPath, DocumentStore, FieldPath, FieldUpdate, Query, WriteBatch,
};

const RECENT_REGISTRATION_WINDOW_MS: i64 = 7 * 24 * 60 * 60 * 1_000;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    pub id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub skills: Vec<String>,
    pub participation_status: ParticipantStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_date: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantStats {
    pub total_participants: usize,
    pub max_capacity: u32,
    pub available_spots: u32,
    pub fill_percentage: u32,
    pub recent_registrations: usize,
    pub participants_with_skills: usize,
}

impl ParticipantStats {
    pub fn from_participants(
        event: &Event,
        participants: &[ParticipantRecord],
        now_ms: i64,
    ) -> Self {
        let recent_since = now_ms - RECENT_REGISTRATION_WINDOW_MS;
        let recent_registrations = participants
            .iter()
            .filter(|participant| {
                participant
                    .registration_date
                    .is_some_and(|registered_at| registered_at >= recent_since)
            })
            .count();
        let participants_with_skills = participants
            .iter()
            .filter(|participant| !participant.skills.is_empty())
            .count();
        Self::with_counts(
            participants.len(),
            event.max_volunteers,
            recent_registrations,
            participants_with_skills,
        )
    }

    /// Stats derived from the membership array alone.
    pub fn from_registrations(event: &Event) -> Self {
        Self::with_counts(event.registered_volunteers.len(), event.max_volunteers, 0, 0)
    }

    fn with_counts(
        total_participants: usize,
        max_capacity: u32,
        recent_registrations: usize,
        participants_with_skills: usize,
    ) -> Self {
        let total = u32::try_from(total_participants).unwrap_or(u32::MAX);
        let fill_percentage = if max_capacity == 0 {
            0
        } else {
            (100.0 * f64::from(total) / f64::from(max_capacity)).round() as u32
        };
        Self {
            total_participants,
            max_capacity,
            available_spots: max_capacity.saturating_sub(total),
            fill_percentage,
            recent_registrations,
            participants_with_skills,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemovalOutcome {
    pub removed: bool,
    /// False when the event chat room could not be updated.
    pub chat_synced: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BulkRemovalError {
    pub participant_id: String,
    pub error: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BulkRemovalReport {
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<BulkRemovalError>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EventWithStats {
    pub event: Event,
    pub stats: ParticipantStats,
}

#[derive(Clone)]
pub struct ParticipantService {
    store: Arc<dyn DocumentStore>,
}

impl ParticipantService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Participants of an event. Only the owning organization or an admin may
    /// look.
    pub async fn list_participants(
        &self,
        event_id: &str,
        viewer: &SessionSnapshot,
    ) -> DomainResult<Vec<ParticipantRecord>> {
        let event = self.load_event(event_id).await?;
        ensure_viewer(&event, viewer)?;
        self.participants_of(&event).await
    }

    pub async fn participant_stats(
        &self,
        event_id: &str,
        viewer: &SessionSnapshot,
    ) -> DomainResult<ParticipantStats> {
        let event = self.load_event(event_id).await?;
        ensure_viewer(&event, viewer)?;
        let participants = self.participants_of(&event).await?;
        Ok(ParticipantStats::from_participants(
            &event,
            &participants,
            now_ms(),
        ))
    }

    pub async fn remove_participant(
        &self,
        event_id: &str,
        participant_id: &str,
        acting_organization_id: &str,
    ) -> DomainResult<RemovalOutcome> {
        if event_id.trim().is_empty() || participant_id.trim().is_empty() {
            return Err(DomainError::InvalidArgument(
                "event id and participant id are required".into(),
            ));
        }
        let event = self.load_event(event_id).await?;
        ensure_owner(&event, acting_organization_id)?;
        if !event.is_registered(participant_id) {
            return Err(DomainError::InvalidState(format!(
                "participant {participant_id} is not registered for event {event_id}"
            )));
        }

        let mut batch = WriteBatch::new();
        batch.update(
            documents::event_path(event_id),
            vec![
                FieldUpdate::array_remove(fields::REGISTERED_VOLUNTEERS, [participant_id]),
                FieldUpdate::delete(FieldPath::new([fields::REGISTRATION_DATES, participant_id])),
            ],
        )?;
        let user_path = documents::user_path(participant_id);
        if self.store.get(&user_path).await?.is_some() {
            batch.update(
                user_path,
                vec![FieldUpdate::array_remove(fields::REGISTERED_EVENTS, [event_id])],
            )?;
        } else {
            tracing::warn!(
                event_id,
                participant_id,
                "removing participant without user document"
            );
        }
        self.store.commit(batch).await?;
        tracing::info!(
            event_id,
            participant_id,
            organization_id = acting_organization_id,
            "participant removed"
        );

        let chat_synced = if event.with_chat {
            self.sync_chat_removal(&event, participant_id).await
        } else {
            true
        };
        Ok(RemovalOutcome {
            removed: true,
            chat_synced,
        })
    }

    async fn sync_chat_removal(&self, event: &Event, participant_id: &str) -> bool {
        let room_path = documents::chat_room_path(&event.chat_room_id());
        let result = async {
            if self.store.get(&room_path).await?.is_none() {
                tracing::warn!(event_id = %event.id, "event chat room missing during removal");
                return Ok(());
            }
            self.store
                .update(
                    room_path.clone(),
                    vec![FieldUpdate::array_remove(fields::PARTICIPANTS, [participant_id])],
                )
                .await
        }
        .await;
        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(
                    event_id = %event.id,
                    participant_id,
                    error = %err,
                    "failed to remove participant from event chat"
                );
                false
            }
        }
    }

    pub async fn update_participant_status(
        &self,
        event_id: &str,
        participant_id: &str,
        status: &str,
        acting_organization_id: &str,
    ) -> DomainResult<ParticipantStatusEntry> {
        let status: ParticipantStatus = status.parse()?;
        let event = self.load_event(event_id).await?;
        ensure_owner(&event, acting_organization_id)?;
        if !event.is_registered(participant_id) {
            return Err(DomainError::InvalidState(format!(
                "participant {participant_id} is not registered for event {event_id}"
            )));
        }
        status.ensure_allowed(event.status)?;

        let entry_field =
            |name: &str| FieldPath::new([fields::PARTICIPANT_STATUSES, participant_id, name]);
        self.store
            .update(
                documents::event_path(event_id),
                vec![
                    FieldUpdate::set(entry_field("status"), status.as_str()),
                    FieldUpdate::server_timestamp(entry_field("updatedAt")),
                    FieldUpdate::set(entry_field("updatedBy"), acting_organization_id),
                ],
            )
            .await?;
        tracing::info!(
            event_id,
            participant_id,
            status = status.as_str(),
            "participant status updated"
        );
        Ok(ParticipantStatusEntry {
            status,
            updated_at: now_ms(),
            updated_by: acting_organization_id.to_string(),
        })
    }

    pub async fn bulk_remove_participants(
        &self,
        event_id: &str,
        participant_ids: &[String],
        acting_organization_id: &str,
    ) -> BulkRemovalReport {
        let mut report = BulkRemovalReport::default();
        for participant_id in participant_ids {
            match self
                .remove_participant(event_id, participant_id, acting_organization_id)
                .await
            {
                Ok(_) => report.successful += 1,
                Err(err) => {
                    report.failed += 1;
                    report.errors.push(BulkRemovalError {
                        participant_id: participant_id.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }
        tracing::info!(
            event_id,
            successful = report.successful,
            failed = report.failed,
            "bulk participant removal finished"
        );
        report
    }

    pub async fn list_organization_events_with_stats(
        &self,
        organization_id: &str,
    ) -> DomainResult<Vec<EventWithStats>> {
        let query = Query::new(CollectionPath::root(collections::EVENTS))
            .where_eq(fields::ORGANIZATION_ID, organization_id);
        let snapshots = self.store.query(&query).await?;
        let now = now_ms();

        let mut events = Vec::with_capacity(snapshots.len());
        for snapshot in &snapshots {
            let event: Event = documents::decode(snapshot)?;
            let stats = match self.participants_of(&event).await {
                Ok(participants) => {
                    ParticipantStats::from_participants(&event, &participants, now)
                }
                Err(err) => {
                    tracing::warn!(
                        event_id = %event.id,
                        error = %err,
                        "falling back to registration counts"
                    );
                    ParticipantStats::from_registrations(&event)
                }
            };
            events.push(EventWithStats { event, stats });
        }
        events.sort_by(|a, b| match (a.event.date_ms, b.event.date_ms) {
            (Some(left), Some(right)) => right.cmp(&left),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.event.id.cmp(&b.event.id),
        });
        Ok(events)
    }

    async fn load_event(&self, event_id: &str) -> DomainResult<Event> {
        let snapshot = self
            .store
            .get(&documents::event_path(event_id))
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("event {event_id}")))?;
        documents::decode(&snapshot)
    }

    async fn participants_of(&self, event: &Event) -> DomainResult<Vec<ParticipantRecord>> {
        let mut participants = Vec::with_capacity(event.registered_volunteers.len());
        for user_id in &event.registered_volunteers {
            let Some(snapshot) = self.store.get(&documents::user_path(user_id)).await? else {
                tracing::warn!(event_id = %event.id, user_id, "registered user document missing");
                continue;
            };
            let user: User = documents::decode(&snapshot)?;
            participants.push(ParticipantRecord {
                participation_status: event
                    .participant_statuses
                    .get(user_id)
                    .map(|entry| entry.status)
                    .unwrap_or_default(),
                registration_date: event.registration_dates.get(user_id).copied(),
                id: user.id,
                display_name: user.display_name,
                email: user.email,
                photo_url: user.photo_url,
                skills: user.skills,
            });
        }
        participants.sort_by(compare_participants);
        Ok(participants)
    }
}

/// Newest registrations first; undated participants follow by display name.
fn compare_participants(a: &ParticipantRecord, b: &ParticipantRecord) -> Ordering {
    match (a.registration_date, b.registration_date) {
        (Some(left), Some(right)) => right
            .cmp(&left)
            .then_with(|| a.display_name.cmp(&b.display_name)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.display_name.cmp(&b.display_name),
    }
}

pub(crate) fn ensure_owner(event: &Event, acting_organization_id: &str) -> DomainResult<()> {
    if event.organization_id == acting_organization_id {
        return Ok(());
    }
    Err(DomainError::PermissionDenied(format!(
        "organization {acting_organization_id} does not own event {}",
        event.id
    )))
}

fn ensure_viewer(event: &Event, viewer: &SessionSnapshot) -> DomainResult<()> {
    if viewer.role.is_admin() {
        return Ok(());
    }
    ensure_owner(event, viewer.require_organization()?)
}
