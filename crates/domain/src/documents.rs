//! Typed records for every collection the core touches.
//!
//! Documents are schemaless on the wire. Each record is decoded once at the
//! store boundary with [`decode`]; a document missing a required field is
//! reported as `Internal` with its path instead of leaking defaults.

use std::collections::BTreeMap;
use std::{fmt, str::FromStr};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::DomainResult;
use crate::error::DomainError;
use crate::ports::store::{CollectionPath, DocumentPath, DocumentSnapshot, Fields};

pub mod collections {
    pub const USERS: &str = "users";
    pub const ORGANIZATIONS: &str = "organizations";
    pub const EVENTS: &str = "events";
    pub const CHAT_ROOMS: &str = "chatRooms";
    pub const MESSAGES: &str = "messages";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const ACTIVITIES: &str = "activities";
    pub const APPLICATIONS: &str = "applications";
    pub const ADMIN_ACTIONS: &str = "adminActions";
}

pub mod fields {
    pub const REGISTERED_VOLUNTEERS: &str = "registeredVolunteers";
    pub const REGISTERED_EVENTS: &str = "registeredEvents";
    pub const REGISTRATION_DATES: &str = "registrationDates";
    pub const PARTICIPANT_STATUSES: &str = "participantStatuses";
    pub const PARTICIPANTS: &str = "participants";
    pub const EVENTS: &str = "events";
    pub const EVENT_ID: &str = "eventId";
    pub const ORGANIZATION_ID: &str = "organizationId";
    pub const DISPLAY_NAME: &str = "displayName";
    pub const CREATED_AT: &str = "createdAt";
    pub const STATUS: &str = "status";
}

pub fn event_path(event_id: &str) -> DocumentPath {
    DocumentPath::new(collections::EVENTS, event_id)
}

pub fn user_path(user_id: &str) -> DocumentPath {
    DocumentPath::new(collections::USERS, user_id)
}

pub fn organization_path(organization_id: &str) -> DocumentPath {
    DocumentPath::new(collections::ORGANIZATIONS, organization_id)
}

pub fn chat_room_path(chat_room_id: &str) -> DocumentPath {
    DocumentPath::new(collections::CHAT_ROOMS, chat_room_id)
}

pub fn messages_collection(chat_room_id: &str) -> CollectionPath {
    chat_room_path(chat_room_id).subcollection(collections::MESSAGES)
}

/// Id of the chat room that accompanies an event with chat enabled.
pub fn event_chat_room_id(event_id: &str) -> String {
    format!("event_{event_id}")
}

/// Object key of an event's uploaded cover image in media storage.
pub fn event_image_key(event_id: &str) -> String {
    format!("event-images/{event_id}")
}

pub fn decode<T>(snapshot: &DocumentSnapshot) -> DomainResult<T>
where
    T: DeserializeOwned,
{
    let mut fields = snapshot.fields.clone();
    fields.insert("id".to_string(), Value::String(snapshot.id().to_string()));
    serde_json::from_value(Value::Object(fields)).map_err(|err| {
        DomainError::Internal(format!("malformed document {}: {err}", snapshot.path))
    })
}

/// Serializes a record into document fields; the id lives in the path.
pub fn encode<T>(record: &T) -> DomainResult<Fields>
where
    T: Serialize,
{
    match serde_json::to_value(record) {
        Ok(Value::Object(mut fields)) => {
            fields.remove("id");
            Ok(fields)
        }
        Ok(_) => Err(DomainError::Internal(
            "record did not serialize to an object".into(),
        )),
        Err(err) => Err(DomainError::Internal(format!(
            "failed to serialize record: {err}"
        ))),
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Draft,
    #[default]
    Active,
    Completed,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(&self, next: EventStatus) -> bool {
        match (self, next) {
            (Self::Draft, Self::Active | Self::Cancelled) => true,
            (Self::Active, Self::Completed | Self::Cancelled) => true,
            (Self::Draft, Self::Draft | Self::Completed) => false,
            (Self::Active, Self::Draft | Self::Active) => false,
            (Self::Completed | Self::Cancelled, _) => false,
        }
    }

    pub fn transition(self, next: EventStatus) -> DomainResult<EventStatus> {
        if self.can_transition_to(next) {
            return Ok(next);
        }
        Err(DomainError::InvalidState(format!(
            "event cannot move from {self} to {next}"
        )))
    }

    pub fn accepts_registrations(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DomainError::InvalidArgument(format!(
                "unknown event status '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ParticipantStatus {
    #[default]
    Registered,
    Attended,
    NoShow,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Attended => "attended",
            Self::NoShow => "no-show",
        }
    }

    /// Attendance outcomes only make sense once an event is running or over.
    pub fn ensure_allowed(&self, event_status: EventStatus) -> DomainResult<()> {
        let allowed = match (self, event_status) {
            (Self::Registered, EventStatus::Draft | EventStatus::Active) => true,
            (Self::Registered, EventStatus::Completed) => true,
            (Self::Attended | Self::NoShow, EventStatus::Active | EventStatus::Completed) => true,
            (Self::Attended | Self::NoShow, EventStatus::Draft) => false,
            (_, EventStatus::Cancelled) => false,
        };
        if allowed {
            return Ok(());
        }
        Err(DomainError::InvalidState(format!(
            "participant status {self} is not allowed while event is {event_status}"
        )))
    }
}

impl fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipantStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "registered" => Ok(Self::Registered),
            "attended" => Ok(Self::Attended),
            "no-show" => Ok(Self::NoShow),
            other => Err(DomainError::InvalidArgument(format!(
                "invalid participant status '{other}'"
            ))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantStatusEntry {
    pub status: ParticipantStatus,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub updated_by: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(default)]
    pub id: String,
    pub organization_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default, rename = "date", skip_serializing_if = "Option::is_none")]
    pub date_ms: Option<i64>,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default)]
    pub registered_volunteers: Vec<String>,
    #[serde(default)]
    pub max_volunteers: u32,
    #[serde(default)]
    pub with_chat: bool,
    #[serde(default)]
    pub participant_statuses: BTreeMap<String, ParticipantStatusEntry>,
    #[serde(default)]
    pub registration_dates: BTreeMap<String, i64>,
    #[serde(default)]
    pub has_custom_image: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub created_at: i64,
}

impl Event {
    pub fn is_registered(&self, user_id: &str) -> bool {
        self.registered_volunteers.iter().any(|id| id == user_id)
    }

    pub fn is_full(&self) -> bool {
        self.max_volunteers > 0 && self.registered_volunteers.len() >= self.max_volunteers as usize
    }

    pub fn chat_room_id(&self) -> String {
        event_chat_room_id(&self.id)
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    Volunteer,
    Organization,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub registered_events: Vec<String>,
    #[serde(default)]
    pub followed_organizations: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub followers: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatRoom {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|id| id == user_id)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub text: String,
    pub sender_id: String,
    pub created_at: i64,
}

pub const NOTIFICATION_TYPE_MENTION: &str = "mention";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default)]
    pub created_at: i64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdminActionKind {
    DeleteMessage,
    RemoveParticipant,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdminAction {
    #[serde(default)]
    pub id: String,
    pub action: AdminActionKind,
    pub actor_id: String,
    pub chat_room_id: String,
    pub target_id: String,
    pub created_at: i64,
    #[serde(default)]
    pub digest: String,
}
