//! Admin moderation of chat rooms, exposed as a callable.
//!
//! Only the room's admin may act. Every action writes an [`AdminAction`]
//! audit record in the same batch as the change itself.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::documents::{self, AdminAction, AdminActionKind, ChatRoom, collections, fields};
use crate::error::DomainError;
use crate::jobs::now_ms;
use crate::ports::store::{DocumentPath, DocumentStore, FieldUpdate, WriteBatch};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallableError {
    #[error("{0}")]
    Unauthenticated(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Internal(String),
}

impl CallableError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::NotFound(_) => "not-found",
            Self::PermissionDenied(_) => "permission-denied",
            Self::InvalidArgument(_) => "invalid-argument",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<DomainError> for CallableError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::NotFound(what) => Self::NotFound(format!("{what} not found")),
            DomainError::PermissionDenied(msg) => Self::PermissionDenied(msg),
            DomainError::InvalidArgument(msg) | DomainError::InvalidState(msg) => {
                Self::InvalidArgument(msg)
            }
            DomainError::Conflict => Self::Internal("concurrent modification".into()),
            DomainError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<crate::ports::store::StoreError> for CallableError {
    fn from(err: crate::ports::store::StoreError) -> Self {
        DomainError::from(err).into()
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ModerationOperation {
    DeleteMessage,
    RemoveParticipant,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModerationRequest {
    pub operation: ModerationOperation,
    pub chat_room_id: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub participant_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModerationResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Clone)]
pub struct ChatModerationService {
    store: Arc<dyn DocumentStore>,
}

impl ChatModerationService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn handle(
        &self,
        caller_id: Option<&str>,
        request: ModerationRequest,
    ) -> Result<ModerationResponse, CallableError> {
        let caller_id = caller_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| CallableError::Unauthenticated("sign-in required".into()))?;
        if request.chat_room_id.trim().is_empty() {
            return Err(CallableError::InvalidArgument("chatRoomId is required".into()));
        }

        let room_path = documents::chat_room_path(&request.chat_room_id);
        let snapshot = self
            .store
            .get(&room_path)
            .await?
            .ok_or_else(|| CallableError::NotFound("chat room not found".into()))?;
        let room: ChatRoom = documents::decode(&snapshot)?;
        if room.admin_id.as_deref() != Some(caller_id) {
            tracing::warn!(chat_room_id = %room.id, caller_id, "moderation attempt by non-admin");
            return Err(CallableError::PermissionDenied(
                "only the room admin can moderate".into(),
            ));
        }

        let mut batch = WriteBatch::new();
        let (kind, target_id, message) = match request.operation {
            ModerationOperation::DeleteMessage => {
                let message_id = required(request.message_id.as_deref(), "messageId")?;
                let message_path = room_path.subcollection(collections::MESSAGES).doc(message_id);
                if self.store.get(&message_path).await?.is_none() {
                    return Err(CallableError::NotFound("message not found".into()));
                }
                batch.delete(message_path)?;
                (AdminActionKind::DeleteMessage, message_id, "message deleted")
            }
            ModerationOperation::RemoveParticipant => {
                let participant_id = required(request.participant_id.as_deref(), "participantId")?;
                if participant_id == caller_id {
                    return Err(CallableError::InvalidArgument(
                        "the admin cannot remove themselves".into(),
                    ));
                }
                if !room.has_participant(participant_id) {
                    return Err(CallableError::NotFound(
                        "participant not in chat room".into(),
                    ));
                }
                batch.update(
                    room_path.clone(),
                    vec![FieldUpdate::array_remove(fields::PARTICIPANTS, [participant_id])],
                )?;
                (AdminActionKind::RemoveParticipant, participant_id, "participant removed")
            }
        };

        let action = audit_record(kind, caller_id, &room.id, target_id)?;
        batch.set(
            DocumentPath::new(collections::ADMIN_ACTIONS, &action.id),
            documents::encode(&action)?,
        )?;
        self.store.commit(batch).await?;
        tracing::info!(
            chat_room_id = %room.id,
            caller_id,
            target_id,
            action = ?kind,
            "moderation action applied"
        );

        Ok(ModerationResponse {
            success: true,
            message: message.to_string(),
        })
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, CallableError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| CallableError::InvalidArgument(format!("{name} is required")))
}

fn audit_record(
    action: AdminActionKind,
    actor_id: &str,
    chat_room_id: &str,
    target_id: &str,
) -> Result<AdminAction, CallableError> {
    let created_at = now_ms();
    let digest = crate::util::audit_digest(&json!({
        "action": action,
        "actorId": actor_id,
        "chatRoomId": chat_room_id,
        "targetId": target_id,
        "createdAt": created_at,
    }))?;
    Ok(AdminAction {
        id: crate::util::uuid_v7_without_dashes(),
        action,
        actor_id: actor_id.to_string(),
        chat_room_id: chat_room_id.to_string(),
        target_id: target_id.to_string(),
        created_at,
        digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::store::{CollectionPath, Query};
    use crate::store::InMemoryDocumentStore;
    use crate::testing::{read, seed};

    async fn seeded() -> InMemoryDocumentStore {
        let store = InMemoryDocumentStore::new();
        seed(
            &store,
            "chatRooms/r1",
            json!({"participants": ["admin", "u1"], "adminId": "admin"}),
        )
        .await;
        seed(
            &store,
            "chatRooms/r1/messages/m1",
            json!({"text": "spam", "senderId": "u1", "createdAt": 1}),
        )
        .await;
        store
    }

    fn request(operation: ModerationOperation) -> ModerationRequest {
        ModerationRequest {
            operation,
            chat_room_id: "r1".into(),
            message_id: Some("m1".into()),
            participant_id: Some("u1".into()),
        }
    }

    async fn audit_log(store: &InMemoryDocumentStore) -> Vec<AdminAction> {
        store
            .query(&Query::new(CollectionPath::root(collections::ADMIN_ACTIONS)))
            .await
            .unwrap()
            .iter()
            .map(|snapshot| documents::decode(snapshot).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn admin_deletes_message_with_audit_record_in_one_commit() {
        let store = seeded().await;
        let service = ChatModerationService::new(Arc::new(store.clone()));
        let commits = store.commit_count().await;

        let response = service
            .handle(Some("admin"), request(ModerationOperation::DeleteMessage))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(store.commit_count().await, commits + 1);
        assert!(read(&store, "chatRooms/r1/messages/m1").await.is_none());

        let log = audit_log(&store).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, AdminActionKind::DeleteMessage);
        assert_eq!(log[0].target_id, "m1");
        assert_eq!(log[0].digest.len(), 64);
    }

    #[tokio::test]
    async fn admin_removes_participant() {
        let store = seeded().await;
        let service = ChatModerationService::new(Arc::new(store.clone()));

        service
            .handle(Some("admin"), request(ModerationOperation::RemoveParticipant))
            .await
            .unwrap();
        let room = read(&store, "chatRooms/r1").await.unwrap();
        assert_eq!(room["participants"], json!(["admin"]));
        assert_eq!(audit_log(&store).await[0].action, AdminActionKind::RemoveParticipant);
    }

    #[tokio::test]
    async fn errors_carry_callable_codes() {
        let store = seeded().await;
        let service = ChatModerationService::new(Arc::new(store.clone()));

        let err = service
            .handle(None, request(ModerationOperation::DeleteMessage))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unauthenticated");

        let err = service
            .handle(Some("u1"), request(ModerationOperation::DeleteMessage))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "permission-denied");

        let mut missing_room = request(ModerationOperation::DeleteMessage);
        missing_room.chat_room_id = "nope".into();
        let err = service.handle(Some("admin"), missing_room).await.unwrap_err();
        assert_eq!(err.code(), "not-found");

        let mut no_message = request(ModerationOperation::DeleteMessage);
        no_message.message_id = None;
        let err = service.handle(Some("admin"), no_message).await.unwrap_err();
        assert_eq!(err.code(), "invalid-argument");

        let mut self_removal = request(ModerationOperation::RemoveParticipant);
        self_removal.participant_id = Some("admin".into());
        let err = service.handle(Some("admin"), self_removal).await.unwrap_err();
        assert_eq!(err.code(), "invalid-argument");

        assert!(audit_log(&store).await.is_empty());
    }

    #[test]
    fn request_uses_camel_case_wire_names() {
        let request: ModerationRequest = serde_json::from_value(json!({
            "operation": "removeParticipant",
            "chatRoomId": "r1",
            "participantId": "u1"
        }))
        .unwrap();
        assert_eq!(request.operation, ModerationOperation::RemoveParticipant);
        assert_eq!(request.message_id, None);
    }
}
