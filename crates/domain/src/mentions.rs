use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::DomainResult;
use crate::documents::{
    self, ChatMessage, ChatRoom, NOTIFICATION_TYPE_MENTION, Notification, User, collections,
    fields,
};
use crate::ports::store::{CollectionPath, DocumentPath, DocumentStore, Query, WriteBatch};

fn mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@(\w+)").expect("valid regex"))
}

/// Every `@name` token in order of appearance. Repeats are kept.
pub fn extract_mentions(text: &str) -> Vec<String> {
    mention_regex()
        .captures_iter(text)
        .filter_map(|captures| captures.get(1))
        .map(|token| token.as_str().to_string())
        .collect()
}

#[derive(Clone)]
pub struct MentionNotifier {
    store: Arc<dyn DocumentStore>,
}

impl MentionNotifier {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Creates one `mention` notification per token naming a room participant.
    /// Returns the number of notifications written.
    pub async fn on_message_created(
        &self,
        chat_room_id: &str,
        message: &ChatMessage,
    ) -> DomainResult<usize> {
        let tokens = extract_mentions(&message.text);
        if tokens.is_empty() {
            return Ok(0);
        }
        let Some(room_snapshot) = self
            .store
            .get(&documents::chat_room_path(chat_room_id))
            .await?
        else {
            tracing::debug!(
                chat_room_id,
                message_id = %message.id,
                "mention in unknown room ignored"
            );
            return Ok(0);
        };
        let room: ChatRoom = documents::decode(&room_snapshot)?;

        let mut batch = WriteBatch::new();
        for token in &tokens {
            let Some(user) = self.find_user_by_display_name(token).await? else {
                continue;
            };
            if !room.has_participant(&user.id) {
                continue;
            }
            let notification = Notification {
                id: crate::util::uuid_v7_without_dashes(),
                user_id: user.id,
                notification_type: NOTIFICATION_TYPE_MENTION.to_string(),
                read: false,
                chat_room_id: Some(chat_room_id.to_string()),
                message_id: Some(message.id.clone()),
                sender_id: Some(message.sender_id.clone()),
                event_id: room.event_id.clone(),
                created_at: crate::jobs::now_ms(),
            };
            batch.set(
                DocumentPath::new(collections::NOTIFICATIONS, &notification.id),
                documents::encode(&notification)?,
            )?;
        }

        let created = batch.len();
        if created > 0 {
            self.store.commit(batch).await?;
        }
        tracing::debug!(
            chat_room_id,
            message_id = %message.id,
            mentions = tokens.len(),
            created,
            "mentions processed"
        );
        Ok(created)
    }

    async fn find_user_by_display_name(&self, display_name: &str) -> DomainResult<Option<User>> {
        let query = Query::new(CollectionPath::root(collections::USERS))
            .where_eq(fields::DISPLAY_NAME, display_name)
            .limit(1);
        match self.store.query(&query).await?.first() {
            Some(snapshot) => Ok(Some(documents::decode(snapshot)?)),
            None => Ok(None),
        }
    }
}
