use crate::domain::conversation::{Conversation, ConversationKey, LastMessage};
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct ConversationRecord {
    pub(crate) id: Uuid,
    pub(crate) conversation_key: String,
    pub(crate) participant_a: Uuid,
    pub(crate) participant_b: Uuid,
    pub(crate) last_message_content: Option<String>,
    pub(crate) last_message_sender: Option<Uuid>,
    pub(crate) last_message_type: Option<String>,
    pub(crate) last_message_at: Option<OffsetDateTime>,
    pub(crate) last_activity_at: OffsetDateTime,
    pub(crate) unread_a: i64,
    pub(crate) unread_b: i64,
    pub(crate) created_at: OffsetDateTime,
    pub(crate) updated_at: OffsetDateTime,
}

impl From<ConversationRecord> for Conversation {
    fn from(record: ConversationRecord) -> Self {
        let last_message = match (
            record.last_message_content,
            record.last_message_sender,
            record.last_message_type,
            record.last_message_at,
        ) {
            (Some(content), Some(sender_id), Some(message_type), Some(sent_at)) => Some(LastMessage {
                content,
                sender_id,
                message_type: message_type.parse().unwrap_or_default(),
                sent_at,
            }),
            _ => None,
        };

        Self {
            id: record.id,
            key: ConversationKey::from_stored(record.conversation_key),
            participants: [record.participant_a, record.participant_b],
            last_message,
            last_activity_at: record.last_activity_at,
            unread: HashMap::from([(record.participant_a, record.unread_a), (record.participant_b, record.unread_b)]),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
