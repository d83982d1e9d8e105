use crate::domain::conversation::ConversationKey;
use crate::domain::message::{Attachment, Message};
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct MessageRecord {
    pub(crate) id: Uuid,
    pub(crate) conversation_key: String,
    pub(crate) sender_id: Uuid,
    pub(crate) recipient_id: Uuid,
    pub(crate) message_type: String,
    pub(crate) content: Option<String>,
    pub(crate) attachments: Json<Vec<Attachment>>,
    pub(crate) is_read: bool,
    pub(crate) read_at: Option<OffsetDateTime>,
    pub(crate) deleted_by: Vec<Uuid>,
    pub(crate) is_hidden: bool,
    pub(crate) created_at: OffsetDateTime,
}

impl From<MessageRecord> for Message {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.id,
            conversation_key: ConversationKey::from_stored(record.conversation_key),
            sender_id: record.sender_id,
            recipient_id: record.recipient_id,
            // Guarded by a CHECK constraint.
            message_type: record.message_type.parse().unwrap_or_default(),
            content: record.content,
            attachments: record.attachments.0,
            is_read: record.is_read,
            read_at: record.read_at,
            deleted_by: record.deleted_by,
            is_hidden: record.is_hidden,
            created_at: record.created_at,
        }
    }
}
