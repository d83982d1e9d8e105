use crate::domain::conversation::LastMessage;
use crate::domain::message::{Attachment, MessageType, MessageView};
use crate::domain::user::UserSummary;
use crate::services::messaging_service::ConversationEntry;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Body of `POST /messages`. Fields stay loose so missing or malformed values map to stable error codes.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub recipient_id: Option<String>,
    pub content: Option<String>,
    pub message_type: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub success: bool,
    pub message: MessageView,
    pub conversation_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListMessagesParams {
    pub limit: Option<i64>,
    pub before: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessageResponse {
    pub content: String,
    pub sender: Uuid,
    pub message_type: MessageType,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<LastMessage> for LastMessageResponse {
    fn from(last: LastMessage) -> Self {
        Self { content: last.content, sender: last.sender_id, message_type: last.message_type, created_at: last.sent_at }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub conversation_id: String,
    pub participant: UserSummary,
    pub last_message: Option<LastMessageResponse>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_message_at: OffsetDateTime,
    pub unread_count: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<ConversationEntry> for ConversationResponse {
    fn from(entry: ConversationEntry) -> Self {
        let conversation = entry.conversation;
        Self {
            id: conversation.id,
            conversation_id: conversation.key.to_string(),
            participant: entry.participant,
            last_message: conversation.last_message.map(Into::into),
            last_message_at: conversation.last_activity_at,
            unread_count: entry.unread_count,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationResponse>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageListResponse {
    pub messages: Vec<MessageView>,
    pub count: usize,
    pub has_more: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub messages: Vec<MessageView>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub unread_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanMessageResponse {
    pub can_message: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUsersResponse {
    pub user_ids: Vec<Uuid>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

impl ActionResponse {
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }
}
