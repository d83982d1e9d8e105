use crate::domain::conversation::ConversationKey;
use crate::domain::user::UserSummary;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    File,
}

impl MessageType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
        }
    }

    /// Label shown in the conversation list instead of a content snippet.
    #[must_use]
    pub const fn media_label(self) -> &'static str {
        match self {
            Self::Text => "",
            Self::Image => "Sent an image",
            Self::Video => "Sent a video",
            Self::Audio => "Sent an audio message",
            Self::File => "Sent a file",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "file" => Ok(Self::File),
            _ => Err(ValidationError::InvalidMessageType),
        }
    }
}

/// A file previously uploaded through the attachment endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    #[serde(default)]
    pub public_id: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Message content is required for text messages")]
    ContentRequired,
    #[error("Attachments are required for media messages")]
    AttachmentsRequired,
    #[error("Message content exceeds {max} characters")]
    ContentTooLong { max: usize },
    #[error("Invalid message type")]
    InvalidMessageType,
}

impl ValidationError {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ContentRequired => "CONTENT_REQUIRED",
            Self::AttachmentsRequired => "ATTACHMENTS_REQUIRED",
            Self::ContentTooLong { .. } => "CONTENT_TOO_LONG",
            Self::InvalidMessageType => "INVALID_MESSAGE_TYPE",
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::bad_request(err.code(), err.to_string())
    }
}

/// A message about to be appended to a conversation.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub message_type: MessageType,
    pub content: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl NewMessage {
    /// Checks the content/attachment invariant and normalizes the content.
    ///
    /// # Errors
    /// Returns a [`ValidationError`] for empty text, missing attachments or oversize content.
    pub fn validate(mut self, max_content_length: usize) -> Result<Self, ValidationError> {
        self.content = self.content.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());

        if let Some(content) = &self.content
            && content.chars().count() > max_content_length
        {
            return Err(ValidationError::ContentTooLong { max: max_content_length });
        }

        match self.message_type {
            MessageType::Text if self.content.is_none() => Err(ValidationError::ContentRequired),
            MessageType::Text => Ok(self),
            _ if self.attachments.is_empty() => Err(ValidationError::AttachmentsRequired),
            _ => Ok(self),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub conversation_key: ConversationKey,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub message_type: MessageType,
    pub content: Option<String>,
    pub attachments: Vec<Attachment>,
    pub is_read: bool,
    pub read_at: Option<OffsetDateTime>,
    pub deleted_by: Vec<Uuid>,
    pub is_hidden: bool,
    pub created_at: OffsetDateTime,
}

impl Message {
    #[must_use]
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.sender_id == user_id || self.recipient_id == user_id
    }

    #[must_use]
    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        !self.is_hidden && !self.deleted_by.contains(&user_id)
    }

    /// Records `user_id` as having deleted the message and returns whether it is now hidden.
    pub fn mark_deleted_by(&mut self, user_id: Uuid) -> bool {
        if !self.deleted_by.contains(&user_id) {
            self.deleted_by.push(user_id);
        }
        self.is_hidden = self.deleted_by.contains(&self.sender_id) && self.deleted_by.contains(&self.recipient_id);
        self.is_hidden
    }
}

/// Wire form of a message, with both participants resolved for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub conversation_id: String,
    pub sender: UserSummary,
    pub recipient: UserSummary,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub read: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub read_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl MessageView {
    #[must_use]
    pub fn new(message: Message, sender: UserSummary, recipient: UserSummary) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_key.to_string(),
            sender,
            recipient,
            content: message.content,
            message_type: message.message_type,
            attachments: message.attachments,
            read: message.is_read,
            read_at: message.read_at,
            created_at: message.created_at,
        }
    }
}
