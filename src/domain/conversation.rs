use crate::domain::message::MessageType;
use std::collections::HashMap;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

const KEY_SEPARATOR: char = ':';

/// Order-independent identity of the conversation between two users.
///
/// Built from the two ids in ascending order joined by `:`. The hyphenated UUID
/// text form never contains `:`, so distinct pairs cannot map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey(String);

impl ConversationKey {
    #[must_use]
    pub fn for_pair(a: Uuid, b: Uuid) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self(format!("{low}{KEY_SEPARATOR}{high}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Both participants, lowest id first.
    #[must_use]
    pub fn participants(&self) -> Option<(Uuid, Uuid)> {
        let (a, b) = self.0.split_once(KEY_SEPARATOR)?;
        Some((Uuid::parse_str(a).ok()?, Uuid::parse_str(b).ok()?))
    }

    /// Wraps a key read back from storage.
    #[must_use]
    pub const fn from_stored(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Preview of the newest message shown in the conversation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastMessage {
    pub content: String,
    pub sender_id: Uuid,
    pub message_type: MessageType,
    pub sent_at: OffsetDateTime,
}

impl LastMessage {
    /// Text messages keep a snippet of at most `snippet_length` characters; media
    /// messages are summarized with a label.
    #[must_use]
    pub fn summarize(
        message_type: MessageType,
        content: Option<&str>,
        sender_id: Uuid,
        sent_at: OffsetDateTime,
        snippet_length: usize,
    ) -> Self {
        let content = match message_type {
            MessageType::Text => content.unwrap_or_default().chars().take(snippet_length).collect(),
            other => other.media_label().to_string(),
        };

        Self { content, sender_id, message_type, sent_at }
    }
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Uuid,
    pub key: ConversationKey,
    pub participants: [Uuid; 2],
    pub last_message: Option<LastMessage>,
    pub last_activity_at: OffsetDateTime,
    pub unread: HashMap<Uuid, i64>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Conversation {
    #[must_use]
    pub fn unread_for(&self, user_id: Uuid) -> i64 {
        self.unread.get(&user_id).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn includes(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }

    /// The participant that is not `user_id`.
    #[must_use]
    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        if !self.includes(user_id) {
            return None;
        }
        self.participants.iter().copied().find(|p| *p != user_id)
    }
}
