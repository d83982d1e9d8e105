use crate::domain::conversation::{Conversation, ConversationKey, LastMessage};
use crate::domain::message::{Message, NewMessage};
use crate::domain::user::UserSummary;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// Canonical conversations and their per-participant unread counters.
#[async_trait]
pub trait ConversationStore: Send + Sync + std::fmt::Debug {
    /// Returns the conversation for the pair, creating it atomically if it does not exist.
    async fn find_or_create(&self, a: Uuid, b: Uuid) -> Result<Conversation>;

    async fn find_conversation(&self, key: &ConversationKey) -> Result<Option<Conversation>>;

    /// Updates the summary, bumps activity and increments the recipient's unread counter.
    async fn record_message_sent(&self, conversation_id: Uuid, last: &LastMessage, recipient_id: Uuid) -> Result<()>;

    async fn mark_read(&self, conversation_id: Uuid, reader_id: Uuid) -> Result<()>;

    /// Conversations the user takes part in, newest activity first, skipping the first `offset`.
    async fn list_for_user(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Conversation>>;

    async fn unread_total(&self, user_id: Uuid) -> Result<i64>;
}

/// The durable message log.
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    async fn append(&self, key: &ConversationKey, message: NewMessage) -> Result<Message>;

    async fn find_message(&self, id: Uuid) -> Result<Option<Message>>;

    /// Messages visible to `viewer`, oldest first, optionally strictly older than `before`.
    async fn list_by_conversation(
        &self,
        key: &ConversationKey,
        viewer: Uuid,
        limit: i64,
        before: Option<OffsetDateTime>,
    ) -> Result<Vec<Message>>;

    /// Marks every unread message from `sender_id` to `recipient_id` as read.
    async fn mark_many_read(&self, key: &ConversationKey, recipient_id: Uuid, sender_id: Uuid) -> Result<u64>;

    /// Hides the message from `requester`. Returns `true` once both participants have deleted it.
    async fn soft_delete(&self, id: Uuid, requester: Uuid) -> Result<bool>;

    async fn search(&self, user_id: Uuid, query: &str, limit: i64) -> Result<Vec<Message>>;
}

#[async_trait]
pub trait MessagingStore: ConversationStore + MessageStore {
    /// Appends the message and records it on the conversation as one unit.
    ///
    /// The conversation is only touched after the append succeeded.
    async fn commit_message(
        &self,
        conversation: &Conversation,
        message: NewMessage,
        snippet_length: usize,
    ) -> Result<Message> {
        let stored = self.append(&conversation.key, message).await?;
        let last = LastMessage::summarize(
            stored.message_type,
            stored.content.as_deref(),
            stored.sender_id,
            stored.created_at,
            snippet_length,
        );
        self.record_message_sent(conversation.id, &last, stored.recipient_id).await?;
        Ok(stored)
    }
}

/// Read-only view of user profiles owned by the account service.
#[async_trait]
pub trait UserDirectory: Send + Sync + std::fmt::Debug {
    async fn exists(&self, user_id: Uuid) -> Result<bool>;

    async fn summaries(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, UserSummary>>;
}
