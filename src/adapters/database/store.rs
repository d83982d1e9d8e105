use crate::adapters::database::DbPool;
use crate::adapters::database::conversation_repo::ConversationRepository;
use crate::adapters::database::message_repo::MessageRepository;
use crate::domain::conversation::{Conversation, ConversationKey, LastMessage};
use crate::domain::message::{Message, NewMessage};
use crate::error::Result;
use crate::services::store::{ConversationStore, MessageStore, MessagingStore};
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Postgres-backed conversation and message stores.
#[derive(Clone, Debug)]
pub struct PgMessagingStore {
    pool: DbPool,
    conversations: ConversationRepository,
    messages: MessageRepository,
}

impl PgMessagingStore {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool, conversations: ConversationRepository::new(), messages: MessageRepository::new() }
    }
}

#[async_trait]
impl ConversationStore for PgMessagingStore {
    async fn find_or_create(&self, a: Uuid, b: Uuid) -> Result<Conversation> {
        let mut conn = self.pool.acquire().await?;
        self.conversations.upsert(&mut conn, a, b).await
    }

    async fn find_conversation(&self, key: &ConversationKey) -> Result<Option<Conversation>> {
        let mut conn = self.pool.acquire().await?;
        self.conversations.find_by_key(&mut conn, key).await
    }

    async fn record_message_sent(&self, conversation_id: Uuid, last: &LastMessage, recipient_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.conversations.record_message_sent(&mut tx, conversation_id, last, recipient_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn mark_read(&self, conversation_id: Uuid, reader_id: Uuid) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        self.conversations.reset_unread(&mut conn, conversation_id, reader_id).await
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Conversation>> {
        let mut conn = self.pool.acquire().await?;
        self.conversations.list_for_user(&mut conn, user_id, limit, offset).await
    }

    async fn unread_total(&self, user_id: Uuid) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        self.conversations.unread_total(&mut conn, user_id).await
    }
}

#[async_trait]
impl MessageStore for PgMessagingStore {
    async fn append(&self, key: &ConversationKey, message: NewMessage) -> Result<Message> {
        let mut conn = self.pool.acquire().await?;
        self.messages.create(&mut conn, key, message).await
    }

    async fn find_message(&self, id: Uuid) -> Result<Option<Message>> {
        let mut conn = self.pool.acquire().await?;
        self.messages.find_by_id(&mut conn, id).await
    }

    async fn list_by_conversation(
        &self,
        key: &ConversationKey,
        viewer: Uuid,
        limit: i64,
        before: Option<OffsetDateTime>,
    ) -> Result<Vec<Message>> {
        let mut conn = self.pool.acquire().await?;
        self.messages.list_by_conversation(&mut conn, key, viewer, limit, before).await
    }

    async fn mark_many_read(&self, key: &ConversationKey, recipient_id: Uuid, sender_id: Uuid) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        self.messages.mark_many_read(&mut conn, key, recipient_id, sender_id).await
    }

    async fn soft_delete(&self, id: Uuid, requester: Uuid) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        self.messages.soft_delete(&mut conn, id, requester).await
    }

    async fn search(&self, user_id: Uuid, query: &str, limit: i64) -> Result<Vec<Message>> {
        let mut conn = self.pool.acquire().await?;
        self.messages.search(&mut conn, user_id, query, limit).await
    }
}

#[async_trait]
impl MessagingStore for PgMessagingStore {
    /// Runs the append and the conversation update in one transaction.
    #[tracing::instrument(level = "debug", skip(self, conversation, message), fields(conversation_id = %conversation.id))]
    async fn commit_message(
        &self,
        conversation: &Conversation,
        message: NewMessage,
        snippet_length: usize,
    ) -> Result<Message> {
        let mut tx = self.pool.begin().await?;

        let stored = self.messages.create(&mut tx, &conversation.key, message).await?;
        let last = LastMessage::summarize(
            stored.message_type,
            stored.content.as_deref(),
            stored.sender_id,
            stored.created_at,
            snippet_length,
        );
        self.conversations.record_message_sent(&mut tx, conversation.id, &last, stored.recipient_id).await?;

        tx.commit().await?;
        Ok(stored)
    }
}
