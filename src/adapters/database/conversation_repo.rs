use crate::adapters::database::records::ConversationRecord;
use crate::domain::conversation::{Conversation, ConversationKey, LastMessage};
use crate::error::{AppError, Result};
use sqlx::PgConnection;
use uuid::Uuid;

const CONVERSATION_COLUMNS: &str = r"
    c.id, c.conversation_key, c.participant_a, c.participant_b,
    c.last_message_content, c.last_message_sender, c.last_message_type, c.last_message_at,
    c.last_activity_at, c.created_at, c.updated_at,
    COALESCE((SELECT unread_count FROM conversation_participants p
              WHERE p.conversation_id = c.id AND p.user_id = c.participant_a), 0) AS unread_a,
    COALESCE((SELECT unread_count FROM conversation_participants p
              WHERE p.conversation_id = c.id AND p.user_id = c.participant_b), 0) AS unread_b
";

#[derive(Clone, Debug, Default)]
pub struct ConversationRepository {}

impl ConversationRepository {
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }

    /// Inserts the conversation for the pair or returns the existing row.
    ///
    /// Concurrent callers for the same pair converge on one row through the unique key.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the upsert fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn upsert(&self, conn: &mut PgConnection, a: Uuid, b: Uuid) -> Result<Conversation> {
        let key = ConversationKey::for_pair(a, b);
        let (low, high) = key.participants().ok_or(AppError::Internal)?;

        let sql = format!(
            r"
            WITH c AS (
                INSERT INTO conversations (id, conversation_key, participant_a, participant_b)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (conversation_key) DO UPDATE SET conversation_key = EXCLUDED.conversation_key
                RETURNING *
            ), seeded AS (
                INSERT INTO conversation_participants (conversation_id, user_id)
                SELECT id, participant_a FROM c
                UNION ALL
                SELECT id, participant_b FROM c
                ON CONFLICT (conversation_id, user_id) DO NOTHING
            )
            SELECT {CONVERSATION_COLUMNS} FROM c
            "
        );

        let record = sqlx::query_as::<_, ConversationRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(key.as_str())
            .bind(low)
            .bind(high)
            .fetch_one(conn)
            .await?;

        Ok(record.into())
    }

    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn find_by_key(
        &self,
        conn: &mut PgConnection,
        key: &ConversationKey,
    ) -> Result<Option<Conversation>> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.conversation_key = $1");
        let record = sqlx::query_as::<_, ConversationRecord>(&sql).bind(key.as_str()).fetch_optional(conn).await?;
        Ok(record.map(Into::into))
    }

    /// # Errors
    /// Returns `AppError::NotFound` if the conversation does not exist.
    #[tracing::instrument(level = "debug", skip(self, conn, last))]
    pub(crate) async fn record_message_sent(
        &self,
        conn: &mut PgConnection,
        conversation_id: Uuid,
        last: &LastMessage,
        recipient_id: Uuid,
    ) -> Result<()> {
        let updated = sqlx::query(
            r"
            UPDATE conversations
            SET last_message_content = $2,
                last_message_sender = $3,
                last_message_type = $4,
                last_message_at = $5,
                last_activity_at = GREATEST(last_activity_at, $5),
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(conversation_id)
        .bind(&last.content)
        .bind(last.sender_id)
        .bind(last.message_type.as_str())
        .bind(last.sent_at)
        .execute(&mut *conn)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound("Conversation"));
        }

        sqlx::query(
            r"
            INSERT INTO conversation_participants (conversation_id, user_id, unread_count)
            VALUES ($1, $2, 1)
            ON CONFLICT (conversation_id, user_id)
            DO UPDATE SET unread_count = conversation_participants.unread_count + 1
            ",
        )
        .bind(conversation_id)
        .bind(recipient_id)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// # Errors
    /// Returns `AppError::Database` if the update fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn reset_unread(&self, conn: &mut PgConnection, conversation_id: Uuid, reader_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE conversation_participants SET unread_count = 0 WHERE conversation_id = $1 AND user_id = $2")
            .bind(conversation_id)
            .bind(reader_id)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn list_for_user(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Conversation>> {
        let sql = format!(
            r"
            SELECT {CONVERSATION_COLUMNS}
            FROM conversations c
            WHERE c.participant_a = $1 OR c.participant_b = $1
            ORDER BY c.last_activity_at DESC, c.id DESC
            LIMIT $2 OFFSET $3
            "
        );
        let records = sqlx::query_as::<_, ConversationRecord>(&sql)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(conn)
            .await?;
        Ok(records.into_iter().map(Into::into).collect())
    }

    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn unread_total(&self, conn: &mut PgConnection, user_id: Uuid) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(unread_count), 0)::BIGINT FROM conversation_participants WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(conn)
        .await?;
        Ok(total)
    }
}
