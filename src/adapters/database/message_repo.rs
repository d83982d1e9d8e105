use crate::adapters::database::records::MessageRecord;
use crate::domain::conversation::ConversationKey;
use crate::domain::message::{Message, NewMessage};
use crate::error::{AppError, Result};
use sqlx::PgConnection;
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;

const MESSAGE_COLUMNS: &str = "id, conversation_key, sender_id, recipient_id, message_type, content, attachments, \
                               is_read, read_at, deleted_by, is_hidden, created_at";

/// Escapes `LIKE` metacharacters so user input is matched literally.
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Clone, Debug, Default)]
pub struct MessageRepository {}

impl MessageRepository {
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }

    /// Records a new message in the database.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the conversation or a participant does not exist.
    /// Returns `AppError::Database` if the insert fails.
    #[tracing::instrument(level = "debug", skip(self, conn, message), fields(message_type = %message.message_type))]
    pub(crate) async fn create(
        &self,
        conn: &mut PgConnection,
        key: &ConversationKey,
        message: NewMessage,
    ) -> Result<Message> {
        let sql = format!(
            r"
            INSERT INTO messages (id, conversation_key, sender_id, recipient_id, message_type, content, attachments)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {MESSAGE_COLUMNS}
            "
        );

        let result = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(Uuid::now_v7())
            .bind(key.as_str())
            .bind(message.sender_id)
            .bind(message.recipient_id)
            .bind(message.message_type.as_str())
            .bind(message.content)
            .bind(Json(message.attachments))
            .fetch_one(conn)
            .await;

        match result {
            Ok(record) => Ok(record.into()),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("23503") => Err(AppError::NotFound("Conversation")),
            Err(e) => Err(AppError::Database(e)),
        }
    }

    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn find_by_id(&self, conn: &mut PgConnection, id: Uuid) -> Result<Option<Message>> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");
        let record = sqlx::query_as::<_, MessageRecord>(&sql).bind(id).fetch_optional(conn).await?;
        Ok(record.map(Into::into))
    }

    /// Newest `limit` messages visible to `viewer`, returned oldest first.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn list_by_conversation(
        &self,
        conn: &mut PgConnection,
        key: &ConversationKey,
        viewer: Uuid,
        limit: i64,
        before: Option<OffsetDateTime>,
    ) -> Result<Vec<Message>> {
        let sql = format!(
            r"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE conversation_key = $1
              AND is_hidden = FALSE
              AND NOT ($2 = ANY(deleted_by))
              AND ($3::TIMESTAMPTZ IS NULL OR created_at < $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "
        );

        let records = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(key.as_str())
            .bind(viewer)
            .bind(before)
            .bind(limit)
            .fetch_all(conn)
            .await?;

        Ok(records.into_iter().rev().map(Into::into).collect())
    }

    /// # Errors
    /// Returns `AppError::Database` if the update fails.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn mark_many_read(
        &self,
        conn: &mut PgConnection,
        key: &ConversationKey,
        recipient_id: Uuid,
        sender_id: Uuid,
    ) -> Result<u64> {
        let result = sqlx::query(
            r"
            UPDATE messages
            SET is_read = TRUE, read_at = NOW()
            WHERE conversation_key = $1 AND recipient_id = $2 AND sender_id = $3 AND is_read = FALSE
            ",
        )
        .bind(key.as_str())
        .bind(recipient_id)
        .bind(sender_id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Adds `requester` to `deleted_by` and recomputes `is_hidden` in the same statement.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the message does not exist.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub(crate) async fn soft_delete(&self, conn: &mut PgConnection, id: Uuid, requester: Uuid) -> Result<bool> {
        let hidden: Option<bool> = sqlx::query_scalar(
            r"
            UPDATE messages
            SET deleted_by = CASE WHEN $2 = ANY(deleted_by) THEN deleted_by ELSE array_append(deleted_by, $2) END,
                is_hidden = is_hidden OR (
                    sender_id = ANY(array_append(deleted_by, $2)) AND recipient_id = ANY(array_append(deleted_by, $2))
                )
            WHERE id = $1
            RETURNING is_hidden
            ",
        )
        .bind(id)
        .bind(requester)
        .fetch_optional(conn)
        .await?;

        hidden.ok_or(AppError::NotFound("Message"))
    }

    /// # Errors
    /// Returns `AppError::Database` if the query fails.
    #[tracing::instrument(level = "debug", skip(self, conn, query))]
    pub(crate) async fn search(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        query: &str,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let sql = format!(
            r"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE (sender_id = $1 OR recipient_id = $1)
              AND is_hidden = FALSE
              AND NOT ($1 = ANY(deleted_by))
              AND content ILIKE '%' || $2 || '%' ESCAPE '\'
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "
        );

        let records = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(user_id)
            .bind(escape_like(query))
            .bind(limit)
            .fetch_all(conn)
            .await?;

        Ok(records.into_iter().map(Into::into).collect())
    }
}
