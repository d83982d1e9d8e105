use crate::adapters::database::DbPool;
use crate::domain::notification::NewNotification;
use crate::services::notification::NotificationSink;
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct NotificationRepository {
    pool: DbPool,
}

impl NotificationRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationSink for NotificationRepository {
    #[tracing::instrument(level = "debug", skip(self, notification), fields(user_id = %notification.user_id))]
    async fn create(&self, notification: NewNotification) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO notifications (id, user_id, kind, title, body, data) VALUES ($1, $2, $3, $4, $5, $6)")
            .bind(Uuid::new_v4())
            .bind(notification.user_id)
            .bind(notification.kind.as_str())
            .bind(notification.title)
            .bind(notification.body)
            .bind(notification.data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
