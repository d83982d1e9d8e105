use crate::domain::notification::NewNotification;
use async_trait::async_trait;

/// Stores notification records for the delivery pipeline to pick up.
#[async_trait]
pub trait NotificationSink: Send + Sync + std::fmt::Debug {
    async fn create(&self, notification: NewNotification) -> anyhow::Result<()>;
}
