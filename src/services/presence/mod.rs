use crate::domain::presence::ConnectionId;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

pub mod local;
pub mod shared;

pub use local::LocalPresence;
pub use shared::SharedPresence;

/// Maps each online user to the connection that most recently identified as them.
///
/// Failures are transient infrastructure errors; callers treat them as "offline".
#[async_trait]
pub trait PresenceDirectory: Send + Sync + std::fmt::Debug {
    /// Records `connection` as the user's current connection. Last writer wins.
    async fn set(&self, user_id: Uuid, connection: ConnectionId, ttl: Duration) -> anyhow::Result<()>;

    async fn get(&self, user_id: Uuid) -> anyhow::Result<Option<ConnectionId>>;

    async fn delete(&self, user_id: Uuid) -> anyhow::Result<()>;

    /// Removes the entry only if it still belongs to `connection`. Returns whether it was removed.
    async fn delete_if_current(&self, user_id: Uuid, connection: ConnectionId) -> anyhow::Result<bool>;

    /// Extends the entry's lifetime if it still belongs to `connection`.
    async fn refresh(&self, user_id: Uuid, connection: ConnectionId, ttl: Duration) -> anyhow::Result<bool>;

    async fn list_all(&self) -> anyhow::Result<Vec<Uuid>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_stale_disconnect_keeps_newer_connection() {
        let presence = LocalPresence::new();
        let user = Uuid::new_v4();
        let old = ConnectionId::new();
        let new = ConnectionId::new();

        presence.set(user, old, TTL).await.unwrap();
        presence.set(user, new, TTL).await.unwrap();

        // The old socket's disconnect arrives after the new identify.
        assert!(!presence.delete_if_current(user, old).await.unwrap());
        assert_eq!(presence.get(user).await.unwrap(), Some(new));

        assert!(presence.delete_if_current(user, new).await.unwrap());
        assert_eq!(presence.get(user).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_requires_ownership() {
        let presence = LocalPresence::new();
        let user = Uuid::new_v4();
        let owner = ConnectionId::new();
        presence.set(user, owner, TTL).await.unwrap();

        assert!(presence.refresh(user, owner, TTL).await.unwrap());
        assert!(!presence.refresh(user, ConnectionId::new(), TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_unconditional_delete() {
        let presence = LocalPresence::new();
        let user = Uuid::new_v4();
        presence.set(user, ConnectionId::new(), TTL).await.unwrap();

        presence.delete(user).await.unwrap();
        assert!(presence.list_all().await.unwrap().is_empty());
    }
}
