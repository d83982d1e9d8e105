use super::PresenceDirectory;
use crate::domain::presence::ConnectionId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct Entry {
    connection: ConnectionId,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process presence map. Only correct when a single instance serves every connection.
///
/// Expired entries are dropped lazily on access.
#[derive(Debug, Default)]
pub struct LocalPresence {
    entries: DashMap<Uuid, Entry>,
}

impl LocalPresence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceDirectory for LocalPresence {
    async fn set(&self, user_id: Uuid, connection: ConnectionId, ttl: Duration) -> anyhow::Result<()> {
        self.entries.insert(user_id, Entry { connection, expires_at: Instant::now() + ttl });
        Ok(())
    }

    async fn get(&self, user_id: Uuid) -> anyhow::Result<Option<ConnectionId>> {
        let now = Instant::now();
        let removed = self.entries.remove_if(&user_id, |_, entry| !entry.is_live(now));
        if removed.is_some() {
            return Ok(None);
        }
        Ok(self.entries.get(&user_id).map(|entry| entry.connection))
    }

    async fn delete(&self, user_id: Uuid) -> anyhow::Result<()> {
        self.entries.remove(&user_id);
        Ok(())
    }

    async fn delete_if_current(&self, user_id: Uuid, connection: ConnectionId) -> anyhow::Result<bool> {
        Ok(self.entries.remove_if(&user_id, |_, entry| entry.connection == connection).is_some())
    }

    async fn refresh(&self, user_id: Uuid, connection: ConnectionId, ttl: Duration) -> anyhow::Result<bool> {
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(&user_id)
            && entry.connection == connection
            && entry.is_live(now)
        {
            entry.expires_at = now + ttl;
            return Ok(true);
        }
        Ok(false)
    }

    async fn list_all(&self) -> anyhow::Result<Vec<Uuid>> {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));
        Ok(self.entries.iter().map(|entry| *entry.key()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_expire_lazily() {
        let presence = LocalPresence::new();
        let user = Uuid::new_v4();
        let connection = ConnectionId::new();
        presence.set(user, connection, Duration::from_millis(200)).await.unwrap();

        assert_eq!(presence.get(user).await.unwrap(), Some(connection));
        assert_eq!(presence.list_all().await.unwrap(), vec![user]);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(presence.get(user).await.unwrap(), None);
        assert!(presence.list_all().await.unwrap().is_empty());
        assert!(!presence.refresh(user, connection, Duration::from_secs(10)).await.unwrap());
    }
}
