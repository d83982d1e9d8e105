use super::PresenceDirectory;
use crate::adapters::redis::RedisClient;
use crate::domain::presence::ConnectionId;
use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const COMPARE_AND_DELETE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

const COMPARE_AND_EXPIRE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 0
";

const SCAN_BATCH: usize = 200;

/// Presence entries stored in Redis with a TTL, visible to every instance.
#[derive(Debug)]
pub struct SharedPresence {
    redis: Arc<RedisClient>,
    prefix: String,
    compare_and_delete: Script,
    compare_and_expire: Script,
}

impl SharedPresence {
    #[must_use]
    pub fn new(redis: Arc<RedisClient>, prefix: String) -> Self {
        Self {
            redis,
            prefix,
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            compare_and_expire: Script::new(COMPARE_AND_EXPIRE),
        }
    }

    fn key(&self, user_id: Uuid) -> String {
        format!("{}{user_id}", self.prefix)
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl PresenceDirectory for SharedPresence {
    #[tracing::instrument(skip(self), level = "debug")]
    async fn set(&self, user_id: Uuid, connection: ConnectionId, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.redis.connection();
        let _: () = conn.set_ex(self.key(user_id), connection.to_string(), ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn get(&self, user_id: Uuid) -> anyhow::Result<Option<ConnectionId>> {
        let mut conn = self.redis.connection();
        let raw: Option<String> = conn.get(self.key(user_id)).await?;
        Ok(raw.and_then(|value| value.parse().ok()))
    }

    async fn delete(&self, user_id: Uuid) -> anyhow::Result<()> {
        let mut conn = self.redis.connection();
        let _: i64 = conn.del(self.key(user_id)).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn delete_if_current(&self, user_id: Uuid, connection: ConnectionId) -> anyhow::Result<bool> {
        let mut conn = self.redis.connection();
        let removed: i64 = self
            .compare_and_delete
            .key(self.key(user_id))
            .arg(connection.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn refresh(&self, user_id: Uuid, connection: ConnectionId, ttl: Duration) -> anyhow::Result<bool> {
        let mut conn = self.redis.connection();
        let refreshed: i64 = self
            .compare_and_expire
            .key(self.key(user_id))
            .arg(connection.to_string())
            .arg(ttl_secs(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(refreshed == 1)
    }

    async fn list_all(&self) -> anyhow::Result<Vec<Uuid>> {
        let mut conn = self.redis.connection();
        let pattern = format!("{}*", self.prefix);
        let mut cursor: u64 = 0;
        let mut users = Vec::new();

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            users.extend(
                keys.iter()
                    .filter_map(|key| key.strip_prefix(&self.prefix))
                    .filter_map(|id| Uuid::parse_str(id).ok()),
            );

            if next == 0 {
                break;
            }
            cursor = next;
        }

        users.sort_unstable();
        users.dedup();
        Ok(users)
    }
}
