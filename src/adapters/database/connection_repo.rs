use crate::adapters::database::DbPool;
use crate::services::eligibility::EligibilityGate;
use async_trait::async_trait;
use std::collections::HashSet;
use uuid::Uuid;

/// Answers eligibility from accepted rows in `mentorship_connections`.
#[derive(Clone, Debug)]
pub struct ConnectionRepository {
    pool: DbPool,
}

impl ConnectionRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EligibilityGate for ConnectionRepository {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn is_eligible(&self, a: Uuid, b: Uuid) -> anyhow::Result<bool> {
        let eligible: bool = sqlx::query_scalar(
            r"
            SELECT EXISTS(
                SELECT 1 FROM mentorship_connections
                WHERE status = 'accepted'
                  AND ((mentor_id = $1 AND student_id = $2) OR (mentor_id = $2 AND student_id = $1))
            )
            ",
        )
        .bind(a)
        .bind(b)
        .fetch_one(&self.pool)
        .await?;
        Ok(eligible)
    }

    #[tracing::instrument(level = "debug", skip(self, candidates), fields(candidates = candidates.len()))]
    async fn eligible_peers(&self, user_id: Uuid, candidates: &[Uuid]) -> anyhow::Result<HashSet<Uuid>> {
        if candidates.is_empty() {
            return Ok(HashSet::new());
        }

        let peers: Vec<Uuid> = sqlx::query_scalar(
            r"
            SELECT CASE WHEN mentor_id = $1 THEN student_id ELSE mentor_id END
            FROM mentorship_connections
            WHERE status = 'accepted'
              AND ((mentor_id = $1 AND student_id = ANY($2)) OR (student_id = $1 AND mentor_id = ANY($2)))
            ",
        )
        .bind(user_id)
        .bind(candidates)
        .fetch_all(&self.pool)
        .await?;

        Ok(peers.into_iter().collect())
    }
}
