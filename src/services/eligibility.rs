use crate::error::{AppError, ForbiddenReason, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Answers whether two users share an accepted mentorship connection.
#[async_trait]
pub trait EligibilityGate: Send + Sync + std::fmt::Debug {
    async fn is_eligible(&self, a: Uuid, b: Uuid) -> anyhow::Result<bool>;

    /// The subset of `candidates` that `user_id` may message.
    async fn eligible_peers(&self, user_id: Uuid, candidates: &[Uuid]) -> anyhow::Result<HashSet<Uuid>> {
        let mut peers = HashSet::new();
        for candidate in candidates {
            if self.is_eligible(user_id, *candidate).await? {
                peers.insert(*candidate);
            }
        }
        Ok(peers)
    }
}

/// Fail-closed wrapper around the gate used by the messaging and realtime layers.
#[derive(Clone, Debug)]
pub struct EligibilityService {
    gate: Arc<dyn EligibilityGate>,
}

impl EligibilityService {
    #[must_use]
    pub fn new(gate: Arc<dyn EligibilityGate>) -> Self {
        Self { gate }
    }

    /// A lookup failure counts as "not eligible".
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn is_eligible(&self, a: Uuid, b: Uuid) -> bool {
        match self.gate.is_eligible(a, b).await {
            Ok(eligible) => eligible,
            Err(e) => {
                tracing::warn!(error = %e, "Eligibility lookup failed; treating as not eligible");
                false
            }
        }
    }

    /// # Errors
    /// Returns `Forbidden(NoMentorshipConnection)` unless the pair is eligible.
    pub async fn ensure_eligible(&self, a: Uuid, b: Uuid) -> Result<()> {
        if self.is_eligible(a, b).await {
            Ok(())
        } else {
            Err(AppError::Forbidden(ForbiddenReason::NoMentorshipConnection))
        }
    }

    /// Keeps only the candidates `user_id` may currently message. Empty on lookup failure.
    pub async fn filter(&self, user_id: Uuid, candidates: &[Uuid]) -> HashSet<Uuid> {
        if candidates.is_empty() {
            return HashSet::new();
        }
        match self.gate.eligible_peers(user_id, candidates).await {
            Ok(peers) => peers,
            Err(e) => {
                tracing::warn!(error = %e, "Batched eligibility lookup failed; hiding all conversations");
                HashSet::new()
            }
        }
    }
}
