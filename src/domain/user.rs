use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display fields of a user, as embedded in messages and conversation entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    #[serde(rename = "_id")]
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl UserSummary {
    /// Placeholder for a user whose profile could not be resolved.
    #[must_use]
    pub const fn unknown(id: Uuid) -> Self {
        Self { id, name: String::new(), avatar_url: None, role: None }
    }
}
