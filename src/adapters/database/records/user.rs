use crate::domain::user::UserSummary;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub struct UserRecord {
    pub(crate) id: Uuid,
    pub(crate) name: String,
    pub(crate) avatar_url: Option<String>,
    pub(crate) role: String,
}

impl From<UserRecord> for UserSummary {
    fn from(record: UserRecord) -> Self {
        Self { id: record.id, name: record.name, avatar_url: record.avatar_url, role: Some(record.role) }
    }
}
