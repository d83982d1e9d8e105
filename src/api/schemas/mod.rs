pub mod attachments;
pub mod health;
pub mod messaging;
