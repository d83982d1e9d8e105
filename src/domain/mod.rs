pub mod auth;
pub mod conversation;
pub mod message;
pub mod notification;
pub mod presence;
pub mod realtime;
pub mod user;
