pub mod attachment_service;
pub mod eligibility;
pub mod gateway;
pub mod health_service;
pub mod messaging_service;
pub mod notification;
pub mod presence;
pub mod realtime;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;
