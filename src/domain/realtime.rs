use crate::domain::message::MessageView;
use crate::domain::presence::{ConnectionId, PresenceStatus};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Frames a client may send over the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    #[serde(alias = "user_online")]
    Identify { user_id: Uuid },
    SendMessage { recipient_id: Uuid, message: Box<MessageView> },
    TypingStart { recipient_id: Uuid },
    TypingStop { recipient_id: Uuid },
    MessagesRead { sender_id: Uuid },
}

/// Frames the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    ReceiveMessage {
        message: Box<MessageView>,
    },
    UserStatusChanged {
        user_id: Uuid,
        status: PresenceStatus,
    },
    UserTyping {
        sender_id: Uuid,
    },
    UserStoppedTyping {
        sender_id: Uuid,
    },
    MessagesMarkedRead {
        read_by: Uuid,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
    },
    OnlineUsers {
        user_ids: Vec<Uuid>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error { code: code.to_string(), message: message.into() }
    }
}

/// Where a relayed event should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayTarget {
    Connection { id: ConnectionId },
    Broadcast { except: Option<ConnectionId> },
}

/// An event in transit between gateway instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub target: RelayTarget,
    pub event: ServerEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identify_accepts_alias() {
        let user = Uuid::new_v4();
        let a: ClientEvent = serde_json::from_value(json!({"type": "identify", "userId": user})).unwrap();
        let b: ClientEvent = serde_json::from_value(json!({"type": "user_online", "userId": user})).unwrap();

        assert_eq!(a, ClientEvent::Identify { user_id: user });
        assert_eq!(a, b);
    }

    #[test]
    fn test_typing_event_shape() {
        let recipient = Uuid::new_v4();
        let event: ClientEvent =
            serde_json::from_value(json!({"type": "typing_start", "recipientId": recipient})).unwrap();
        assert_eq!(event, ClientEvent::TypingStart { recipient_id: recipient });
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let result = serde_json::from_value::<ClientEvent>(json!({"type": "launch_rockets"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_server_event_wire_format() {
        let user = Uuid::new_v4();
        let value =
            serde_json::to_value(ServerEvent::UserStatusChanged { user_id: user, status: PresenceStatus::Online })
                .unwrap();

        assert_eq!(value, json!({"type": "user_status_changed", "userId": user, "status": "online"}));
    }

    #[test]
    fn test_envelope_survives_json() {
        let envelope = RelayEnvelope {
            target: RelayTarget::Broadcast { except: Some(ConnectionId::new()) },
            event: ServerEvent::OnlineUsers { user_ids: vec![Uuid::new_v4()] },
        };

        let text = serde_json::to_string(&envelope).unwrap();
        assert_eq!(serde_json::from_str::<RelayEnvelope>(&text).unwrap(), envelope);
    }
}
