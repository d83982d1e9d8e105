pub(crate) mod session;

use crate::config::RealtimeConfig;
use crate::domain::presence::{ConnectionId, ConnectionState, PresenceStatus};
use crate::domain::realtime::{ClientEvent, ServerEvent};
use crate::error::ForbiddenReason;
use crate::services::eligibility::EligibilityService;
use crate::services::gateway::session::Session;
use crate::services::presence::PresenceDirectory;
use crate::services::realtime::RealtimeRelay;
use axum::extract::ws::WebSocket;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, UpDownCounter},
};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const NOT_IDENTIFIED: &str = "NOT_IDENTIFIED";
pub const INVALID_EVENT: &str = "INVALID_EVENT";
pub const IDENTITY_MISMATCH: &str = "IDENTITY_MISMATCH";

#[derive(Clone, Debug)]
pub(crate) struct Metrics {
    pub(crate) active_sessions: UpDownCounter<i64>,
    pub(crate) inbound_events_total: Counter<u64>,
    pub(crate) pushes_total: Counter<u64>,
}

impl Metrics {
    #[must_use]
    pub(crate) fn new() -> Self {
        let meter = global::meter("mentorlink-server");
        Self {
            active_sessions: meter
                .i64_up_down_counter("websocket_active_sessions")
                .with_description("Number of open realtime sessions")
                .build(),
            inbound_events_total: meter
                .u64_counter("websocket_inbound_events_total")
                .with_description("Client events received, by type")
                .build(),
            pushes_total: meter
                .u64_counter("realtime_pushes_total")
                .with_description("Targeted pushes by outcome")
                .build(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

const fn event_name(event: &ClientEvent) -> &'static str {
    match event {
        ClientEvent::Identify { .. } => "identify",
        ClientEvent::SendMessage { .. } => "send_message",
        ClientEvent::TypingStart { .. } => "typing_start",
        ClientEvent::TypingStop { .. } => "typing_stop",
        ClientEvent::MessagesRead { .. } => "messages_read",
    }
}

/// Presence tracking and event routing for realtime connections.
#[derive(Clone, Debug)]
pub struct GatewayService {
    presence: Arc<dyn PresenceDirectory>,
    relay: Arc<dyn RealtimeRelay>,
    eligibility: EligibilityService,
    config: RealtimeConfig,
    metrics: Metrics,
}

impl GatewayService {
    #[must_use]
    pub fn new(
        presence: Arc<dyn PresenceDirectory>,
        relay: Arc<dyn RealtimeRelay>,
        eligibility: EligibilityService,
        config: RealtimeConfig,
    ) -> Self {
        Self { presence, relay, eligibility, config, metrics: Metrics::new() }
    }

    const fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.config.presence_ttl_secs)
    }

    const fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.config.presence_lookup_timeout_ms)
    }

    pub async fn handle_socket(
        &self,
        socket: WebSocket,
        user_id: Uuid,
        request_id: String,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        let connection_id = ConnectionId::new();
        let outbound_rx = self.attach(connection_id);

        let session = Session {
            connection_id,
            user_id,
            request_id,
            socket,
            outbound_rx,
            gateway: self.clone(),
            refresh_interval: self.presence_ttl() / 2,
            shutdown_rx,
        };

        session.run().await;
    }

    /// Registers a new connection with the relay and returns its outbound queue.
    pub fn attach(&self, connection_id: ConnectionId) -> mpsc::Receiver<ServerEvent> {
        self.relay.register(connection_id)
    }

    /// Pushes `event` to the user's current connection.
    ///
    /// Returns `false` when the user is offline or presence could not be resolved in time.
    #[tracing::instrument(skip(self, event), level = "debug")]
    pub async fn push_to_user(&self, user_id: Uuid, event: ServerEvent) -> bool {
        match tokio::time::timeout(self.lookup_timeout(), self.presence.get(user_id)).await {
            Ok(Ok(Some(connection))) => {
                self.relay.send_to(connection, event).await;
                self.metrics.pushes_total.add(1, &[KeyValue::new("outcome", "delivered")]);
                true
            }
            Ok(Ok(None)) => {
                self.metrics.pushes_total.add(1, &[KeyValue::new("outcome", "offline")]);
                false
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Presence lookup failed, treating user as offline");
                self.metrics.pushes_total.add(1, &[KeyValue::new("outcome", "lookup_failed")]);
                false
            }
            Err(_) => {
                tracing::warn!("Presence lookup timed out, treating user as offline");
                self.metrics.pushes_total.add(1, &[KeyValue::new("outcome", "lookup_timeout")]);
                false
            }
        }
    }

    /// Users with a live presence entry. Empty if presence is unavailable.
    pub async fn online_users(&self) -> Vec<Uuid> {
        match tokio::time::timeout(self.lookup_timeout(), self.presence.list_all()).await {
            Ok(Ok(users)) => users,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to list online users");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("Listing online users timed out");
                Vec::new()
            }
        }
    }

    /// Applies one client event and returns the reply for the sending connection, if any.
    #[tracing::instrument(
        skip(self, state, event),
        fields(connection_id = %connection_id, event = event_name(&event))
    )]
    pub async fn handle_client_event(
        &self,
        connection_id: ConnectionId,
        state: &mut ConnectionState,
        authenticated_user: Uuid,
        event: ClientEvent,
    ) -> Option<ServerEvent> {
        self.metrics.inbound_events_total.add(1, &[KeyValue::new("type", event_name(&event))]);

        if let ClientEvent::Identify { user_id } = event {
            return Some(self.identify(connection_id, state, authenticated_user, user_id).await);
        }

        let Some(user_id) = state.user() else {
            return Some(ServerEvent::error(NOT_IDENTIFIED, "Send identify before other events"));
        };

        match event {
            ClientEvent::Identify { .. } => None,
            ClientEvent::SendMessage { recipient_id, message } => {
                if message.sender.id != user_id {
                    return Some(ServerEvent::error(IDENTITY_MISMATCH, "Message sender does not match this connection"));
                }
                if !self.eligibility.is_eligible(user_id, recipient_id).await {
                    let reason = ForbiddenReason::NoMentorshipConnection;
                    return Some(ServerEvent::error(reason.code(), "You cannot message this user"));
                }
                self.push_to_user(recipient_id, ServerEvent::ReceiveMessage { message }).await;
                None
            }
            ClientEvent::TypingStart { recipient_id } => {
                self.push_to_user(recipient_id, ServerEvent::UserTyping { sender_id: user_id }).await;
                None
            }
            ClientEvent::TypingStop { recipient_id } => {
                self.push_to_user(recipient_id, ServerEvent::UserStoppedTyping { sender_id: user_id }).await;
                None
            }
            ClientEvent::MessagesRead { sender_id } => {
                let event = ServerEvent::MessagesMarkedRead { read_by: user_id, timestamp: OffsetDateTime::now_utc() };
                self.push_to_user(sender_id, event).await;
                None
            }
        }
    }

    async fn identify(
        &self,
        connection_id: ConnectionId,
        state: &mut ConnectionState,
        authenticated_user: Uuid,
        claimed_user: Uuid,
    ) -> ServerEvent {
        if claimed_user != authenticated_user || !state.identify(claimed_user) {
            tracing::warn!(%claimed_user, %authenticated_user, "Identify rejected");
            return ServerEvent::error(IDENTITY_MISMATCH, "Identity does not match the authenticated user");
        }

        if let Err(e) = self.presence.set(claimed_user, connection_id, self.presence_ttl()).await {
            tracing::warn!(error = %e, "Failed to record presence");
        }

        self.relay
            .broadcast(
                ServerEvent::UserStatusChanged { user_id: claimed_user, status: PresenceStatus::Online },
                Some(connection_id),
            )
            .await;

        tracing::info!(user_id = %claimed_user, "Connection identified");
        ServerEvent::OnlineUsers { user_ids: self.online_users().await }
    }

    /// Keeps the presence entry alive while this connection owns it.
    pub async fn refresh_presence(&self, user_id: Uuid, connection_id: ConnectionId) {
        let ttl = self.presence_ttl();
        match self.presence.refresh(user_id, connection_id, ttl).await {
            Ok(true) => {}
            Ok(false) => match self.presence.get(user_id).await {
                // Entry expired underneath a live connection; claim it again.
                Ok(None) => {
                    if let Err(e) = self.presence.set(user_id, connection_id, ttl).await {
                        tracing::warn!(error = %e, "Failed to restore presence");
                    }
                }
                Ok(Some(_)) => tracing::debug!("Presence owned by a newer connection"),
                Err(e) => tracing::warn!(error = %e, "Presence lookup failed during refresh"),
            },
            Err(e) => tracing::warn!(error = %e, "Failed to refresh presence"),
        }
    }

    /// Tears the connection down and announces the user offline if this connection still owned presence.
    pub async fn on_disconnect(&self, connection_id: ConnectionId, state: &mut ConnectionState) {
        self.relay.unregister(connection_id);

        let Some(user_id) = state.disconnect() else {
            return;
        };

        match self.presence.delete_if_current(user_id, connection_id).await {
            Ok(true) => {
                self.relay
                    .broadcast(ServerEvent::UserStatusChanged { user_id, status: PresenceStatus::Offline }, None)
                    .await;
            }
            Ok(false) => tracing::debug!(%user_id, "Stale disconnect, presence kept for newer connection"),
            Err(e) => tracing::warn!(error = %e, %user_id, "Failed to clear presence"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::{MessageType, MessageView};
    use crate::domain::user::UserSummary;
    use crate::services::eligibility::EligibilityGate;
    use crate::services::presence::LocalPresence;
    use crate::services::realtime::{LocalConnections, LocalRelay};
    use crate::services::test_support::MemoryEligibility;

    struct Harness {
        gateway: GatewayService,
        presence: Arc<LocalPresence>,
        gate: Arc<MemoryEligibility>,
    }

    fn harness() -> Harness {
        let presence = Arc::new(LocalPresence::new());
        let gate = Arc::new(MemoryEligibility::default());
        let relay = Arc::new(LocalRelay::new(LocalConnections::new(16)));
        let gateway = GatewayService::new(
            Arc::clone(&presence) as Arc<dyn PresenceDirectory>,
            relay,
            EligibilityService::new(Arc::clone(&gate) as Arc<dyn EligibilityGate>),
            RealtimeConfig::default(),
        );
        Harness { gateway, presence, gate }
    }

    struct Client {
        id: ConnectionId,
        user: Uuid,
        state: ConnectionState,
        rx: mpsc::Receiver<ServerEvent>,
    }

    impl Client {
        fn connect(gateway: &GatewayService, user: Uuid) -> Self {
            let id = ConnectionId::new();
            let rx = gateway.attach(id);
            Self { id, user, state: ConnectionState::default(), rx }
        }

        async fn send(&mut self, gateway: &GatewayService, event: ClientEvent) -> Option<ServerEvent> {
            gateway.handle_client_event(self.id, &mut self.state, self.user, event).await
        }

        async fn identify(&mut self, gateway: &GatewayService) -> Option<ServerEvent> {
            let user_id = self.user;
            self.send(gateway, ClientEvent::Identify { user_id }).await
        }

        // Discards presence announcements queued while peers identified.
        fn drain(&mut self) {
            while self.rx.try_recv().is_ok() {}
        }
    }

    fn error_code(event: Option<ServerEvent>) -> Option<String> {
        match event {
            Some(ServerEvent::Error { code, .. }) => Some(code),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_events_before_identify_are_rejected() {
        let h = harness();
        let mut client = Client::connect(&h.gateway, Uuid::new_v4());

        let reply = client.send(&h.gateway, ClientEvent::TypingStart { recipient_id: Uuid::new_v4() }).await;
        assert_eq!(error_code(reply).as_deref(), Some(NOT_IDENTIFIED));
    }

    #[tokio::test]
    async fn test_identify_must_match_token_subject() {
        let h = harness();
        let mut client = Client::connect(&h.gateway, Uuid::new_v4());

        let reply = client.send(&h.gateway, ClientEvent::Identify { user_id: Uuid::new_v4() }).await;
        assert_eq!(error_code(reply).as_deref(), Some(IDENTITY_MISMATCH));
        assert_eq!(client.state, ConnectionState::Anonymous);
    }

    #[tokio::test]
    async fn test_identify_announces_presence_to_others() {
        let h = harness();
        let mut watcher = Client::connect(&h.gateway, Uuid::new_v4());
        let mut client = Client::connect(&h.gateway, Uuid::new_v4());

        let reply = client.identify(&h.gateway).await;
        match reply {
            Some(ServerEvent::OnlineUsers { user_ids }) => assert!(user_ids.contains(&client.user)),
            other => panic!("unexpected reply {other:?}"),
        }

        assert_eq!(
            watcher.rx.try_recv().unwrap(),
            ServerEvent::UserStatusChanged { user_id: client.user, status: PresenceStatus::Online }
        );
        // The identifying connection does not hear its own announcement.
        assert!(client.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_typing_reaches_only_the_recipient() {
        let h = harness();
        let mut sender = Client::connect(&h.gateway, Uuid::new_v4());
        let mut recipient = Client::connect(&h.gateway, Uuid::new_v4());
        let mut bystander = Client::connect(&h.gateway, Uuid::new_v4());
        sender.identify(&h.gateway).await;
        recipient.identify(&h.gateway).await;
        bystander.identify(&h.gateway).await;
        recipient.drain();
        bystander.drain();

        let to = recipient.user;
        assert!(sender.send(&h.gateway, ClientEvent::TypingStart { recipient_id: to }).await.is_none());

        assert_eq!(recipient.rx.try_recv().unwrap(), ServerEvent::UserTyping { sender_id: sender.user });
        assert!(bystander.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_read_receipt_goes_to_original_sender() {
        let h = harness();
        let mut reader = Client::connect(&h.gateway, Uuid::new_v4());
        let mut author = Client::connect(&h.gateway, Uuid::new_v4());
        reader.identify(&h.gateway).await;
        author.identify(&h.gateway).await;
        author.drain();

        let sender_id = author.user;
        reader.send(&h.gateway, ClientEvent::MessagesRead { sender_id }).await;

        match author.rx.try_recv().unwrap() {
            ServerEvent::MessagesMarkedRead { read_by, .. } => assert_eq!(read_by, reader.user),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_socket_send_requires_eligibility() {
        let h = harness();
        let mut sender = Client::connect(&h.gateway, Uuid::new_v4());
        let mut recipient = Client::connect(&h.gateway, Uuid::new_v4());
        sender.identify(&h.gateway).await;
        recipient.identify(&h.gateway).await;
        recipient.drain();

        let message = Box::new(MessageView {
            id: Uuid::now_v7(),
            conversation_id: "k".into(),
            sender: UserSummary::unknown(sender.user),
            recipient: UserSummary::unknown(recipient.user),
            content: Some("hello".into()),
            message_type: MessageType::Text,
            attachments: vec![],
            read: false,
            read_at: None,
            created_at: OffsetDateTime::now_utc(),
        });
        let event = ClientEvent::SendMessage { recipient_id: recipient.user, message: message.clone() };

        let reply = sender.send(&h.gateway, event.clone()).await;
        assert_eq!(error_code(reply).as_deref(), Some("NO_MENTORSHIP_CONNECTION"));
        assert!(recipient.rx.try_recv().is_err());

        h.gate.connect(sender.user, recipient.user);
        assert!(sender.send(&h.gateway, event).await.is_none());
        assert_eq!(recipient.rx.try_recv().unwrap(), ServerEvent::ReceiveMessage { message });
    }

    #[tokio::test]
    async fn test_stale_disconnect_does_not_announce_offline() {
        let h = harness();
        let user = Uuid::new_v4();
        let mut watcher = Client::connect(&h.gateway, Uuid::new_v4());
        let mut first = Client::connect(&h.gateway, user);
        let mut second = Client::connect(&h.gateway, user);
        first.identify(&h.gateway).await;
        second.identify(&h.gateway).await;
        watcher.drain();

        h.gateway.on_disconnect(first.id, &mut first.state).await;
        assert!(watcher.rx.try_recv().is_err());
        assert_eq!(h.presence.get(user).await.unwrap(), Some(second.id));

        h.gateway.on_disconnect(second.id, &mut second.state).await;
        assert_eq!(
            watcher.rx.try_recv().unwrap(),
            ServerEvent::UserStatusChanged { user_id: user, status: PresenceStatus::Offline }
        );
        assert_eq!(h.presence.get(user).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_push_to_offline_user_is_a_no_op() {
        let h = harness();
        assert!(!h.gateway.push_to_user(Uuid::new_v4(), ServerEvent::UserTyping { sender_id: Uuid::new_v4() }).await);
    }
}
