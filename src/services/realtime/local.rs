use super::{LocalConnections, RealtimeRelay};
use crate::domain::presence::ConnectionId;
use crate::domain::realtime::{RelayTarget, ServerEvent};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Delivers only to connections hosted by this process.
#[derive(Clone, Debug)]
pub struct LocalRelay {
    connections: LocalConnections,
}

impl LocalRelay {
    #[must_use]
    pub const fn new(connections: LocalConnections) -> Self {
        Self { connections }
    }
}

#[async_trait]
impl RealtimeRelay for LocalRelay {
    fn register(&self, connection: ConnectionId) -> mpsc::Receiver<ServerEvent> {
        self.connections.register(connection)
    }

    fn unregister(&self, connection: ConnectionId) {
        self.connections.unregister(connection);
    }

    async fn send_to(&self, connection: ConnectionId, event: ServerEvent) {
        self.connections.deliver(RelayTarget::Connection { id: connection }, &event);
    }

    async fn broadcast(&self, event: ServerEvent, except: Option<ConnectionId>) {
        self.connections.deliver(RelayTarget::Broadcast { except }, &event);
    }
}
