use super::{LocalConnections, RealtimeRelay};
use crate::adapters::redis::RedisClient;
use crate::domain::presence::ConnectionId;
use crate::domain::realtime::{RelayEnvelope, RelayTarget, ServerEvent};
use async_trait::async_trait;
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::Instrument;

#[derive(Clone, Debug)]
struct Metrics {
    publish_total: Counter<u64>,
    received_total: Counter<u64>,
    malformed_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("mentorlink-server");
        Self {
            publish_total: meter
                .u64_counter("relay_publish_total")
                .with_description("Realtime events published to the shared channel")
                .build(),
            received_total: meter
                .u64_counter("relay_received_total")
                .with_description("Realtime events received from the shared channel")
                .build(),
            malformed_total: meter
                .u64_counter("relay_malformed_total")
                .with_description("Relay payloads that could not be decoded")
                .build(),
        }
    }
}

/// Fans events out through Redis pub/sub so every instance can deliver to the
/// connections it hosts.
#[derive(Debug)]
pub struct DistributedRelay {
    redis: Arc<RedisClient>,
    connections: LocalConnections,
    channel: String,
    metrics: Metrics,
}

impl DistributedRelay {
    /// Subscribes to the shared events channel and starts the local dispatcher.
    ///
    /// # Errors
    /// Returns an error if the subscription fails.
    pub async fn new(
        redis: Arc<RedisClient>,
        connections: LocalConnections,
        channel_prefix: &str,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<Self> {
        let channel = format!("{channel_prefix}events");
        let metrics = Metrics::new();

        let rx = redis.subscribe(&channel).await?;
        tokio::spawn(
            Self::run_dispatcher(rx, connections.clone(), metrics.clone(), shutdown)
                .instrument(tracing::info_span!("relay_dispatcher")),
        );

        Ok(Self { redis, connections, channel, metrics })
    }

    async fn run_dispatcher(
        mut rx: broadcast::Receiver<Vec<u8>>,
        connections: LocalConnections,
        metrics: Metrics,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                result = rx.recv() => {
                    match result {
                        Ok(payload) => match serde_json::from_slice::<RelayEnvelope>(&payload) {
                            Ok(envelope) => {
                                metrics.received_total.add(1, &[]);
                                connections.deliver(envelope.target, &envelope.event);
                            }
                            Err(e) => {
                                metrics.malformed_total.add(1, &[]);
                                tracing::warn!(error = %e, "Dropping malformed relay payload");
                            }
                        },
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(missed = n, "Relay dispatcher lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    async fn publish(&self, target: RelayTarget, event: ServerEvent) {
        let envelope = RelayEnvelope { target, event };
        let result = match serde_json::to_vec(&envelope) {
            Ok(payload) => self.redis.publish(&self.channel, &payload).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            // Connections on this instance still get the event.
            tracing::warn!(error = %e, "Relay publish failed, delivering locally only");
            self.metrics.publish_total.add(1, &[KeyValue::new("status", "error")]);
            self.connections.deliver(envelope.target, &envelope.event);
        } else {
            self.metrics.publish_total.add(1, &[KeyValue::new("status", "ok")]);
        }
    }
}

#[async_trait]
impl RealtimeRelay for DistributedRelay {
    fn register(&self, connection: ConnectionId) -> mpsc::Receiver<ServerEvent> {
        self.connections.register(connection)
    }

    fn unregister(&self, connection: ConnectionId) {
        self.connections.unregister(connection);
    }

    async fn send_to(&self, connection: ConnectionId, event: ServerEvent) {
        self.publish(RelayTarget::Connection { id: connection }, event).await;
    }

    async fn broadcast(&self, event: ServerEvent, except: Option<ConnectionId>) {
        self.publish(RelayTarget::Broadcast { except }, event).await;
    }
}
