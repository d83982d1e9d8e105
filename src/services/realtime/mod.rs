use crate::domain::presence::ConnectionId;
use crate::domain::realtime::{RelayTarget, ServerEvent};
use async_trait::async_trait;
use dashmap::DashMap;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram, UpDownCounter},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

pub mod distributed;
pub mod local;

pub use distributed::DistributedRelay;
pub use local::LocalRelay;

/// Delivers server events to realtime connections, wherever they are hosted.
#[async_trait]
pub trait RealtimeRelay: Send + Sync + std::fmt::Debug {
    /// Registers a connection hosted by this instance and returns its outbound queue.
    fn register(&self, connection: ConnectionId) -> mpsc::Receiver<ServerEvent>;

    fn unregister(&self, connection: ConnectionId);

    async fn send_to(&self, connection: ConnectionId, event: ServerEvent);

    /// Sends to every connection except `except`.
    async fn broadcast(&self, event: ServerEvent, except: Option<ConnectionId>);
}

#[derive(Clone, Debug)]
struct Metrics {
    active_connections: UpDownCounter<i64>,
    delivered_total: Counter<u64>,
    dropped_total: Counter<u64>,
    gc_duration_seconds: Histogram<f64>,
    gc_reclaimed_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("mentorlink-server");
        Self {
            active_connections: meter
                .i64_up_down_counter("realtime_active_connections")
                .with_description("Realtime connections hosted by this instance")
                .build(),
            delivered_total: meter
                .u64_counter("realtime_events_delivered_total")
                .with_description("Events queued onto a local connection")
                .build(),
            dropped_total: meter
                .u64_counter("realtime_events_dropped_total")
                .with_description("Events dropped because a connection's outbound queue was full")
                .build(),
            gc_duration_seconds: meter
                .f64_histogram("realtime_gc_duration_seconds")
                .with_description("Time taken to sweep closed connection queues")
                .build(),
            gc_reclaimed_total: meter
                .u64_counter("realtime_gc_reclaimed_total")
                .with_description("Closed connection queues reclaimed by GC")
                .build(),
        }
    }
}

/// Outbound queues of the connections hosted by this instance.
#[derive(Clone, Debug)]
pub struct LocalConnections {
    queues: Arc<DashMap<ConnectionId, mpsc::Sender<ServerEvent>>>,
    buffer_size: usize,
    metrics: Metrics,
}

impl LocalConnections {
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        Self { queues: Arc::new(DashMap::new()), buffer_size: buffer_size.max(1), metrics: Metrics::new() }
    }

    pub fn register(&self, connection: ConnectionId) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        if self.queues.insert(connection, tx).is_none() {
            self.metrics.active_connections.add(1, &[]);
        }
        rx
    }

    pub fn unregister(&self, connection: ConnectionId) {
        if self.queues.remove(&connection).is_some() {
            self.metrics.active_connections.add(-1, &[]);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Queues `event` for every local connection matching `target`. Never blocks.
    pub fn deliver(&self, target: RelayTarget, event: &ServerEvent) {
        match target {
            RelayTarget::Connection { id } => {
                let closed = self.queues.get(&id).is_some_and(|tx| !self.try_queue(&tx, id, event.clone()));
                if closed {
                    self.unregister(id);
                }
            }
            RelayTarget::Broadcast { except } => {
                let mut closed = Vec::new();
                for entry in self.queues.iter() {
                    let id = *entry.key();
                    if Some(id) == except {
                        continue;
                    }
                    if !self.try_queue(entry.value(), id, event.clone()) {
                        closed.push(id);
                    }
                }
                for id in closed {
                    self.unregister(id);
                }
            }
        }
    }

    // Returns false if the receiving side is gone.
    fn try_queue(&self, tx: &mpsc::Sender<ServerEvent>, id: ConnectionId, event: ServerEvent) -> bool {
        match tx.try_send(event) {
            Ok(()) => {
                self.metrics.delivered_total.add(1, &[]);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %id, "Outbound queue full, dropping event");
                self.metrics.dropped_total.add(1, &[KeyValue::new("reason", "full")]);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Periodically drops queues whose session ended without unregistering.
    pub fn spawn_gc(&self, interval_secs: u64, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let connections = self.clone();
        tokio::spawn(
            async move { connections.run_gc(interval_secs, shutdown).await }.instrument(tracing::info_span!("relay_gc")),
        )
    }

    async fn run_gc(&self, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let start = std::time::Instant::now();
                    let mut reclaimed = 0;

                    self.queues.retain(|_, tx| {
                        let open = !tx.is_closed();
                        if !open {
                            self.metrics.active_connections.add(-1, &[]);
                            reclaimed += 1;
                        }
                        open
                    });

                    self.metrics.gc_duration_seconds.record(start.elapsed().as_secs_f64(), &[]);
                    if reclaimed > 0 {
                        self.metrics.gc_reclaimed_total.add(reclaimed, &[]);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}
