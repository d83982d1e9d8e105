use crate::config::PubSubConfig;
use anyhow::Context;
use backon::{ExponentialBuilder, Retryable};
use futures::StreamExt;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::Instrument;

/// Redis access for presence commands and the realtime relay channel.
#[derive(Debug)]
pub struct RedisClient {
    commands: redis::aio::ConnectionManager,
    client: redis::Client,
    shutdown: watch::Receiver<bool>,
    config: PubSubConfig,
}

impl RedisClient {
    /// # Errors
    /// Returns an error if no URL is configured or the connection fails.
    pub async fn new(config: &PubSubConfig, shutdown: watch::Receiver<bool>) -> anyhow::Result<Arc<Self>> {
        let url = config.url.as_deref().context("a Redis URL is required for the shared realtime backend")?;
        let client = redis::Client::open(url)?;
        let commands = client.get_connection_manager().await?;

        Ok(Arc::new(Self { commands, client, shutdown, config: config.clone() }))
    }

    /// Multiplexed, auto-reconnecting connection for regular commands.
    #[must_use]
    pub fn connection(&self) -> redis::aio::ConnectionManager {
        self.commands.clone()
    }

    /// # Errors
    /// Returns an error if the Redis operation fails.
    pub async fn publish(&self, channel: &str, payload: &[u8]) -> anyhow::Result<()> {
        let mut conn = self.connection();
        conn.publish::<_, _, i64>(channel, payload).await?;
        Ok(())
    }

    /// Subscribes to `channel` and returns a local feed of its payloads.
    ///
    /// The listener reconnects with backoff until shutdown. Returns once the first SUBSCRIBE succeeded,
    /// or once the listener gave up.
    ///
    /// # Errors
    /// Returns an error if the listener could not subscribe at all.
    pub async fn subscribe(&self, channel: &str) -> anyhow::Result<broadcast::Receiver<Vec<u8>>> {
        let (tx, rx) = broadcast::channel(self.config.channel_capacity);
        let (ready_tx, ready_rx) = oneshot::channel();

        let listener = ChannelListener {
            client: self.client.clone(),
            channel: channel.to_string(),
            tx,
            shutdown: self.shutdown.clone(),
            backoff: ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(self.config.min_backoff_secs))
                .with_max_delay(Duration::from_secs(self.config.max_backoff_secs)),
        };
        tokio::spawn(listener.run(ready_tx).instrument(tracing::debug_span!("pubsub_listener", %channel)));

        ready_rx.await.context("pubsub listener stopped before subscribing")?;
        Ok(rx)
    }

    /// # Errors
    /// Returns an error if the ping fails.
    pub async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.connection();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

struct ChannelListener {
    client: redis::Client,
    channel: String,
    tx: broadcast::Sender<Vec<u8>>,
    shutdown: watch::Receiver<bool>,
    backoff: ExponentialBuilder,
}

impl ChannelListener {
    async fn connect(&self) -> redis::RedisResult<redis::aio::PubSub> {
        (|| async {
            let mut pubsub = self.client.get_async_pubsub().await?;
            pubsub.subscribe(&self.channel).await?;
            Ok(pubsub)
        })
        .retry(&self.backoff)
        .notify(|e: &redis::RedisError, delay| {
            tracing::warn!(error = %e, ?delay, "Pubsub subscribe failed, retrying");
        })
        .await
    }

    async fn run(mut self, ready_tx: oneshot::Sender<()>) {
        let mut ready_tx = Some(ready_tx);

        while !*self.shutdown.borrow() {
            let pubsub = match self.connect().await {
                Ok(pubsub) => pubsub,
                Err(e) => {
                    tracing::error!(error = %e, "Pubsub subscription failed after retries");
                    return;
                }
            };
            tracing::info!(channel = %self.channel, "Subscribed to pubsub");
            if let Some(ready) = ready_tx.take() {
                let _ = ready.send(());
            }

            let mut messages = pubsub.into_on_message();
            loop {
                tokio::select! {
                    _ = self.shutdown.changed() => return,
                    msg = messages.next() => {
                        let Some(msg) = msg else {
                            tracing::warn!("Pubsub connection lost, reconnecting");
                            break;
                        };
                        // No receivers only means the dispatcher has stopped.
                        let _ = self.tx.send(msg.get_payload().unwrap_or_default());
                    }
                }
            }
        }
    }
}
