#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

pub mod adapters;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;
pub mod telemetry;

use crate::adapters::database::DbPool;
use crate::adapters::database::connection_repo::ConnectionRepository;
use crate::adapters::database::notification_repo::NotificationRepository;
use crate::adapters::database::store::PgMessagingStore;
use crate::adapters::database::user_repo::UserRepository;
use crate::adapters::redis::RedisClient;
use crate::adapters::storage::{ObjectStorage, S3Storage};
use crate::api::ServiceContainer;
use crate::config::{Config, RealtimeBackend, StorageConfig};
use crate::services::attachment_service::AttachmentService;
use crate::services::eligibility::EligibilityService;
use crate::services::gateway::GatewayService;
use crate::services::health_service::HealthService;
use crate::services::messaging_service::MessagingService;
use crate::services::presence::{LocalPresence, PresenceDirectory, SharedPresence};
use crate::services::realtime::{DistributedRelay, LocalConnections, LocalRelay, RealtimeRelay};
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Runs the embedded database migrations.
///
/// # Errors
/// Returns an error if a migration fails to apply.
pub async fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    sqlx::migrate!().run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// Flips the shutdown channel on ctrl-c or SIGTERM.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {},
            () = terminate => {},
        }

        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
}

/// Routes panics through `tracing` so they reach the configured exporters.
pub fn setup_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info.location().map(|l| format!("{}:{}", l.file(), l.line())).unwrap_or_default();
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_default();

        tracing::error!(panic.location = %location, panic.payload = %payload, "Thread panicked");
        default_hook(info);
    }));
}

/// Builds an S3 client from static credentials when given, otherwise from the default provider chain.
pub async fn initialize_s3_client(config: &StorageConfig) -> aws_sdk_s3::Client {
    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region.clone()));

    if let Some(endpoint) = &config.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
        loader = loader.credentials_provider(aws_credential_types::Credentials::new(
            access_key, secret_key, None, None, "static",
        ));
    }

    let sdk_config = loader.load().await;
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(config.force_path_style).build();
    aws_sdk_s3::Client::from_conf(s3_config)
}

/// Fully wired services plus the background tasks they started.
#[derive(Debug)]
pub struct App {
    pub services: ServiceContainer,
    pub health_service: HealthService,
    pub background_tasks: Vec<JoinHandle<()>>,
}

#[derive(Debug)]
pub struct AppBuilder {
    config: Config,
    pool: Option<DbPool>,
    pubsub: Option<Arc<RedisClient>>,
    storage: Option<Arc<dyn ObjectStorage>>,
    shutdown_rx: Option<watch::Receiver<bool>>,
}

impl AppBuilder {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config, pool: None, pubsub: None, storage: None, shutdown_rx: None }
    }

    #[must_use]
    pub fn with_database(mut self, pool: DbPool) -> Self {
        self.pool = Some(pool);
        self
    }

    #[must_use]
    pub fn with_pubsub(mut self, pubsub: Arc<RedisClient>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    #[must_use]
    pub fn with_s3(mut self, client: aws_sdk_s3::Client) -> Self {
        let bucket = self.config.storage.bucket.clone();
        self.storage = Some(Arc::new(S3Storage::new(client, bucket)));
        self
    }

    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[must_use]
    pub fn with_shutdown_rx(mut self, shutdown_rx: watch::Receiver<bool>) -> Self {
        self.shutdown_rx = Some(shutdown_rx);
        self
    }

    /// Wires every service and starts the realtime background tasks.
    ///
    /// # Errors
    /// Returns an error if a required resource was not provided or the relay cannot subscribe.
    pub async fn build(self) -> anyhow::Result<App> {
        let config = self.config;
        let pool = self.pool.context("a database pool is required")?;
        let storage = self.storage.context("object storage is required")?;
        let shutdown_rx = self.shutdown_rx.context("a shutdown receiver is required")?;

        let eligibility = EligibilityService::new(Arc::new(ConnectionRepository::new(pool.clone())));

        let connections = LocalConnections::new(config.realtime.outbound_buffer_size);
        let background_tasks = vec![connections.spawn_gc(config.realtime.gc_interval_secs, shutdown_rx.clone())];

        let (presence, relay, health_pubsub) =
            match config.realtime.backend {
                RealtimeBackend::Local => {
                    tracing::info!("Realtime backend: local (single instance)");
                    (
                        Arc::new(LocalPresence::new()) as Arc<dyn PresenceDirectory>,
                        Arc::new(LocalRelay::new(connections)) as Arc<dyn RealtimeRelay>,
                        None,
                    )
                }
                RealtimeBackend::Shared => {
                    let redis = self.pubsub.context("the shared realtime backend requires a Redis connection")?;
                    tracing::info!("Realtime backend: shared (Redis)");
                    let presence = SharedPresence::new(Arc::clone(&redis), config.pubsub.presence_prefix.clone());
                    let relay = DistributedRelay::new(
                        Arc::clone(&redis),
                        connections,
                        &config.pubsub.channel_prefix,
                        shutdown_rx.clone(),
                    )
                    .await?;
                    (
                        Arc::new(presence) as Arc<dyn PresenceDirectory>,
                        Arc::new(relay) as Arc<dyn RealtimeRelay>,
                        Some(redis),
                    )
                }
            };

        let gateway_service = GatewayService::new(presence, relay, eligibility.clone(), config.realtime.clone());

        let messaging_service = MessagingService::new(
            Arc::new(PgMessagingStore::new(pool.clone())),
            Arc::new(UserRepository::new(pool.clone())),
            eligibility,
            Arc::new(NotificationRepository::new(pool.clone())),
            gateway_service.clone(),
            config.messaging.clone(),
        );

        let attachment_service = AttachmentService::new(storage, config.storage.clone());
        let health_service = HealthService::new(pool, health_pubsub, config.health.clone());

        Ok(App {
            services: ServiceContainer { messaging_service, attachment_service, gateway_service },
            health_service,
            background_tasks,
        })
    }
}
