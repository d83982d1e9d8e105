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

use axum::Router;
use mentorlink_server::api::MgmtState;
use mentorlink_server::config::{Config, RealtimeBackend};
use mentorlink_server::{AppBuilder, adapters, telemetry};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Everything `main` needs once the process is wired and its sockets are bound.
struct Server {
    api_listener: TcpListener,
    mgmt_listener: TcpListener,
    api: Router,
    mgmt: Router,
    shutdown_tx: watch::Sender<bool>,
    background_tasks: Vec<JoinHandle<()>>,
}

async fn boot(config: &Config) -> anyhow::Result<Server> {
    let pool = adapters::database::init_pool(&config.database).await?;
    mentorlink_server::run_migrations(&pool).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    mentorlink_server::spawn_signal_handler(shutdown_tx.clone());

    let s3_client = mentorlink_server::initialize_s3_client(&config.storage).await;
    let mut builder =
        AppBuilder::new(config.clone()).with_database(pool).with_s3(s3_client).with_shutdown_rx(shutdown_rx.clone());

    // Redis is only dialled when presence is shared between instances.
    if config.realtime.backend == RealtimeBackend::Shared {
        builder = builder.with_pubsub(adapters::redis::RedisClient::new(&config.pubsub, shutdown_rx.clone()).await?);
    }
    let app = builder.build().await?;

    let api = mentorlink_server::api::app_router(config.clone(), app.services, shutdown_rx);
    let mgmt = mentorlink_server::api::mgmt_router(MgmtState { health_service: app.health_service });

    let api_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let mgmt_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.mgmt_port).parse()?;
    let api_listener = TcpListener::bind(api_addr).await?;
    let mgmt_listener = TcpListener::bind(mgmt_addr).await?;
    tracing::info!(api = %api_addr, mgmt = %mgmt_addr, backend = ?config.realtime.backend, "MentorLink listening");

    Ok(Server { api_listener, mgmt_listener, api, mgmt, shutdown_tx, background_tasks: app.background_tasks })
}

async fn serve(listener: TcpListener, router: Router, mut shutdown_rx: watch::Receiver<bool>) -> std::io::Result<()> {
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&stop| stop).await;
        })
        .await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    let telemetry_guard = telemetry::init_telemetry(&config.telemetry)?;
    mentorlink_server::setup_panic_hook();

    let server = boot(&config).instrument(tracing::info_span!("boot_server")).await?;
    let shutdown_rx = server.shutdown_tx.subscribe();

    if let Err(e) = tokio::try_join!(
        serve(server.api_listener, server.api, shutdown_rx.clone()),
        serve(server.mgmt_listener, server.mgmt, shutdown_rx),
    ) {
        tracing::error!(error = %e, "Server error");
    }

    // Either listener stopping takes the whole process down.
    let _ = server.shutdown_tx.send(true);
    let drain = futures::future::join_all(server.background_tasks);
    if tokio::time::timeout(Duration::from_secs(config.server.shutdown_timeout_secs), drain).await.is_err() {
        tracing::warn!("Timed out waiting for background tasks");
    } else {
        tracing::info!("Background tasks finished");
    }

    telemetry_guard.shutdown();
    Ok(())
}
