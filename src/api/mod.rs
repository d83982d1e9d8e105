use crate::config::Config;
use crate::services::attachment_service::AttachmentService;
use crate::services::gateway::GatewayService;
use crate::services::health_service::HealthService;
use crate::services::messaging_service::MessagingService;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, Request, Response, StatusCode};
use axum::{
    Router,
    routing::{get, post, put},
};
use std::time::Duration;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

pub mod attachments;
pub mod gateway;
pub mod health;
pub mod messages;
pub mod middleware;
pub mod schemas;

#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Config,
    pub messaging_service: MessagingService,
    pub attachment_service: AttachmentService,
    pub gateway_service: GatewayService,
    pub shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Clone, Debug)]
pub struct MgmtState {
    pub health_service: HealthService,
}

#[derive(Debug)]
pub struct ServiceContainer {
    pub messaging_service: MessagingService,
    pub attachment_service: AttachmentService,
    pub gateway_service: GatewayService,
}

/// Configures and returns the primary application router.
pub fn app_router(config: Config, services: ServiceContainer, shutdown_rx: tokio::sync::watch::Receiver<bool>) -> Router {
    let request_timeout = Duration::from_secs(config.server.request_timeout_secs);
    let upload_limit = config.storage.max_size_bytes;

    let state = AppState {
        config,
        messaging_service: services.messaging_service,
        attachment_service: services.attachment_service,
        gateway_service: services.gateway_service,
        shutdown_rx,
    };

    let message_routes = Router::new()
        .route("/", post(messages::send_message))
        .route("/conversations", get(messages::list_conversations))
        .route("/unread-count", get(messages::unread_count))
        .route("/search", get(messages::search))
        .route("/online-users", get(messages::online_users))
        .route("/can-message/{userId}", get(messages::can_message))
        .route("/mark-read/{userId}", put(messages::mark_read))
        .route("/upload", post(attachments::upload_attachment).layer(DefaultBodyLimit::max(upload_limit)))
        // `{id}` is the other user for GET and the message for DELETE.
        .route("/{id}", get(messages::list_messages).delete(messages::delete_message))
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout));

    let api_routes = Router::new().nest("/messages", message_routes).route("/gateway", get(gateway::websocket_handler));

    let trace = TraceLayer::new_for_http()
        .make_span_with(request_span)
        .on_response(|response: &Response<_>, latency: Duration, span: &Span| {
            span.record("http.response.status_code", response.status().as_u16());
            tracing::info!(latency_ms = %latency.as_millis(), status = response.status().as_u16(), "request completed");
        })
        .on_failure(|error: ServerErrorsFailureClass, _latency: Duration, _span: &Span| {
            tracing::error!(error = %error, "request failed");
        });

    Router::new()
        .nest("/api", api_routes)
        .layer(PropagateRequestIdLayer::new(request_id_header()))
        .layer(trace)
        .layer(SetRequestIdLayer::new(request_id_header(), middleware::MakeRequestUuidV7))
        .with_state(state)
}

fn request_id_header() -> HeaderName {
    HeaderName::from_static("x-request-id")
}

// `user_id` is filled in by the `AuthUser` extractor.
fn request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .unwrap_or_default();

    tracing::info_span!(
        "request",
        request_id = %request_id,
        "http.request.method" = %request.method(),
        "url.path" = %request.uri().path(),
        "http.response.status_code" = tracing::field::Empty,
        "otel.kind" = "server",
        user_id = tracing::field::Empty,
    )
}

pub fn mgmt_router(state: MgmtState) -> Router {
    Router::new().route("/livez", get(health::livez)).route("/readyz", get(health::readyz)).with_state(state)
}
