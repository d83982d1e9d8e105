use crate::domain::presence::{ConnectionId, ConnectionState};
use crate::domain::realtime::{ClientEvent, ServerEvent};
use crate::services::gateway::{GatewayService, INVALID_EVENT};
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

pub(crate) struct Session {
    pub(crate) connection_id: ConnectionId,
    pub(crate) user_id: Uuid,
    pub(crate) request_id: String,
    pub(crate) socket: WebSocket,
    pub(crate) outbound_rx: mpsc::Receiver<ServerEvent>,
    pub(crate) gateway: GatewayService,
    pub(crate) refresh_interval: Duration,
    pub(crate) shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

async fn send_event(sink: &mut SplitSink<WebSocket, WsMessage>, event: &ServerEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => sink.send(WsMessage::Text(text.into())).await.is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode server event");
            true
        }
    }
}

impl Session {
    #[tracing::instrument(
        name = "websocket_session",
        skip(self),
        fields(
            user_id = %self.user_id,
            request_id = %self.request_id,
            connection_id = %self.connection_id,
            otel.kind = "server",
        )
    )]
    pub(crate) async fn run(self) {
        let Self { connection_id, user_id, socket, mut outbound_rx, gateway, refresh_interval, mut shutdown_rx, .. } =
            self;

        gateway.metrics.active_sessions.add(1, &[]);
        tracing::info!("WebSocket connected");

        let mut state = ConnectionState::default();
        let (mut ws_sink, mut ws_stream) = socket.split();

        let mut refresh = tokio::time::interval(refresh_interval.max(Duration::from_secs(1)));
        refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        refresh.tick().await;

        loop {
            if *shutdown_rx.borrow() {
                tracing::info!("Shutdown signal received, closing WebSocket");
                let _ = ws_sink
                    .send(WsMessage::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "Server shutting down".into(),
                    })))
                    .await;
                break;
            }

            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {}

                msg = ws_stream.next() => {
                    let reply = match msg {
                        Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                            Ok(event) => gateway.handle_client_event(connection_id, &mut state, user_id, event).await,
                            Err(e) => {
                                tracing::debug!(error = %e, "Rejected malformed client event");
                                Some(ServerEvent::error(INVALID_EVENT, "Malformed event"))
                            }
                        },
                        Some(Ok(WsMessage::Binary(_))) => Some(ServerEvent::error(INVALID_EVENT, "Binary frames are not supported")),
                        Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => None,
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "WebSocket error");
                            break;
                        }
                    };

                    if let Some(reply) = reply
                        && !send_event(&mut ws_sink, &reply).await
                    {
                        break;
                    }
                }

                event = outbound_rx.recv() => {
                    match event {
                        Some(event) => {
                            if !send_event(&mut ws_sink, &event).await { break; }
                        }
                        None => break,
                    }
                }

                _ = refresh.tick() => {
                    if let Some(user) = state.user() {
                        gateway.refresh_presence(user, connection_id).await;
                    }
                }
            }
        }

        let _ = ws_sink.close().await;
        gateway.on_disconnect(connection_id, &mut state).await;

        gateway.metrics.active_sessions.add(-1, &[]);
        tracing::info!("WebSocket disconnected");
    }
}
