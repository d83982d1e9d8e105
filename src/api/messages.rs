use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::api::schemas::messaging::{
    ActionResponse, CanMessageResponse, ConversationListResponse, ListMessagesParams, MessageListResponse,
    OnlineUsersResponse, SearchParams, SearchResponse, SendMessageRequest, SendMessageResponse, UnreadCountResponse,
};
use crate::domain::message::MessageType;
use crate::error::{AppError, Result};
use crate::services::messaging_service::OutgoingMessage;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::bad_request("INVALID_RECIPIENT", "Invalid user id"))
}

/// Sends a message to a connected mentor or student.
///
/// # Errors
/// Returns `AppError::BadRequest` for invalid input, `AppError::NotFound` for an unknown recipient
/// and `AppError::Forbidden` without an accepted mentorship connection.
pub async fn send_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<impl IntoResponse> {
    let recipient = payload
        .recipient_id
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("RECIPIENT_REQUIRED", "Recipient ID is required"))?;
    let recipient_id = parse_id(recipient)?;

    let message_type = match payload.message_type.as_deref() {
        Some(raw) => raw.parse::<MessageType>()?,
        None => MessageType::default(),
    };

    let outgoing = OutgoingMessage {
        recipient_id,
        content: payload.content,
        message_type,
        attachments: payload.attachments,
    };

    let sent = state.messaging_service.send(auth_user.user_id, outgoing).await?;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse { success: true, message: sent.message, conversation_id: sent.conversation_key.to_string() }),
    ))
}

/// # Errors
/// Returns `AppError::Database` if the store fails.
pub async fn list_conversations(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ConversationListResponse>> {
    let entries = state.messaging_service.list_conversations(auth_user.user_id).await?;
    let conversations: Vec<_> = entries.into_iter().map(Into::into).collect();

    Ok(Json(ConversationListResponse { count: conversations.len(), conversations }))
}

/// # Errors
/// Returns `AppError::BadRequest` for a malformed id or cursor and `AppError::Forbidden` when the users are not connected.
pub async fn list_messages(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(other): Path<String>,
    Query(params): Query<ListMessagesParams>,
) -> Result<Json<MessageListResponse>> {
    let other_id = parse_id(&other)?;
    let before = params
        .before
        .as_deref()
        .map(|raw| {
            OffsetDateTime::parse(raw, &Rfc3339)
                .map_err(|_| AppError::bad_request("INVALID_CURSOR", "`before` must be an RFC 3339 timestamp"))
        })
        .transpose()?;

    let page = state.messaging_service.list_messages(auth_user.user_id, other_id, params.limit, before).await?;

    Ok(Json(MessageListResponse { count: page.messages.len(), messages: page.messages, has_more: page.has_more }))
}

/// # Errors
/// Returns `AppError::BadRequest` for a malformed id.
pub async fn mark_read(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(other): Path<String>,
) -> Result<Json<ActionResponse>> {
    let other_id = parse_id(&other)?;
    let updated = state.messaging_service.mark_read(auth_user.user_id, other_id).await?;
    tracing::debug!(updated, "Messages marked as read");

    Ok(Json(ActionResponse::ok("Messages marked as read")))
}

/// # Errors
/// Returns `AppError::NotFound` for unknown messages and `AppError::Forbidden` for non-participants.
pub async fn delete_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<Json<ActionResponse>> {
    let message_id = Uuid::parse_str(message_id.trim()).map_err(|_| AppError::NotFound("Message"))?;
    state.messaging_service.delete_message(auth_user.user_id, message_id).await?;

    Ok(Json(ActionResponse::ok("Message deleted")))
}

/// # Errors
/// Returns `AppError::Database` if the store fails.
pub async fn unread_count(auth_user: AuthUser, State(state): State<AppState>) -> Result<Json<UnreadCountResponse>> {
    let unread_count = state.messaging_service.unread_count(auth_user.user_id).await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

/// # Errors
/// Returns `AppError::BadRequest` when the query is missing or too long.
pub async fn search(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>> {
    let messages = state.messaging_service.search(auth_user.user_id, params.q.as_deref().unwrap_or_default()).await?;
    Ok(Json(SearchResponse { count: messages.len(), messages }))
}

/// # Errors
/// Returns `AppError::BadRequest` for a malformed id.
pub async fn can_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(other): Path<String>,
) -> Result<Json<CanMessageResponse>> {
    let other_id = parse_id(&other)?;
    let can_message = state.messaging_service.can_message(auth_user.user_id, other_id).await;
    Ok(Json(CanMessageResponse { can_message }))
}

pub async fn online_users(_auth_user: AuthUser, State(state): State<AppState>) -> Json<OnlineUsersResponse> {
    let user_ids = state.messaging_service.online_users().await;
    Json(OnlineUsersResponse { count: user_ids.len(), user_ids })
}
