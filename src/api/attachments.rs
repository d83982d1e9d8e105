use crate::api::AppState;
use crate::api::middleware::AuthUser;
use crate::api::schemas::attachments::{AttachmentResponse, UploadParams};
use crate::error::Result;
use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};

/// Uploads a raw request body as a message attachment.
///
/// # Errors
/// Returns `AppError::BadRequest` for empty or unsupported files and `AppError::Storage` if the upload fails.
pub async fn upload_attachment(
    _auth_user: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");

    let attachment = state.attachment_service.upload(content_type, params.file_name.as_deref(), body).await?;

    Ok((StatusCode::CREATED, Json(AttachmentResponse::from(attachment))))
}
