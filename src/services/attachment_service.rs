use crate::adapters::storage::ObjectStorage;
use crate::config::StorageConfig;
use crate::domain::message::{Attachment, MessageType};
use crate::error::{AppError, Result};
use bytes::Bytes;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::sync::Arc;
use uuid::Uuid;

const DOCUMENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/zip",
    "text/plain",
    "text/csv",
];

#[derive(Clone, Debug)]
pub(crate) struct Metrics {
    pub(crate) uploaded_bytes: Counter<u64>,
    pub(crate) upload_size_bytes: Histogram<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("mentorlink-server");
        Self {
            uploaded_bytes: meter
                .u64_counter("attachments_uploaded_bytes")
                .with_description("Total bytes of attachments uploaded")
                .build(),
            upload_size_bytes: meter
                .u64_histogram("attachments_upload_size_bytes")
                .with_description("Distribution of attachment upload sizes")
                .build(),
        }
    }
}

/// Message type an uploaded file can be attached as.
fn kind_for(content_type: &str) -> Option<MessageType> {
    let (top, _) = content_type.split_once('/')?;
    match top {
        "image" => Some(MessageType::Image),
        "video" => Some(MessageType::Video),
        "audio" => Some(MessageType::Audio),
        _ if DOCUMENT_TYPES.contains(&content_type) => Some(MessageType::File),
        _ => None,
    }
}

/// Format taken from the file name when it has an extension, else from the mime subtype.
fn format_for(content_type: &str, file_name: Option<&str>) -> String {
    let from_name = file_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));

    from_name
        .or_else(|| content_type.split_once('/').map(|(_, sub)| sub.split(['+', ';']).next().unwrap_or(sub)))
        .unwrap_or("bin")
        .to_ascii_lowercase()
}

#[derive(Clone, Debug)]
pub struct AttachmentService {
    storage: Arc<dyn ObjectStorage>,
    config: StorageConfig,
    metrics: Metrics,
}

impl AttachmentService {
    #[must_use]
    pub fn new(storage: Arc<dyn ObjectStorage>, config: StorageConfig) -> Self {
        Self { storage, config, metrics: Metrics::new() }
    }

    /// Stores an uploaded file and returns the descriptor a message can carry.
    ///
    /// # Errors
    /// Returns `AppError::BadRequest` for empty or unsupported files,
    /// `AppError::PayloadTooLarge` above the size limit and `AppError::Storage` if the upload fails.
    #[tracing::instrument(
        err(level = "warn"),
        skip(self, body),
        fields(attachment_size = body.len(), public_id = tracing::field::Empty)
    )]
    pub async fn upload(&self, content_type: &str, file_name: Option<&str>, body: Bytes) -> Result<Attachment> {
        if body.is_empty() {
            return Err(AppError::bad_request("FILE_REQUIRED", "No file uploaded"));
        }
        if body.len() > self.config.max_size_bytes {
            return Err(AppError::PayloadTooLarge);
        }

        let content_type = content_type.trim().to_ascii_lowercase();
        let essence = content_type.split(';').next().unwrap_or_default().trim().to_string();
        let kind = kind_for(&essence).ok_or_else(|| {
            AppError::bad_request("UNSUPPORTED_FILE_TYPE", format!("File type {essence} is not allowed"))
        })?;

        let format = format_for(&essence, file_name);
        let public_id = format!("attachments/{}.{format}", Uuid::new_v4());
        tracing::Span::current().record("public_id", public_id.as_str());

        let size = body.len() as u64;
        self.storage.put(&public_id, body, &essence).await?;

        self.metrics.uploaded_bytes.add(size, &[KeyValue::new("type", kind.as_str())]);
        self.metrics.upload_size_bytes.record(size, &[]);
        tracing::debug!("Attachment uploaded");

        Ok(Attachment {
            url: format!("{}/{public_id}", self.config.public_base_url.trim_end_matches('/')),
            public_id: Some(public_id),
            file_name: file_name.map(str::to_string),
            format: Some(format),
            size: Some(size),
            kind: Some(kind.as_str().to_string()),
        })
    }
}
