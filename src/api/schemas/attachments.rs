use crate::domain::message::Attachment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadParams {
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentResponse {
    pub success: bool,
    pub url: String,
    pub public_id: Option<String>,
    pub file_name: Option<String>,
    pub format: Option<String>,
    pub size: Option<u64>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl From<Attachment> for AttachmentResponse {
    fn from(attachment: Attachment) -> Self {
        Self {
            success: true,
            url: attachment.url,
            public_id: attachment.public_id,
            file_name: attachment.file_name,
            format: attachment.format,
            size: attachment.size,
            kind: attachment.kind,
        }
    }
}
