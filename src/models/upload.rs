use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::TaskParams;

/// Processing directive sent alongside an upload (the `metadata` multipart part).
#[derive(Debug, Deserialize, Validate)]
pub struct UploadMetadata {
    #[garde(length(min = 1, max = 64))]
    pub task: String,

    /// Overrides the content type declared on the `image` part.
    #[garde(length(min = 3, max = 100))]
    pub content_type: Option<String>,

    #[garde(range(min = 1, max = 10_000))]
    pub width: Option<u32>,

    #[garde(range(min = 1, max = 10_000))]
    pub height: Option<u32>,

    #[garde(length(min = 1, max = 200))]
    pub watermark_text: Option<String>,
}

impl UploadMetadata {
    pub fn params(&self) -> TaskParams {
        TaskParams {
            width: self.width,
            height: self.height,
            watermark_text: self.watermark_text.clone(),
        }
    }
}

/// Response after submitting an image for processing.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: uuid::Uuid,
}

/// Plain status message body.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_rejects_zero_width() {
        let meta: UploadMetadata =
            serde_json::from_str(r#"{"task":"resize","width":0,"height":10}"#).unwrap();
        assert!(meta.validate().is_err());
    }

    #[test]
    fn test_metadata_accepts_minimal_watermark_request() {
        let meta: UploadMetadata =
            serde_json::from_str(r#"{"task":"watermark","watermark_text":"(c) me"}"#).unwrap();
        assert!(meta.validate().is_ok());
        assert_eq!(meta.params().watermark_text.as_deref(), Some("(c) me"));
        assert!(meta.params().width.is_none());
    }
}
