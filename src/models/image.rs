use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Image formats the pipeline can decode and encode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
}

impl ImageFormat {
    /// File extension used for scratch files and object keys.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
        }
    }

    /// Deterministic object key / scratch file name for an image.
    pub fn file_name(self, id: Uuid) -> String {
        format!("{}.{}", id, self.extension())
    }
}

impl From<ImageFormat> for image::ImageFormat {
    fn from(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Gif => image::ImageFormat::Gif,
        }
    }
}

/// Processing status of a submitted image. Only ever moves forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ImageStatus {
    InProgress,
    Finished,
}

impl ImageStatus {
    /// Status only moves forward; re-marking `finished` is allowed so a
    /// redelivered job can complete again.
    pub fn can_transition_to(self, next: ImageStatus) -> bool {
        !matches!((self, next), (ImageStatus::Finished, ImageStatus::InProgress))
    }
}

/// Durable status record for one submitted image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageMetadata {
    pub id: Uuid,
    pub format: ImageFormat,
    pub status: ImageStatus,
    pub created_at: DateTime<Utc>,
}

impl ImageMetadata {
    pub fn new(id: Uuid, format: ImageFormat) -> Self {
        Self {
            id,
            format,
            status: ImageStatus::InProgress,
            created_at: Utc::now(),
        }
    }

    pub fn file_name(&self) -> String {
        self.format.file_name(self.id)
    }

    pub fn is_finished(&self) -> bool {
        self.status == ImageStatus::Finished
    }
}
