//! Submission validation.
//!
//! Pure checks on the declared content type, the task name and the task
//! parameters. Submission runs these before touching any storage tier or the
//! queue, so rejected input leaves no trace.

use std::str::FromStr;

use crate::models::image::ImageFormat;
use crate::models::job::{Task, TaskParams, TaskSpec};

/// Resolve a declared content type (`type/subtype`) to a supported format.
///
/// `jpg` is accepted as an alias of `jpeg`.
pub fn parse_format(content_type: &str) -> Result<ImageFormat, ValidationError> {
    let mut parts = content_type.split('/');
    let subtype = match (parts.next(), parts.next()) {
        (Some(_), Some(subtype)) => subtype,
        _ => return Err(ValidationError::InvalidFormat(content_type.to_string())),
    };

    let normalized = if subtype == "jpg" { "jpeg" } else { subtype };

    ImageFormat::from_str(normalized)
        .map_err(|_| ValidationError::InvalidFormat(content_type.to_string()))
}

/// Check a task name against the supported set.
pub fn parse_task(name: &str) -> Result<Task, ValidationError> {
    Task::from_str(name).map_err(|_| ValidationError::InvalidTask(name.to_string()))
}

/// Combine a task with its parameters, rejecting missing or degenerate values.
pub fn resolve_task(task: Task, params: &TaskParams) -> Result<TaskSpec, ValidationError> {
    match task {
        Task::Resize => match (params.width, params.height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => {
                Ok(TaskSpec::Resize { width, height })
            }
            _ => Err(ValidationError::InvalidParameters(
                "resize requires a non-zero width and height".to_string(),
            )),
        },
        Task::Watermark => match params.watermark_text.as_deref() {
            Some(text) if !text.trim().is_empty() => Ok(TaskSpec::Watermark {
                text: text.to_string(),
            }),
            _ => Err(ValidationError::InvalidParameters(
                "watermark requires non-empty text".to_string(),
            )),
        },
        Task::ThumbnailGenerate => Ok(TaskSpec::Thumbnail),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid image format {0:?}, must be one of jpeg, jpg, png, gif")]
    InvalidFormat(String),

    #[error("invalid task {0:?}, must be one of resize, watermark, thumbnail-generate")]
    InvalidTask(String),

    #[error("invalid task parameters: {0}")]
    InvalidParameters(String),
}
