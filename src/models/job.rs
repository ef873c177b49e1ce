use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Edge length of the square box produced by the thumbnail task.
pub const THUMBNAIL_SIZE: u32 = 200;

/// Processing directives accepted at submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Task {
    Resize,
    Watermark,
    ThumbnailGenerate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResizeParams {
    pub width: u32,
    pub height: u32,
}

/// Raw, unvalidated task parameters as supplied by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskParams {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub watermark_text: Option<String>,
}

/// A task together with the parameters it needs, after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSpec {
    Resize { width: u32, height: u32 },
    Watermark { text: String },
    Thumbnail,
}

impl TaskSpec {
    pub fn task(&self) -> Task {
        match self {
            TaskSpec::Resize { .. } => Task::Resize,
            TaskSpec::Watermark { .. } => Task::Watermark,
            TaskSpec::Thumbnail => Task::ThumbnailGenerate,
        }
    }
}

/// Job payload published to the queue. Immutable once published.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: Uuid,
    pub file_name: String,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark_text: Option<String>,
    pub task: Task,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize: Option<ResizeParams>,
}

impl JobRecord {
    pub fn new(id: Uuid, file_name: String, content_type: &str, spec: &TaskSpec) -> Self {
        let (watermark_text, resize) = match spec {
            TaskSpec::Resize { width, height } => (
                None,
                Some(ResizeParams {
                    width: *width,
                    height: *height,
                }),
            ),
            TaskSpec::Watermark { text } => (Some(text.clone()), None),
            TaskSpec::Thumbnail => (
                None,
                Some(ResizeParams {
                    width: THUMBNAIL_SIZE,
                    height: THUMBNAIL_SIZE,
                }),
            ),
        };

        Self {
            id,
            file_name,
            content_type: content_type.to_string(),
            watermark_text,
            task: spec.task(),
            resize,
        }
    }

    /// Parameters carried by the record, in the shape submission accepted them.
    pub fn params(&self) -> TaskParams {
        TaskParams {
            width: self.resize.map(|r| r.width),
            height: self.resize.map(|r| r.height),
            watermark_text: self.watermark_text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_task_names() {
        assert_eq!(Task::from_str("resize").unwrap(), Task::Resize);
        assert_eq!(Task::from_str("watermark").unwrap(), Task::Watermark);
        assert_eq!(
            Task::from_str("thumbnail-generate").unwrap(),
            Task::ThumbnailGenerate
        );
        assert!(Task::from_str("blur").is_err());
        assert_eq!(Task::ThumbnailGenerate.to_string(), "thumbnail-generate");
    }

    #[test]
    fn test_watermark_record_omits_resize_params() {
        let spec = TaskSpec::Watermark {
            text: "hello".to_string(),
        };
        let record = JobRecord::new(Uuid::new_v4(), "a.png".to_string(), "image/png", &spec);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["task"], "watermark");
        assert_eq!(json["watermark_text"], "hello");
        assert!(json.get("resize").is_none());
    }

    #[test]
    fn test_thumbnail_record_carries_fixed_box() {
        let record = JobRecord::new(
            Uuid::new_v4(),
            "a.gif".to_string(),
            "image/gif",
            &TaskSpec::Thumbnail,
        );

        assert_eq!(
            record.resize,
            Some(ResizeParams {
                width: THUMBNAIL_SIZE,
                height: THUMBNAIL_SIZE
            })
        );
        assert!(record.watermark_text.is_none());
    }

    #[test]
    fn test_record_deserializes_without_optional_fields() {
        let id = Uuid::new_v4();
        let payload = format!(
            r#"{{"id":"{}","file_name":"x.jpeg","content_type":"image/jpeg","task":"thumbnail-generate"}}"#,
            id
        );
        let record: JobRecord = serde_json::from_str(&payload).unwrap();

        assert_eq!(record.id, id);
        assert_eq!(record.task, Task::ThumbnailGenerate);
        assert!(record.resize.is_none());
    }
}
