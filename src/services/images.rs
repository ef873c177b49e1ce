//! Image job orchestration across the scratch directories, object storage,
//! the metadata store and the queue.

use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use crate::db::{MetadataError, MetadataStore};
use crate::models::image::{ImageFormat, ImageMetadata, ImageStatus};
use crate::models::job::{JobRecord, TaskParams};
use crate::services::queue::{JobQueue, QueueError};
use crate::services::scratch::{remove_scratch_file, ScratchDirs};
use crate::services::storage::{ObjectStore, StorageBucket, StorageError};
use crate::services::transform::{TransformError, Transformer};
use crate::services::validation::{self, ValidationError};

/// A processed artifact fetched into the scratch directory. The caller
/// streams it and then removes the file.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub format: ImageFormat,
}

pub struct ImageService {
    metadata: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    queue: Arc<dyn JobQueue>,
    scratch: ScratchDirs,
    transformer: Transformer,
}

impl ImageService {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        queue: Arc<dyn JobQueue>,
        scratch: ScratchDirs,
        transformer: Transformer,
    ) -> Self {
        Self {
            metadata,
            objects,
            queue,
            scratch,
            transformer,
        }
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn scratch(&self) -> &ScratchDirs {
        &self.scratch
    }

    /// Validate an upload, store the original durably, record its metadata and
    /// publish the job. Returns the new image id.
    ///
    /// Validation runs before any side effect. Later failures undo what was
    /// already written, so a failed submission leaves no metadata row and no
    /// original blob behind.
    pub async fn submit(
        &self,
        data: &[u8],
        content_type: &str,
        task: &str,
        params: &TaskParams,
    ) -> Result<Uuid, ImageServiceError> {
        let format = validation::parse_format(content_type)?;
        let task = validation::parse_task(task)?;
        let spec = validation::resolve_task(task, params)?;

        let id = Uuid::new_v4();
        let file_name = format.file_name(id);

        let local = self.scratch.write_original(&file_name, data).await?;
        let uploaded = self
            .objects
            .put(StorageBucket::Originals, &file_name, &local)
            .await;
        // The durable copy is now the source of truth either way.
        if let Err(e) = remove_scratch_file(&local).await {
            tracing::warn!(image_id = %id, error = %e, "Failed to remove scratch original");
        }
        uploaded?;

        let image = ImageMetadata::new(id, format);
        if let Err(e) = self.metadata.create(&image).await {
            self.discard_blob(StorageBucket::Originals, &file_name).await;
            return Err(e.into());
        }

        let record = JobRecord::new(id, file_name.clone(), content_type, &spec);
        if let Err(e) = self.queue.publish(&record).await {
            tracing::error!(image_id = %id, error = %e, "Publishing job failed, rolling back submission");
            if let Err(e) = self.metadata.delete(id).await {
                tracing::error!(image_id = %id, error = %e, "Failed to roll back metadata row");
            }
            self.discard_blob(StorageBucket::Originals, &file_name).await;
            return Err(e.into());
        }

        metrics::counter!("images_submitted_total").increment(1);
        tracing::info!(image_id = %id, %format, task = %task, "Image submitted for processing");

        Ok(id)
    }

    pub async fn get_status(&self, id: Uuid) -> Result<ImageMetadata, ImageServiceError> {
        Ok(self.metadata.get(id).await?)
    }

    /// Fetch the processed artifact into a scratch file of its own in the
    /// processed directory. The caller removes it once the bytes are sent.
    ///
    /// Fails with `NotReady` while the image is still in progress.
    pub async fn get_artifact(&self, id: Uuid) -> Result<Artifact, ImageServiceError> {
        let image = self.metadata.get(id).await?;
        if !image.is_finished() {
            return Err(ImageServiceError::NotReady(id));
        }

        let file_name = image.file_name();
        let path = self.scratch.retrieval_path(&file_name)?;
        if let Err(e) = self
            .objects
            .get(StorageBucket::Processed, &file_name, &path)
            .await
        {
            if let Err(e) = remove_scratch_file(&path).await {
                tracing::warn!(image_id = %id, error = %e, "Failed to remove scratch download");
            }
            return Err(e.into());
        }

        Ok(Artifact {
            path,
            format: image.format,
        })
    }

    /// Remove the metadata row and both blobs of an image.
    ///
    /// The row goes first. A worker still holding the job then finds no row
    /// on its final status update and discards whatever it uploaded, so no
    /// processed blob can outlive the row.
    pub async fn delete(&self, id: Uuid) -> Result<(), ImageServiceError> {
        let image = self.metadata.get(id).await?;
        let keys = [image.file_name()];

        self.metadata.delete(id).await?;

        let originals = self
            .objects
            .delete_many(StorageBucket::Originals, &keys)
            .await;
        let processed = self
            .objects
            .delete_many(StorageBucket::Processed, &keys)
            .await;
        if let Err(e) = originals.as_ref().and(processed.as_ref()) {
            tracing::error!(image_id = %id, error = %e, "Metadata removed but blobs remain");
        }
        originals?;
        processed?;

        tracing::info!(image_id = %id, "Image deleted");
        Ok(())
    }

    /// Run one dequeued job to completion: fetch the original, transform it,
    /// upload the result and mark the image finished. Scratch files for the
    /// job are removed whatever the outcome.
    pub async fn process_job(&self, record: &JobRecord) -> Result<(), ImageServiceError> {
        let original = self.scratch.original_path(&record.file_name);
        let processed = self.scratch.processed_path(&record.file_name);

        let result = self.process_job_inner(record, &original, &processed).await;

        for path in [&processed, &original] {
            if let Err(e) = remove_scratch_file(path).await {
                tracing::warn!(image_id = %record.id, path = %path.display(), error = %e, "Failed to remove scratch file");
            }
        }

        result
    }

    async fn process_job_inner(
        &self,
        record: &JobRecord,
        original: &std::path::Path,
        processed: &std::path::Path,
    ) -> Result<(), ImageServiceError> {
        self.scratch
            .create_processed_placeholder(&record.file_name)
            .await?;

        let format = validation::parse_format(&record.content_type)
            .map_err(|_| TransformError::UnsupportedFormat(record.content_type.clone()))?;
        let spec = validation::resolve_task(record.task, &record.params())?;

        tracing::debug!(image_id = %record.id, "Downloading original");
        self.objects
            .get(StorageBucket::Originals, &record.file_name, original)
            .await?;

        tracing::debug!(image_id = %record.id, task = %record.task, "Transforming image");
        let transformer = self.transformer.clone();
        let (src, dst) = (original.to_path_buf(), processed.to_path_buf());
        tokio::task::spawn_blocking(move || transformer.apply(&spec, format, &src, &dst))
            .await
            .map_err(|e| ImageServiceError::Worker(e.to_string()))??;

        self.objects
            .put(StorageBucket::Processed, &record.file_name, processed)
            .await?;

        match self
            .metadata
            .update_status(record.id, ImageStatus::Finished)
            .await
        {
            Ok(()) => Ok(()),
            Err(MetadataError::NotFound(id)) => {
                // Deleted while we were processing; do not leave an orphan.
                tracing::warn!(image_id = %id, "Image deleted during processing, discarding result");
                self.discard_blob(StorageBucket::Processed, &record.file_name)
                    .await;
                Err(ImageServiceError::NotFound(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn discard_blob(&self, bucket: StorageBucket, key: &str) {
        if let Err(e) = self.objects.delete_many(bucket, &[key.to_string()]).await {
            tracing::error!(%bucket, key, error = %e, "Failed to remove orphaned blob");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("there is no image with id {0}")]
    NotFound(Uuid),

    #[error("image {0} is not ready yet")]
    NotReady(Uuid),

    #[error("metadata store error: {0}")]
    Metadata(#[source] MetadataError),

    #[error("object storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("scratch file error: {0}")]
    Scratch(#[from] std::io::Error),

    #[error("worker task failed: {0}")]
    Worker(String),
}

impl From<MetadataError> for ImageServiceError {
    fn from(e: MetadataError) -> Self {
        match e {
            MetadataError::NotFound(id) => ImageServiceError::NotFound(id),
            other => ImageServiceError::Metadata(other),
        }
    }
}

impl ImageServiceError {
    /// Whether the caller sent something unacceptable, as opposed to an
    /// infrastructure failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, ImageServiceError::Validation(_))
    }
}
