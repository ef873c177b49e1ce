use std::path::Path;

use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

/// The two durable buckets: uploaded originals and processed artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StorageBucket {
    Originals,
    Processed,
}

/// Durable object storage keyed by bucket and object key.
///
/// Implementations must be safe to call concurrently from every worker and
/// request handler.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `local_path` under `key`.
    async fn put(&self, bucket: StorageBucket, key: &str, local_path: &Path)
        -> Result<(), StorageError>;

    /// Download `key` into `local_path`, replacing any existing file.
    async fn get(&self, bucket: StorageBucket, key: &str, local_path: &Path)
        -> Result<(), StorageError>;

    /// Delete every key, attempting all of them even if some fail.
    /// Missing keys are not an error.
    async fn delete_many(&self, bucket: StorageBucket, keys: &[String]) -> Result<(), StorageError>;

    /// Verify both buckets are reachable. Called once at startup.
    async fn ensure_buckets(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// S3-compatible object storage (MinIO, R2, AWS).
pub struct S3ObjectStore {
    originals: Box<Bucket>,
    processed: Box<Bucket>,
}

impl S3ObjectStore {
    pub fn new(
        originals_bucket: &str,
        processed_bucket: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let originals = Bucket::new(originals_bucket, region.clone(), credentials.clone())
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();
        let processed = Bucket::new(processed_bucket, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            originals,
            processed,
        })
    }

    fn bucket(&self, bucket: StorageBucket) -> &Bucket {
        match bucket {
            StorageBucket::Originals => &self.originals,
            StorageBucket::Processed => &self.processed,
        }
    }
}

fn check_status(code: u16, key: &str) -> Result<(), StorageError> {
    if (200..300).contains(&code) {
        Ok(())
    } else {
        Err(StorageError::Status {
            key: key.to_string(),
            code,
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        bucket: StorageBucket,
        key: &str,
        local_path: &Path,
    ) -> Result<(), StorageError> {
        let data = tokio::fs::read(local_path).await?;
        let response = self
            .bucket(bucket)
            .put_object(key, &data)
            .await
            .map_err(StorageError::S3)?;
        check_status(response.status_code(), key)
    }

    async fn get(
        &self,
        bucket: StorageBucket,
        key: &str,
        local_path: &Path,
    ) -> Result<(), StorageError> {
        let response = self
            .bucket(bucket)
            .get_object(key)
            .await
            .map_err(StorageError::S3)?;
        check_status(response.status_code(), key)?;
        tokio::fs::write(local_path, response.bytes()).await?;
        Ok(())
    }

    async fn delete_many(&self, bucket: StorageBucket, keys: &[String]) -> Result<(), StorageError> {
        let mut failed = Vec::new();

        for key in keys {
            let outcome = match self.bucket(bucket).delete_object(key).await {
                // S3 answers 204 for deleted and missing keys alike; some
                // compatible stores answer 404 for missing ones.
                Ok(response) if response.status_code() == 404 => Ok(()),
                Ok(response) => check_status(response.status_code(), key),
                Err(e) => Err(StorageError::S3(e)),
            };

            if let Err(e) = outcome {
                tracing::warn!(%bucket, key = %key, error = %e, "Failed to delete object");
                failed.push(key.clone());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(StorageError::DeleteFailed { bucket, keys: failed })
        }
    }

    async fn ensure_buckets(&self) -> Result<(), StorageError> {
        for bucket in [StorageBucket::Originals, StorageBucket::Processed] {
            let exists = self
                .bucket(bucket)
                .exists()
                .await
                .map_err(StorageError::S3)?;
            if !exists {
                return Err(StorageError::Config(format!(
                    "bucket {} does not exist",
                    self.bucket(bucket).name()
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("S3 returned status {code} for {key}")]
    Status { key: String, code: u16 },

    #[error("failed to delete {keys:?} from {bucket}")]
    DeleteFailed { bucket: StorageBucket, keys: Vec<String> },

    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_statuses() {
        assert!(check_status(200, "a").is_ok());
        assert!(check_status(204, "a").is_ok());
    }

    #[test]
    fn test_error_status_names_key() {
        let err = check_status(403, "abc.png").unwrap_err();
        assert_eq!(err.to_string(), "S3 returned status 403 for abc.png");
    }
}
