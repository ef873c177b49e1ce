use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::retry::RetryPolicy;
use crate::services::worker::WorkerPoolConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for job queue
    pub redis_url: String,

    /// S3-compatible endpoint URL (e.g. a MinIO server)
    pub s3_endpoint: String,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    pub s3_access_key: String,

    pub s3_secret_key: String,

    /// Bucket holding uploaded originals
    #[serde(default = "default_originals_bucket")]
    pub originals_bucket: String,

    /// Bucket holding processed artifacts
    #[serde(default = "default_processed_bucket")]
    pub processed_bucket: String,

    /// Number of concurrent queue workers
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Parent directory for the process-lifetime scratch directories
    #[serde(default = "default_scratch_root")]
    pub scratch_root: PathBuf,

    /// TrueType/OpenType font used for watermarks
    #[serde(default = "default_font_path")]
    pub font_path: PathBuf,

    #[serde(default = "default_queue_retry_attempts")]
    pub queue_retry_attempts: u32,

    #[serde(default = "default_queue_retry_delay_ms")]
    pub queue_retry_delay_ms: u64,

    /// Upper bound on a single blocking dequeue
    #[serde(default = "default_queue_poll_timeout_secs")]
    pub queue_poll_timeout_secs: u64,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

fn default_originals_bucket() -> String {
    "images".to_string()
}

fn default_processed_bucket() -> String {
    "processed".to_string()
}

fn default_worker_count() -> usize {
    3
}

fn default_scratch_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_font_path() -> PathBuf {
    PathBuf::from("static/font.ttf")
}

fn default_queue_retry_attempts() -> u32 {
    3
}

fn default_queue_retry_delay_ms() -> u64 {
    1000
}

fn default_queue_poll_timeout_secs() -> u64 {
    1
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Retry strategy for queue publish and fetch: fixed attempts, fixed delay.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            self.queue_retry_attempts,
            Duration::from_millis(self.queue_retry_delay_ms),
        )
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_poll_timeout_secs.max(1))
    }

    pub fn worker_pool(&self) -> WorkerPoolConfig {
        WorkerPoolConfig {
            workers: self.worker_count,
            poll_timeout: self.poll_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required() -> Vec<(String, String)> {
        [
            ("DATABASE_URL", "postgres://localhost/images"),
            ("REDIS_URL", "redis://localhost"),
            ("S3_ENDPOINT", "http://localhost:9000"),
            ("S3_ACCESS_KEY", "minio"),
            ("S3_SECRET_KEY", "minio123"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_defaults_applied() {
        let config: AppConfig = envy::from_iter(required()).unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.originals_bucket, "images");
        assert_eq!(config.processed_bucket, "processed");
        assert_eq!(config.worker_count, 3);
        assert_eq!(config.font_path, PathBuf::from("static/font.ttf"));
        assert_eq!(
            config.retry_policy(),
            RetryPolicy::fixed(3, Duration::from_secs(1))
        );
        assert_eq!(config.poll_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_overrides() {
        let mut vars = required();
        vars.push(("WORKER_COUNT".to_string(), "8".to_string()));
        vars.push(("QUEUE_RETRY_ATTEMPTS".to_string(), "5".to_string()));
        vars.push(("QUEUE_POLL_TIMEOUT_SECS".to_string(), "0".to_string()));

        let config: AppConfig = envy::from_iter(vars).unwrap();

        assert_eq!(config.worker_pool().workers, 8);
        assert_eq!(config.retry_policy().attempts, 5);
        // A zero timeout would make Redis block forever.
        assert_eq!(config.poll_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_missing_required_variable() {
        let vars: Vec<(String, String)> = required()
            .into_iter()
            .filter(|(k, _)| k != "REDIS_URL")
            .collect();
        assert!(envy::from_iter::<_, AppConfig>(vars).is_err());
    }
}
