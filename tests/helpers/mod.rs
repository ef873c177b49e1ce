//! In-memory collaborators and fixtures for pipeline tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::time::sleep;
use uuid::Uuid;

use image_processor::db::{MetadataError, MetadataStore};
use image_processor::models::image::{ImageMetadata, ImageStatus};
use image_processor::models::job::JobRecord;
use image_processor::services::images::ImageService;
use image_processor::services::queue::{Delivery, JobQueue, QueueError};
use image_processor::services::retry::{retry, RetryPolicy};
use image_processor::services::scratch::ScratchDirs;
use image_processor::services::storage::{ObjectStore, StorageBucket, StorageError};
use image_processor::services::transform::Transformer;

pub struct MemoryMetadataStore {
    rows: Mutex<HashMap<Uuid, ImageMetadata>>,
    pub fail_create: AtomicBool,
    // `false` holds every delete before it touches the row.
    deletes_open: watch::Sender<bool>,
    pub deletes_waiting: AtomicU32,
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            fail_create: AtomicBool::new(false),
            deletes_open: watch::Sender::new(true),
            deletes_waiting: AtomicU32::new(0),
        }
    }
}

impl MemoryMetadataStore {
    pub fn pause_deletes(&self) {
        self.deletes_open.send_replace(false);
    }

    pub fn resume_deletes(&self) {
        self.deletes_open.send_replace(true);
    }

    pub fn row(&self, id: Uuid) -> Option<ImageMetadata> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create(&self, image: &ImageMetadata) -> Result<(), MetadataError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(MetadataError::Database(sqlx::Error::PoolTimedOut));
        }
        self.rows.lock().unwrap().insert(image.id, image.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<ImageMetadata, MetadataError> {
        self.row(id).ok_or(MetadataError::NotFound(id))
    }

    async fn update_status(&self, id: Uuid, status: ImageStatus) -> Result<(), MetadataError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).ok_or(MetadataError::NotFound(id))?;
        if !row.status.can_transition_to(status) {
            return Err(MetadataError::InvalidTransition {
                id,
                from: row.status,
                to: status,
            });
        }
        row.status = status;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), MetadataError> {
        let mut open = self.deletes_open.subscribe();
        if !*open.borrow_and_update() {
            self.deletes_waiting.fetch_add(1, Ordering::SeqCst);
            let _ = open.wait_for(|open| *open).await;
        }
        self.rows
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(MetadataError::NotFound(id))
    }

    async fn health_check(&self) -> Result<(), MetadataError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(StorageBucket, String), Vec<u8>>>,
    pub fail_put: AtomicBool,
}

impl MemoryObjectStore {
    pub fn object(&self, bucket: StorageBucket, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket, key.to_string()))
            .cloned()
    }

    pub fn count(&self, bucket: StorageBucket) -> usize {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| *b == bucket)
            .count()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bucket: StorageBucket, key: &str, local_path: &Path) -> Result<(), StorageError> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(StorageError::Status {
                key: key.to_string(),
                code: 503,
            });
        }
        let data = tokio::fs::read(local_path).await?;
        self.objects
            .lock()
            .unwrap()
            .insert((bucket, key.to_string()), data);
        Ok(())
    }

    async fn get(&self, bucket: StorageBucket, key: &str, local_path: &Path) -> Result<(), StorageError> {
        let data = self.object(bucket, key).ok_or_else(|| StorageError::Status {
            key: key.to_string(),
            code: 404,
        })?;
        tokio::fs::write(local_path, data).await?;
        Ok(())
    }

    async fn delete_many(&self, bucket: StorageBucket, keys: &[String]) -> Result<(), StorageError> {
        let mut objects = self.objects.lock().unwrap();
        for key in keys {
            objects.remove(&(bucket, key.clone()));
        }
        Ok(())
    }
}

/// Queue with the same in-flight / dead-letter semantics as the Redis one.
pub struct MemoryJobQueue {
    pending: Mutex<VecDeque<String>>,
    in_flight: Mutex<Vec<String>>,
    dead: Mutex<Vec<(String, String)>>,
    retry: RetryPolicy,
    pub fail_publish: AtomicBool,
    pub publish_attempts: AtomicU32,
    pub fail_consume: AtomicBool,
    pub consume_calls: AtomicU32,
}

impl MemoryJobQueue {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(Vec::new()),
            dead: Mutex::new(Vec::new()),
            retry,
            fail_publish: AtomicBool::new(false),
            publish_attempts: AtomicU32::new(0),
            fail_consume: AtomicBool::new(false),
            consume_calls: AtomicU32::new(0),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    pub fn dead_letters(&self) -> Vec<(JobRecord, String)> {
        self.dead
            .lock()
            .unwrap()
            .iter()
            .map(|(payload, reason)| (serde_json::from_str(payload).unwrap(), reason.clone()))
            .collect()
    }

    fn push(&self, payload: &str) -> Result<(), QueueError> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("broker down".to_string()));
        }
        self.pending.lock().unwrap().push_back(payload.to_string());
        Ok(())
    }

    fn try_take(&self) -> Option<String> {
        let payload = self.pending.lock().unwrap().pop_front()?;
        self.in_flight.lock().unwrap().push(payload.clone());
        Some(payload)
    }

    fn remove_in_flight(&self, payload: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(pos) = in_flight.iter().position(|p| p == payload) {
            in_flight.remove(pos);
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn publish(&self, record: &JobRecord) -> Result<(), QueueError> {
        let payload = serde_json::to_string(record)?;
        retry(&self.retry, "memory_publish", || std::future::ready(self.push(&payload))).await
    }

    async fn consume(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        self.consume_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_consume.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("broker down".to_string()));
        }
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(payload) = self.try_take() {
                let record = serde_json::from_str(&payload)?;
                return Ok(Some(Delivery { record, payload }));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(Duration::from_millis(5)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.remove_in_flight(&delivery.payload);
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), QueueError> {
        self.remove_in_flight(&delivery.payload);
        self.dead
            .lock()
            .unwrap()
            .push((delivery.payload.clone(), reason.to_string()));
        Ok(())
    }

    async fn requeue_unacked(&self) -> Result<u64, QueueError> {
        let stranded: Vec<String> = self.in_flight.lock().unwrap().drain(..).collect();
        let count = stranded.len() as u64;
        let mut pending = self.pending.lock().unwrap();
        for payload in stranded.into_iter().rev() {
            pending.push_front(payload);
        }
        Ok(count)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.pending_len() as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

/// An `ImageService` wired to in-memory collaborators and per-test scratch dirs.
pub struct TestHarness {
    pub service: Arc<ImageService>,
    pub metadata: Arc<MemoryMetadataStore>,
    pub objects: Arc<MemoryObjectStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub root: TempDir,
}

impl TestHarness {
    /// Harness whose watermark font does not exist.
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let font = root.path().join("no-such-font.ttf");
        Self::build(root, font)
    }

    /// Harness with a real font, so watermark jobs can succeed.
    pub fn with_font() -> Self {
        Self::build(tempfile::tempdir().unwrap(), fixture_font())
    }

    fn build(root: TempDir, font: PathBuf) -> Self {
        let retry = RetryPolicy::fixed(3, Duration::ZERO);
        let scratch =
            ScratchDirs::at(root.path().join("images"), root.path().join("processed")).unwrap();
        let metadata = Arc::new(MemoryMetadataStore::default());
        let objects = Arc::new(MemoryObjectStore::default());
        let queue = Arc::new(MemoryJobQueue::new(retry));

        let service = Arc::new(ImageService::new(
            metadata.clone(),
            objects.clone(),
            queue.clone(),
            scratch,
            Transformer::new(font),
        ));

        Self {
            service,
            metadata,
            objects,
            queue,
            root,
        }
    }

    /// Files currently present in both scratch directories.
    pub fn scratch_files(&self) -> Vec<String> {
        let scratch = self.service.scratch();
        [scratch.originals_dir(), scratch.processed_dir()]
            .iter()
            .flat_map(|dir| std::fs::read_dir(dir).unwrap())
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    /// Poll until the image reaches `finished`, panicking after `timeout`.
    pub async fn wait_finished(&self, id: Uuid, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            if self.metadata.row(id).is_some_and(|row| row.is_finished()) {
                return;
            }
            assert!(Instant::now() < deadline, "image {id} did not finish in time");
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll until `count` jobs have been dead-lettered.
    pub async fn wait_dead_letters(&self, count: usize, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while self.queue.dead_letters().len() < count {
            assert!(Instant::now() < deadline, "expected {count} dead letters");
            sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn fixture_font() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/DejaVuSansMono.ttf")
}

fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 3 % 256) as u8, 90])
    }))
}

fn encoded(image: &DynamicImage, format: image::ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encoded(&gradient(width, height), image::ImageFormat::Jpeg)
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encoded(&gradient(width, height), image::ImageFormat::Png)
}

pub fn decoded_dimensions(data: &[u8]) -> (u32, u32) {
    let image = image::load_from_memory(data).unwrap();
    (image.width(), image.height())
}
