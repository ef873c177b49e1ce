//! Fixed-size worker pool draining the job queue.
//!
//! Each worker runs a sequential loop: wait for a job, process it, then
//! acknowledge or dead-letter it. Shutdown is cooperative. It is checked
//! between iterations and raced against the blocking dequeue, but a job
//! already being processed always runs to completion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::services::images::ImageService;
use crate::services::queue::Delivery;
use crate::services::retry::backoff_duration;

const DEQUEUE_BACKOFF_BASE_MS: u64 = 500;

#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    /// How long a single dequeue blocks before the loop re-checks shutdown.
    pub poll_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            poll_timeout: Duration::from_secs(1),
        }
    }
}

/// Handle to a running pool.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Return jobs stranded by a previous run to the queue, then spawn the workers.
    pub async fn start(service: Arc<ImageService>, config: WorkerPoolConfig) -> Self {
        match service.queue().requeue_unacked().await {
            Ok(0) => {}
            Ok(count) => tracing::info!(count, "Recovered unacknowledged jobs"),
            Err(e) => tracing::error!(error = %e, "Failed to recover unacknowledged jobs"),
        }

        let (shutdown, _) = watch::channel(false);
        let handles = (0..config.workers.max(1))
            .map(|index| {
                tracing::info!(worker = index, "Starting worker");
                let service = Arc::clone(&service);
                let shutdown_rx = shutdown.subscribe();
                tokio::spawn(run_worker(index, service, shutdown_rx, config.poll_timeout))
            })
            .collect();

        Self { shutdown, handles }
    }

    /// Number of worker tasks spawned.
    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    /// Signal every worker to stop after its current iteration.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Signal shutdown and wait for every worker to exit.
    pub async fn join(self) {
        self.shutdown();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        tracing::info!("All workers stopped");
    }
}

async fn run_worker(
    index: usize,
    service: Arc<ImageService>,
    mut shutdown: watch::Receiver<bool>,
    poll_timeout: Duration,
) {
    let mut consecutive_failures: u32 = 0;

    loop {
        if *shutdown.borrow() {
            tracing::info!(worker = index, "Received shutdown signal, stopping worker");
            return;
        }

        let next = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    // Pool handle dropped without signalling; nobody can stop us later.
                    return;
                }
                continue;
            }
            next = service.queue().consume(poll_timeout) => next,
        };

        match next {
            Ok(Some(delivery)) => {
                consecutive_failures = 0;
                handle_delivery(index, &service, delivery).await;
            }
            Ok(None) => {
                consecutive_failures = 0;
                tracing::trace!(worker = index, "No jobs available");
            }
            Err(e) => {
                let delay = backoff_duration(consecutive_failures, DEQUEUE_BACKOFF_BASE_MS);
                consecutive_failures = consecutive_failures.saturating_add(1);
                tracing::error!(
                    worker = index,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Could not consume job from queue, backing off"
                );
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
}

async fn handle_delivery(index: usize, service: &ImageService, delivery: Delivery) {
    let record = &delivery.record;
    tracing::info!(
        worker = index,
        image_id = %record.id,
        task = %record.task,
        "Processing image job"
    );

    let start = Instant::now();
    match service.process_job(record).await {
        Ok(()) => {
            metrics::histogram!("image_processing_seconds").record(start.elapsed().as_secs_f64());
            metrics::counter!("images_processed_total").increment(1);

            if let Err(e) = service.queue().ack(&delivery).await {
                tracing::error!(worker = index, image_id = %record.id, error = %e, "Failed to acknowledge job");
            }

            tracing::info!(
                worker = index,
                image_id = %record.id,
                duration_ms = start.elapsed().as_millis() as u64,
                "Successfully processed image and saved it to object storage"
            );
        }
        Err(e) => {
            metrics::counter!("images_failed_total").increment(1);
            tracing::error!(worker = index, image_id = %record.id, error = %e, "Job processing failed");

            if let Err(qe) = service.queue().dead_letter(&delivery, &e.to_string()).await {
                tracing::error!(worker = index, image_id = %record.id, error = %qe, "Failed to dead-letter job");
            }
        }
    }
}
