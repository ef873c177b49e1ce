use axum::extract::State;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

/// Install the global Prometheus recorder and describe the pipeline metrics.
pub fn install_recorder() -> Result<Arc<PrometheusHandle>, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    metrics::describe_counter!("images_submitted_total", "Images accepted for processing");
    metrics::describe_counter!(
        "images_processed_total",
        "Image jobs that finished and were stored"
    );
    metrics::describe_counter!(
        "images_failed_total",
        "Image jobs that failed after dequeue and were dead-lettered"
    );
    metrics::describe_histogram!(
        "image_processing_seconds",
        "Time from dequeue to stored result for one image job"
    );
    metrics::describe_gauge!("image_queue_depth", "Pending jobs in the queue");

    Ok(Arc::new(handle))
}

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> String {
    handle.render()
}
