use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use image_processor::app_state::AppState;
use image_processor::config::AppConfig;
use image_processor::db::{self, PgMetadataStore};
use image_processor::routes;
use image_processor::services::{
    images::ImageService, queue::RedisJobQueue, scratch::ScratchDirs, storage::ObjectStore,
    storage::S3ObjectStore, transform::Transformer, worker::WorkerPool,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing image-processor server");

    let prometheus_handle =
        routes::metrics::install_recorder().expect("Failed to install Prometheus metrics recorder");

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Initializing object storage client");
    let object_store = S3ObjectStore::new(
        &config.originals_bucket,
        &config.processed_bucket,
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
    )
    .expect("Failed to initialize object storage client");
    object_store
        .ensure_buckets()
        .await
        .expect("Object storage buckets are not reachable");

    tracing::info!("Connecting to Redis job queue");
    let queue = RedisJobQueue::new(&config.redis_url, config.retry_policy())
        .expect("Failed to initialize job queue");

    let scratch = ScratchDirs::create_in(&config.scratch_root)
        .expect("Could not create scratch directories for images");
    tracing::info!(
        originals = %scratch.originals_dir().display(),
        processed = %scratch.processed_dir().display(),
        "Created scratch directories"
    );

    if !config.font_path.exists() {
        tracing::warn!(
            font_path = %config.font_path.display(),
            "Watermark font not found, watermark jobs will fail"
        );
    }

    let images = Arc::new(ImageService::new(
        Arc::new(PgMetadataStore::new(db_pool)),
        Arc::new(object_store),
        Arc::new(queue),
        scratch,
        Transformer::new(&config.font_path),
    ));

    let pool = WorkerPool::start(Arc::clone(&images), config.worker_pool()).await;
    tracing::info!(workers = pool.workers(), "Worker pool started");

    let state = AppState::new(images);

    let app = routes::router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("HTTP server stopped, waiting for workers to finish");
    pool.join().await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Received shutdown signal, shutting down");
}
