use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::image::{ImageMetadata, ImageStatus};

pub mod queries;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Durable image metadata, keyed by image id.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create(&self, image: &ImageMetadata) -> Result<(), MetadataError>;

    async fn get(&self, id: Uuid) -> Result<ImageMetadata, MetadataError>;

    /// Fails with `NotFound` when no row exists for `id` and with
    /// `InvalidTransition` when the move would take the status backwards.
    async fn update_status(&self, id: Uuid, status: ImageStatus) -> Result<(), MetadataError>;

    /// Fails with `NotFound` when no row exists for `id`.
    async fn delete(&self, id: Uuid) -> Result<(), MetadataError>;

    async fn health_check(&self) -> Result<(), MetadataError>;
}

/// PostgreSQL-backed metadata store.
#[derive(Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn create(&self, image: &ImageMetadata) -> Result<(), MetadataError> {
        queries::create_image(&self.pool, image).await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<ImageMetadata, MetadataError> {
        queries::get_image(&self.pool, id)
            .await?
            .ok_or(MetadataError::NotFound(id))
    }

    async fn update_status(&self, id: Uuid, status: ImageStatus) -> Result<(), MetadataError> {
        if queries::update_image_status(&self.pool, id, status).await? > 0 {
            return Ok(());
        }
        // Nothing updated: either the row is gone or the move was backwards.
        match queries::get_image(&self.pool, id).await? {
            Some(image) => Err(MetadataError::InvalidTransition {
                id,
                from: image.status,
                to: status,
            }),
            None => Err(MetadataError::NotFound(id)),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<(), MetadataError> {
        match queries::delete_image(&self.pool, id).await? {
            0 => Err(MetadataError::NotFound(id)),
            _ => Ok(()),
        }
    }

    async fn health_check(&self) -> Result<(), MetadataError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("there is no image with id {0}")]
    NotFound(Uuid),

    #[error("image {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: ImageStatus,
        to: ImageStatus,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
