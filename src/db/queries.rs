use std::str::FromStr;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::image::{ImageFormat, ImageMetadata, ImageStatus};

fn image_from_row(row: &PgRow) -> Result<ImageMetadata, sqlx::Error> {
    let format: String = row.try_get("format")?;
    let status: String = row.try_get("status")?;

    Ok(ImageMetadata {
        id: row.try_get("id")?,
        format: ImageFormat::from_str(&format).map_err(|e| sqlx::Error::ColumnDecode {
            index: "format".to_string(),
            source: Box::new(e),
        })?,
        status: ImageStatus::from_str(&status).map_err(|e| sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: Box::new(e),
        })?,
        created_at: row.try_get("created_at")?,
    })
}

/// Insert a new image row
pub async fn create_image(pool: &PgPool, image: &ImageMetadata) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO images (id, format, status, created_at)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(image.id)
    .bind(image.format.to_string())
    .bind(image.status.to_string())
    .bind(image.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get an image by ID
pub async fn get_image(pool: &PgPool, id: Uuid) -> Result<Option<ImageMetadata>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, format, status, created_at
        FROM images
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(image_from_row).transpose()
}

/// Update image status. Returns the number of rows touched.
///
/// `finished` is terminal: a finished row is never moved back.
pub async fn update_image_status(
    pool: &PgPool,
    id: Uuid,
    status: ImageStatus,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE images
        SET status = $1
        WHERE id = $2 AND (status <> 'finished' OR $1 = 'finished')
        "#,
    )
    .bind(status.to_string())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Delete an image row. Returns the number of rows removed.
pub async fn delete_image(pool: &PgPool, id: Uuid) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM images WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
