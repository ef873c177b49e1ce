use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::image::ImageMetadata;
use crate::models::upload::{StatusResponse, UploadMetadata, UploadResponse};
use crate::routes::ApiError;
use crate::services::scratch::remove_scratch_file;

/// POST /upload: Upload an image with a processing directive.
///
/// Multipart parts: `image` (the file, with its content type) and
/// `metadata` (JSON [`UploadMetadata`]).
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut image: Option<(Vec<u8>, Option<String>)> = None;
    let mut metadata: Option<UploadMetadata> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("could not read image: {e}")))?;
                image = Some((data.to_vec(), content_type));
            }
            Some("metadata") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("could not read metadata: {e}")))?;
                let parsed: UploadMetadata = serde_json::from_str(&text)
                    .map_err(|e| ApiError::BadRequest(format!("invalid metadata: {e}")))?;
                metadata = Some(parsed);
            }
            _ => {}
        }
    }

    let (data, part_content_type) =
        image.ok_or_else(|| ApiError::BadRequest("missing image part".to_string()))?;
    let metadata =
        metadata.ok_or_else(|| ApiError::BadRequest("missing metadata part".to_string()))?;
    metadata
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let content_type = metadata
        .content_type
        .clone()
        .or(part_content_type)
        .unwrap_or_default();

    let id = state
        .images
        .submit(&data, &content_type, &metadata.task, &metadata.params())
        .await?;

    Ok(Json(UploadResponse { id }))
}

/// GET /image/{id}: Download the processed image.
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let artifact = state.images.get_artifact(id).await?;

    let body = tokio::fs::read(&artifact.path).await;
    if let Err(e) = remove_scratch_file(&artifact.path).await {
        tracing::error!(
            image_id = %id,
            error = %e,
            "Could not delete processed image from local storage after sending it"
        );
    }
    let body = body.map_err(|e| ApiError::Service(e.into()))?;

    Ok(([(header::CONTENT_TYPE, artifact.format.mime_type())], body))
}

/// GET /image/info/{id}: Processing status and metadata.
pub async fn get_image_info(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ImageMetadata>, ApiError> {
    Ok(Json(state.images.get_status(id).await?))
}

/// DELETE /image/{id}: Remove an image, its artifacts and its metadata.
pub async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    state.images.delete(id).await?;
    Ok(Json(StatusResponse {
        status: "deleted".to_string(),
    }))
}
