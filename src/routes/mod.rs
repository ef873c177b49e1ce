use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::app_state::AppState;
use crate::services::images::ImageServiceError;

pub mod health;
pub mod images;
pub mod metrics;

/// Image API routes. `/metrics` is mounted separately with its own state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/upload", post(images::upload_image))
        .route(
            "/image/{id}",
            get(images::get_image).delete(images::delete_image),
        )
        .route("/image/info/{id}", get(images::get_image_info))
        .with_state(state)
}

/// Maps service failures onto HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Service(ImageServiceError),
}

impl From<ImageServiceError> for ApiError {
    fn from(e: ImageServiceError) -> Self {
        ApiError::Service(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Service(e) => match &e {
                ImageServiceError::Validation(_) => (StatusCode::BAD_REQUEST, e.to_string()),
                ImageServiceError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
                ImageServiceError::NotReady(_) => {
                    return (
                        StatusCode::ACCEPTED,
                        Json(json!({ "status": "in processing, not ready yet" })),
                    )
                        .into_response();
                }
                _ => {
                    tracing::error!(error = %e, "Request failed");
                    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                }
            },
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
