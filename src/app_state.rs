use std::sync::Arc;

use crate::services::images::ImageService;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub images: Arc<ImageService>,
}

impl AppState {
    pub fn new(images: Arc<ImageService>) -> Self {
        Self { images }
    }
}
