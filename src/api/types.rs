//! Shared state for the API layer.

use std::path::PathBuf;
use std::sync::Arc;

use crate::pipeline::queue::QueueHandle;

/// Shared context cloned into every route handler.
///
/// Handlers open their own short-lived database connection per request;
/// the context only carries the paths and the scheduling handle.
#[derive(Clone)]
pub struct ApiContext {
    pub db_path: Arc<PathBuf>,
    pub uploads_dir: Arc<PathBuf>,
    pub queue: QueueHandle,
}

impl ApiContext {
    pub fn new(db_path: PathBuf, uploads_dir: PathBuf, queue: QueueHandle) -> Self {
        Self {
            db_path: Arc::new(db_path),
            uploads_dir: Arc::new(uploads_dir),
            queue,
        }
    }
}
