pub mod cleanup;
pub mod engine;
pub mod fields;
pub mod preprocess;
pub mod processor;
pub mod queue;

use crate::db::DatabaseError;

/// Errors raised inside a processing attempt.
///
/// The lifecycle controller converts all of these to document state; only a
/// missing document (or a database that cannot be opened) escapes to the
/// worker, which logs it.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Image processing failed: {0}")]
    Image(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Recognition failed: {0}")]
    Engine(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Document {0} not found")]
    DocumentMissing(i64),
}
