use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::enums::DocumentStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub stored_filename: String,
    pub original_filename: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub storage_path: String,
    pub category: String,
    pub status: DocumentStatus,
    /// Overall OCR confidence, 0–100. None until a processing attempt finishes.
    pub confidence: Option<i64>,
    pub uploaded_at: NaiveDateTime,
    pub processed_at: Option<NaiveDateTime>,
    pub user_id: Option<i64>,
}

/// Insert payload. The row id is assigned by the database; status starts
/// as `pending` with no confidence.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub stored_filename: String,
    pub original_filename: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub storage_path: String,
    pub category: String,
    pub uploaded_at: NaiveDateTime,
    pub user_id: Option<i64>,
}
