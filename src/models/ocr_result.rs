use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One processing attempt's output for a document.
///
/// `fields` holds the category-specific key/value map produced by the field
/// extractor; `word_data` holds the engine's per-word confidence and bounding
/// boxes. Both are stored as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrResult {
    pub id: i64,
    pub document_id: i64,
    pub extracted_text: String,
    pub fields: serde_json::Value,
    pub word_data: serde_json::Value,
    /// Overall confidence, 0–100.
    pub confidence: i64,
    pub duration_ms: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewOcrResult {
    pub document_id: i64,
    pub extracted_text: String,
    pub fields: serde_json::Value,
    pub word_data: serde_json::Value,
    pub confidence: i64,
    pub duration_ms: i64,
    pub created_at: NaiveDateTime,
}
