//! Document endpoints: upload, queries, retry, delete.
//!
//! Upload stores the file, creates a `pending` row, and schedules processing
//! before returning — the processing outcome is never awaited here. Query
//! endpoints are plain reads over the repository.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::db::repository;
use crate::db::repository::DocumentStats;
use crate::db::sqlite::open_database;
use crate::models::{Document, DocumentStatus, NewDocument, OcrResult};

/// Upload size cap (10 MB).
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Declared MIME types accepted at the upload boundary. PDFs are accepted
/// here and rejected by the preprocessor, which records a failed attempt.
const ALLOWED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "application/pdf"];

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// `POST /api/documents` — multipart upload (`file`, optional `category`).
pub async fn upload(
    State(ctx): State<ApiContext>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Document>), ApiError> {
    let mut category: Option<String> = None;
    let mut file: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "category" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid category field: {e}")))?;
                category = Some(value);
            }
            "file" => {
                let original = field
                    .file_name()
                    .unwrap_or("upload")
                    .to_string();
                let declared = field.content_type().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Invalid file field: {e}")))?;
                file = Some((original, declared, data.to_vec()));
            }
            _ => {}
        }
    }

    let (original_filename, declared_mime, data) =
        file.ok_or_else(|| ApiError::BadRequest("Missing file field".into()))?;

    if data.is_empty() {
        return Err(ApiError::BadRequest("Uploaded file is empty".into()));
    }
    if data.len() > MAX_UPLOAD_BYTES {
        return Err(ApiError::BadRequest(format!(
            "File exceeds {} MB size limit",
            MAX_UPLOAD_BYTES / (1024 * 1024)
        )));
    }
    if !ALLOWED_MIME_TYPES.contains(&declared_mime.as_str()) {
        return Err(ApiError::BadRequest(format!(
            "Unsupported file type '{declared_mime}'; accepted: jpeg, png, pdf"
        )));
    }

    let category = match category {
        Some(c) if !c.trim().is_empty() => c.trim().to_string(),
        _ => "auto-detect".to_string(),
    };

    let ext = detect_extension(&data, &declared_mime);
    let stored_filename = format!("{}.{ext}", Uuid::new_v4());
    let storage_path = ctx.uploads_dir.join(&stored_filename);

    std::fs::write(&storage_path, &data)
        .map_err(|e| ApiError::Internal(format!("Failed to store upload: {e}")))?;

    let conn = open_database(&ctx.db_path)?;
    let id = match repository::insert_document(
        &conn,
        &NewDocument {
            stored_filename: stored_filename.clone(),
            original_filename,
            size_bytes: data.len() as i64,
            mime_type: declared_mime,
            storage_path: storage_path.to_string_lossy().into_owned(),
            category,
            uploaded_at: chrono::Utc::now().naive_utc(),
            user_id: None,
        },
    ) {
        Ok(id) => id,
        Err(e) => {
            // don't leave an unreferenced file behind
            let _ = std::fs::remove_file(&storage_path);
            return Err(e.into());
        }
    };

    let document = repository::get_document(&conn, id)?
        .ok_or_else(|| ApiError::Internal("Inserted document vanished".into()))?;

    ctx.queue.schedule(id);
    tracing::info!(
        document_id = id,
        stored = %stored_filename,
        category = %document.category,
        "Document uploaded and scheduled"
    );

    Ok((StatusCode::CREATED, Json(document)))
}

#[derive(Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /api/documents` — paginated list, most recent first.
pub async fn list(
    State(ctx): State<ApiContext>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = params.offset.unwrap_or(0).max(0);

    let conn = open_database(&ctx.db_path)?;
    let docs = repository::list_documents(&conn, limit, offset)?;
    Ok(Json(docs))
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
}

/// `GET /api/documents/search?q=` — substring search over original filename
/// and category.
pub async fn search(
    State(ctx): State<ApiContext>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let query = params.q.unwrap_or_default();
    let query = query.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("Query parameter 'q' is required".into()));
    }

    let conn = open_database(&ctx.db_path)?;
    let docs = repository::search_documents(&conn, query)?;
    Ok(Json(docs))
}

/// `GET /api/documents/stats` — per-status counts and mean confidence.
pub async fn stats(State(ctx): State<ApiContext>) -> Result<Json<DocumentStats>, ApiError> {
    let conn = open_database(&ctx.db_path)?;
    Ok(Json(repository::document_stats(&conn)?))
}

/// `GET /api/documents/:id`
pub async fn detail(
    State(ctx): State<ApiContext>,
    Path(id): Path<i64>,
) -> Result<Json<Document>, ApiError> {
    let conn = open_database(&ctx.db_path)?;
    let doc = repository::get_document(&conn, id)?
        .ok_or_else(|| ApiError::NotFound(format!("Document {id} not found")))?;
    Ok(Json(doc))
}

/// `GET /api/documents/:id/ocr` — latest OCR result. 404 is the normal
/// outcome for anything not yet processed.
pub async fn ocr_result(
    State(ctx): State<ApiContext>,
    Path(id): Path<i64>,
) -> Result<Json<OcrResult>, ApiError> {
    let conn = open_database(&ctx.db_path)?;
    if repository::get_document(&conn, id)?.is_none() {
        return Err(ApiError::NotFound(format!("Document {id} not found")));
    }
    let result = repository::latest_for_document(&conn, id)?
        .ok_or_else(|| ApiError::NotFound(format!("No OCR result for document {id}")))?;
    Ok(Json(result))
}

/// `POST /api/documents/:id/retry` — failed documents re-enter the pipeline.
pub async fn retry(
    State(ctx): State<ApiContext>,
    Path(id): Path<i64>,
) -> Result<Json<Document>, ApiError> {
    let conn = open_database(&ctx.db_path)?;
    let doc = repository::get_document(&conn, id)?
        .ok_or_else(|| ApiError::NotFound(format!("Document {id} not found")))?;

    if doc.status != DocumentStatus::Failed {
        return Err(ApiError::Conflict(format!(
            "Document {id} is {}; only failed documents can be retried",
            doc.status.as_str()
        )));
    }
    if !repository::reset_for_retry(&conn, id)? {
        // lost a race with another retry or a concurrent delete
        return Err(ApiError::Conflict(format!(
            "Document {id} is no longer in a retryable state"
        )));
    }

    ctx.queue.schedule(id);
    tracing::info!(document_id = id, "Retry scheduled");

    let doc = repository::get_document(&conn, id)?
        .ok_or_else(|| ApiError::NotFound(format!("Document {id} not found")))?;
    Ok(Json(doc))
}

/// `DELETE /api/documents/:id` — removes the row, its OCR results, and the
/// backing file. Repeat deletes are a plain 404.
pub async fn remove(
    State(ctx): State<ApiContext>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let conn = open_database(&ctx.db_path)?;
    let doc = repository::get_document(&conn, id)?
        .ok_or_else(|| ApiError::NotFound(format!("Document {id} not found")))?;

    repository::delete_document(&conn, id)?;

    if let Err(e) = std::fs::remove_file(&doc.storage_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(document_id = id, error = %e, "Could not delete backing file");
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Detect file extension from magic bytes, falling back to the declared
/// MIME type when the signature is unknown.
fn detect_extension(bytes: &[u8], declared_mime: &str) -> &'static str {
    if bytes.len() >= 3 && bytes[0..3] == [0xFF, 0xD8, 0xFF] {
        "jpg"
    } else if bytes.len() >= 8 && bytes[0..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
        "png"
    } else if bytes.len() >= 5 && &bytes[0..5] == b"%PDF-" {
        "pdf"
    } else {
        match declared_mime {
            "image/jpeg" => "jpg",
            "image/png" => "png",
            "application/pdf" => "pdf",
            _ => "bin",
        }
    }
}
