use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::db::DatabaseError;
use crate::models::{Document, DocumentStatus, NewDocument};

use super::{format_timestamp, parse_timestamp};

const DOCUMENT_COLUMNS: &str = "id, stored_filename, original_filename, size_bytes, mime_type,
     storage_path, category, status, confidence, uploaded_at, processed_at, user_id";

/// Insert a new document in `pending` state. Returns the assigned row id.
pub fn insert_document(conn: &Connection, doc: &NewDocument) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO documents (stored_filename, original_filename, size_bytes, mime_type,
         storage_path, category, status, uploaded_at, user_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7, ?8)",
        params![
            doc.stored_filename,
            doc.original_filename,
            doc.size_bytes,
            doc.mime_type,
            doc.storage_path,
            doc.category,
            format_timestamp(&doc.uploaded_at),
            doc.user_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_document(conn: &Connection, id: i64) -> Result<Option<Document>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"
    ))?;

    let result = stmt.query_row(params![id], map_document_row);

    match result {
        Ok(row) => Ok(Some(document_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Paginated listing, most recent upload first.
pub fn list_documents(
    conn: &Connection,
    limit: i64,
    offset: i64,
) -> Result<Vec<Document>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents
         ORDER BY uploaded_at DESC, id DESC
         LIMIT ?1 OFFSET ?2"
    ))?;

    let rows = stmt.query_map(params![limit, offset], map_document_row)?;

    let mut docs = Vec::new();
    for row in rows {
        docs.push(document_from_row(row?)?);
    }
    Ok(docs)
}

/// Case-insensitive substring search over original filename and category.
pub fn search_documents(conn: &Connection, query: &str) -> Result<Vec<Document>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents
         WHERE original_filename LIKE '%' || ?1 || '%'
            OR category LIKE '%' || ?1 || '%'
         ORDER BY uploaded_at DESC, id DESC"
    ))?;

    let rows = stmt.query_map(params![query], map_document_row)?;

    let mut docs = Vec::new();
    for row in rows {
        docs.push(document_from_row(row?)?);
    }
    Ok(docs)
}

/// pending → processing. Stamps processed_at with the attempt start time.
///
/// The UPDATE is conditioned on the current status, so an illegal transition
/// affects zero rows and reports `false` instead of corrupting state.
pub fn mark_processing(
    conn: &Connection,
    id: i64,
    started_at: &NaiveDateTime,
) -> Result<bool, DatabaseError> {
    let rows = conn.execute(
        "UPDATE documents SET status = 'processing', processed_at = ?2
         WHERE id = ?1 AND status = 'pending'",
        params![id, format_timestamp(started_at)],
    )?;
    Ok(rows > 0)
}

/// processing → completed, recording the engine confidence.
pub fn mark_completed(conn: &Connection, id: i64, confidence: i64) -> Result<bool, DatabaseError> {
    let rows = conn.execute(
        "UPDATE documents SET status = 'completed', confidence = ?2
         WHERE id = ?1 AND status = 'processing'",
        params![id, confidence],
    )?;
    Ok(rows > 0)
}

/// processing → failed. Confidence is forced to 0 on the failure path.
pub fn mark_failed(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let rows = conn.execute(
        "UPDATE documents SET status = 'failed', confidence = 0
         WHERE id = ?1 AND status = 'processing'",
        params![id],
    )?;
    Ok(rows > 0)
}

/// failed → pending, clearing the previous attempt's score and timestamp.
/// Only documents currently in `failed` state can re-enter the pipeline.
pub fn reset_for_retry(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let rows = conn.execute(
        "UPDATE documents SET status = 'pending', confidence = NULL, processed_at = NULL
         WHERE id = ?1 AND status = 'failed'",
        params![id],
    )?;
    Ok(rows > 0)
}

/// Delete a document and its OCR results.
///
/// ocr_results has no CASCADE on document_id, so children are deleted first.
pub fn delete_document(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    let deleted_results =
        conn.execute("DELETE FROM ocr_results WHERE document_id = ?1", params![id])?;

    let deleted = conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
    if deleted == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Document".into(),
            id: id.to_string(),
        });
    }

    tracing::info!(
        document_id = id,
        ocr_results = deleted_results,
        "Document deleted with its OCR results"
    );

    Ok(())
}

/// Aggregate counts per status plus mean confidence over scored documents.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    /// Mean over documents with a non-null confidence. None when no document
    /// has been scored yet.
    pub average_confidence: Option<f64>,
}

pub fn document_stats(conn: &Connection) -> Result<DocumentStats, DatabaseError> {
    let stats = conn.query_row(
        "SELECT COUNT(*),
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status = 'processing'),
                COUNT(*) FILTER (WHERE status = 'completed'),
                COUNT(*) FILTER (WHERE status = 'failed'),
                AVG(confidence)
         FROM documents",
        [],
        |row| {
            Ok(DocumentStats {
                total: row.get(0)?,
                pending: row.get(1)?,
                processing: row.get(2)?,
                completed: row.get(3)?,
                failed: row.get(4)?,
                average_confidence: row.get(5)?,
            })
        },
    )?;
    Ok(stats)
}

// Internal row type for Document mapping
struct DocumentRow {
    id: i64,
    stored_filename: String,
    original_filename: String,
    size_bytes: i64,
    mime_type: String,
    storage_path: String,
    category: String,
    status: String,
    confidence: Option<i64>,
    uploaded_at: String,
    processed_at: Option<String>,
    user_id: Option<i64>,
}

fn map_document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        id: row.get(0)?,
        stored_filename: row.get(1)?,
        original_filename: row.get(2)?,
        size_bytes: row.get(3)?,
        mime_type: row.get(4)?,
        storage_path: row.get(5)?,
        category: row.get(6)?,
        status: row.get(7)?,
        confidence: row.get(8)?,
        uploaded_at: row.get(9)?,
        processed_at: row.get(10)?,
        user_id: row.get(11)?,
    })
}

fn document_from_row(row: DocumentRow) -> Result<Document, DatabaseError> {
    Ok(Document {
        id: row.id,
        stored_filename: row.stored_filename,
        original_filename: row.original_filename,
        size_bytes: row.size_bytes,
        mime_type: row.mime_type,
        storage_path: row.storage_path,
        category: row.category,
        status: DocumentStatus::from_str(&row.status)?,
        confidence: row.confidence,
        uploaded_at: parse_timestamp(&row.uploaded_at),
        processed_at: row.processed_at.as_deref().map(parse_timestamp),
        user_id: row.user_id,
    })
}
