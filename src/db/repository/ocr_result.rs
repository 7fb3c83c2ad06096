use rusqlite::{params, Connection};

use crate::db::DatabaseError;
use crate::models::{NewOcrResult, OcrResult};

use super::{format_timestamp, parse_timestamp};

pub fn insert_ocr_result(conn: &Connection, result: &NewOcrResult) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO ocr_results (document_id, extracted_text, fields, word_data,
         confidence, duration_ms, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            result.document_id,
            result.extracted_text,
            result.fields.to_string(),
            result.word_data.to_string(),
            result.confidence,
            result.duration_ms,
            format_timestamp(&result.created_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// The most recent result for a document. An absent result is a normal
/// outcome for anything not yet processed, not an error.
pub fn latest_for_document(
    conn: &Connection,
    document_id: i64,
) -> Result<Option<OcrResult>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, document_id, extracted_text, fields, word_data, confidence,
         duration_ms, created_at
         FROM ocr_results WHERE document_id = ?1
         ORDER BY id DESC LIMIT 1",
    )?;

    let result = stmt.query_row(params![document_id], |row| {
        Ok(OcrResultRow {
            id: row.get(0)?,
            document_id: row.get(1)?,
            extracted_text: row.get(2)?,
            fields: row.get(3)?,
            word_data: row.get(4)?,
            confidence: row.get(5)?,
            duration_ms: row.get(6)?,
            created_at: row.get(7)?,
        })
    });

    match result {
        Ok(row) => Ok(Some(result_from_row(row))),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Remove every result for a document. Each processing attempt supersedes
/// the prior attempt's result, and document deletion cleans up here too.
pub fn delete_for_document(conn: &Connection, document_id: i64) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM ocr_results WHERE document_id = ?1",
        params![document_id],
    )?;
    Ok(deleted)
}

struct OcrResultRow {
    id: i64,
    document_id: i64,
    extracted_text: String,
    fields: String,
    word_data: String,
    confidence: i64,
    duration_ms: i64,
    created_at: String,
}

fn result_from_row(row: OcrResultRow) -> OcrResult {
    OcrResult {
        id: row.id,
        document_id: row.document_id,
        extracted_text: row.extracted_text,
        fields: serde_json::from_str(&row.fields).unwrap_or_default(),
        word_data: serde_json::from_str(&row.word_data).unwrap_or_default(),
        confidence: row.confidence,
        duration_ms: row.duration_ms,
        created_at: parse_timestamp(&row.created_at),
    }
}
