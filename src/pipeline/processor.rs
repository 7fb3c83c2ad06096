//! Processing lifecycle controller.
//!
//! Owns the pending → processing → completed/failed state machine for one
//! document at a time. Every stage error is converted into document state;
//! the only conditions that escape to the worker are a missing document and
//! a database that cannot be opened.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rusqlite::Connection;

use crate::db::repository;
use crate::db::sqlite::open_database;
use crate::models::{Category, Document, NewOcrResult};
use crate::pipeline::cleanup::cleanup_text;
use crate::pipeline::engine::EngineService;
use crate::pipeline::fields::extract_fields;
use crate::pipeline::preprocess::preprocess_for_ocr;
use crate::pipeline::PipelineError;

pub struct DocumentProcessor {
    db_path: PathBuf,
    engine: Arc<EngineService>,
}

impl DocumentProcessor {
    pub fn new(db_path: PathBuf, engine: Arc<EngineService>) -> Self {
        Self { db_path, engine }
    }

    /// Run one processing attempt for a document.
    ///
    /// Runs synchronously — image work and recognition are CPU-bound, so
    /// workers invoke this via `spawn_blocking`.
    pub fn process_document(&self, document_id: i64) -> Result<(), PipelineError> {
        let conn = open_database(&self.db_path)?;
        let started = Instant::now();

        let doc = repository::get_document(&conn, document_id)?
            .ok_or(PipelineError::DocumentMissing(document_id))?;

        let started_at = Utc::now().naive_utc();
        if !repository::mark_processing(&conn, document_id, &started_at)? {
            tracing::warn!(
                document_id,
                status = doc.status.as_str(),
                "Skipping attempt: document is not pending"
            );
            return Ok(());
        }

        match self.run_attempt(&conn, &doc, started) {
            Ok(confidence) => {
                if !repository::mark_completed(&conn, document_id, confidence)? {
                    tracing::warn!(document_id, "Completion guard did not match");
                    return Ok(());
                }
                tracing::info!(
                    document_id,
                    confidence,
                    elapsed_ms = started.elapsed().as_millis() as i64,
                    "Document processed"
                );
            }
            Err(e) => {
                tracing::warn!(document_id, error = %e, "Processing attempt failed");
                match repository::mark_failed(&conn, document_id) {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(document_id, "Failure guard did not match");
                    }
                    Err(persist_err) => {
                        // The document stays in `processing`; degraded but
                        // honest — the failure is not masked.
                        tracing::error!(
                            document_id,
                            error = %persist_err,
                            "Could not record failure status"
                        );
                    }
                }
            }
        }

        Ok(())
    }

    fn run_attempt(
        &self,
        conn: &Connection,
        doc: &Document,
        started: Instant,
    ) -> Result<i64, PipelineError> {
        let processed = preprocess_for_ocr(Path::new(&doc.storage_path), &doc.mime_type)?;

        let image_bytes = std::fs::read(processed.path())?;
        let page = self.engine.recognize(&image_bytes)?;

        let text = cleanup_text(&page.text);
        let fields = extract_fields(&text, Category::parse(&doc.category));
        let confidence = page.confidence.round().clamp(0.0, 100.0) as i64;

        // Each attempt supersedes the previous one's result
        let superseded = repository::delete_for_document(conn, doc.id)?;
        if superseded > 0 {
            tracing::debug!(document_id = doc.id, superseded, "Replaced prior OCR results");
        }

        repository::insert_ocr_result(
            conn,
            &NewOcrResult {
                document_id: doc.id,
                extracted_text: text,
                fields: serde_json::to_value(&fields)?,
                word_data: serde_json::to_value(&page.words)?,
                confidence,
                duration_ms: started.elapsed().as_millis() as i64,
                created_at: Utc::now().naive_utc(),
            },
        )?;

        Ok(confidence)
        // `processed` dropped here: the intermediate file is removed on
        // success and failure paths alike
    }
}
