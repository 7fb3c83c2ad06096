//! API router assembly.
//!
//! Returns a composable `Router` with all endpoints nested under `/api`.
//! CORS is permissive — the dashboard is served from its own origin — and
//! every request is traced.

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::endpoints::{documents, files, health};
use crate::api::types::ApiContext;

/// Build the API router.
pub fn api_router(ctx: ApiContext) -> Router {
    let api = Router::new()
        .route("/health", get(health::check))
        .route(
            "/documents",
            get(documents::list).post(documents::upload),
        )
        .route("/documents/search", get(documents::search))
        .route("/documents/stats", get(documents::stats))
        .route(
            "/documents/:id",
            get(documents::detail).delete(documents::remove),
        )
        .route("/documents/:id/ocr", get(documents::ocr_result))
        .route("/documents/:id/retry", axum::routing::post(documents::retry))
        .route("/files/:filename", get(files::serve))
        .with_state(ctx);

    Router::new()
        .nest("/api", api)
        // multipart bodies carry up to MAX_UPLOAD_BYTES plus framing overhead
        .layer(DefaultBodyLimit::max(documents::MAX_UPLOAD_BYTES + 64 * 1024))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::io::Cursor;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::db::sqlite::open_database;
    use crate::pipeline::engine::{EngineService, MockEngine, OcrEngine};
    use crate::pipeline::processor::DocumentProcessor;
    use crate::pipeline::queue::ProcessingQueue;

    struct TestServer {
        ctx: ApiContext,
        _queue: ProcessingQueue,
        _dir: tempfile::TempDir,
        db_path: PathBuf,
    }

    /// Full stack over a temp directory: real database, real queue, mock
    /// recognition engine scripted with `text`.
    fn test_server(text: &str, confidence: f32) -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("docuscan.db");
        open_database(&db_path).unwrap();
        let uploads_dir = dir.path().join("uploads");
        std::fs::create_dir_all(&uploads_dir).unwrap();

        let text = text.to_string();
        let service = EngineService::new(Box::new(move || {
            Ok(Box::new(MockEngine::new(&text, confidence)) as Box<dyn OcrEngine + Send>)
        }));
        let processor = Arc::new(DocumentProcessor::new(db_path.clone(), Arc::new(service)));
        let queue = ProcessingQueue::start(processor, 2);
        let ctx = ApiContext::new(db_path.clone(), uploads_dir, queue.handle());

        TestServer {
            ctx,
            _queue: queue,
            _dir: dir,
            db_path,
        }
    }

    fn app(server: &TestServer) -> Router {
        api_router(server.ctx.clone())
    }

    async fn response_json(response: axum::http::Response<Body>) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn png_bytes() -> Vec<u8> {
        let mut img = image::RgbImage::new(32, 20);
        for (x, y, p) in img.enumerate_pixels_mut() {
            let v = ((x * 9 + y * 5) % 256) as u8;
            *p = image::Rgb([v, v, v]);
        }
        let mut cursor = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut cursor, image::ImageOutputFormat::Png)
            .unwrap();
        cursor.into_inner()
    }

    const BOUNDARY: &str = "docuscan-test-boundary";

    fn multipart_upload(
        filename: &str,
        content_type: &str,
        data: &[u8],
        category: Option<&str>,
    ) -> Request<Body> {
        let mut body: Vec<u8> = Vec::new();
        if let Some(category) = category {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"category\"\r\n\r\n{category}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/documents")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
    }

    async fn wait_for_status(server: &TestServer, id: i64, wanted: &str) {
        for _ in 0..1500 {
            let conn = open_database(&server.db_path).unwrap();
            let status: String = conn
                .query_row(
                    "SELECT status FROM documents WHERE id = ?1",
                    rusqlite::params![id],
                    |row| row.get(0),
                )
                .unwrap();
            if status == wanted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("document {id} never reached {wanted}");
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let server = test_server("x", 50.0);
        let response = app(&server).oneshot(get("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json["status"], "ok");
        assert!(!json["version"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn upload_creates_pending_document_and_stores_the_file() {
        let server = test_server("x", 50.0);
        let response = app(&server)
            .oneshot(multipart_upload("scan.png", "image/png", &png_bytes(), Some("resume")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let json = response_json(response).await;
        assert_eq!(json["original_filename"], "scan.png");
        assert_eq!(json["category"], "resume");
        assert_eq!(json["status"], "pending");
        assert!(json["confidence"].is_null());

        let stored = json["stored_filename"].as_str().unwrap();
        assert!(stored.ends_with(".png"));
        assert!(server.ctx.uploads_dir.join(stored).exists());
    }

    #[tokio::test]
    async fn upload_defaults_category_to_auto_detect() {
        let server = test_server("x", 50.0);
        let response = app(&server)
            .oneshot(multipart_upload("scan.png", "image/png", &png_bytes(), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = response_json(response).await;
        assert_eq!(json["category"], "auto-detect");
    }

    #[tokio::test]
    async fn upload_rejects_undeclared_mime_types() {
        let server = test_server("x", 50.0);
        let response = app(&server)
            .oneshot(multipart_upload("notes.txt", "text/plain", b"hello", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = response_json(response).await;
        assert_eq!(json["error"]["code"], "BAD_REQUEST");

        // rejected uploads never create a document
        let list = app(&server).oneshot(get("/api/documents")).await.unwrap();
        let docs = response_json(list).await;
        assert_eq!(docs.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn upload_without_file_field_is_a_400() {
        let server = test_server("x", 50.0);
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"category\"\r\n\r\nresume\r\n--{BOUNDARY}--\r\n"
        );
        let req = Request::builder()
            .method("POST")
            .uri("/api/documents")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();

        let response = app(&server).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_paginates_newest_first() {
        let server = test_server("x", 50.0);
        for i in 0..3 {
            let response = app(&server)
                .oneshot(multipart_upload(
                    &format!("doc{i}.png"),
                    "image/png",
                    &png_bytes(),
                    None,
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let response = app(&server)
            .oneshot(get("/api/documents?limit=2"))
            .await
            .unwrap();
        let docs = response_json(response).await;
        assert_eq!(docs.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn search_requires_a_query() {
        let server = test_server("x", 50.0);
        let response = app(&server)
            .oneshot(get("/api/documents/search?q="))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app(&server)
            .oneshot(get("/api/documents/search"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn search_matches_original_filename() {
        let server = test_server("x", 50.0);
        app(&server)
            .oneshot(multipart_upload("tax-return.png", "image/png", &png_bytes(), None))
            .await
            .unwrap();
        app(&server)
            .oneshot(multipart_upload("diploma.png", "image/png", &png_bytes(), None))
            .await
            .unwrap();

        let response = app(&server)
            .oneshot(get("/api/documents/search?q=TAX"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let docs = response_json(response).await;
        assert_eq!(docs.as_array().unwrap().len(), 1);
        assert_eq!(docs[0]["original_filename"], "tax-return.png");
    }

    #[tokio::test]
    async fn detail_and_ocr_report_not_found() {
        let server = test_server("x", 50.0);
        let response = app(&server).oneshot(get("/api/documents/999")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app(&server)
            .oneshot(get("/api/documents/999/ocr"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn retry_of_non_failed_document_is_a_409_without_side_effects() {
        let server = test_server("x", 50.0);
        let response = app(&server)
            .oneshot(multipart_upload("scan.png", "image/png", &png_bytes(), None))
            .await
            .unwrap();
        let id = response_json(response).await["id"].as_i64().unwrap();
        wait_for_status(&server, id, "completed").await;

        let req = Request::builder()
            .method("POST")
            .uri(format!("/api/documents/{id}/retry"))
            .body(Body::empty())
            .unwrap();
        let response = app(&server).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app(&server)
            .oneshot(get(&format!("/api/documents/{id}")))
            .await
            .unwrap();
        let json = response_json(response).await;
        assert_eq!(json["status"], "completed");
    }

    #[tokio::test]
    async fn delete_is_idempotent_at_the_http_level() {
        let server = test_server("x", 50.0);
        let response = app(&server)
            .oneshot(multipart_upload("scan.png", "image/png", &png_bytes(), None))
            .await
            .unwrap();
        let json = response_json(response).await;
        let id = json["id"].as_i64().unwrap();
        let stored = json["stored_filename"].as_str().unwrap().to_string();

        let del = |id: i64| {
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/documents/{id}"))
                .body(Body::empty())
                .unwrap()
        };

        let response = app(&server).oneshot(del(id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!server.ctx.uploads_dir.join(&stored).exists());

        // repeat delete: plain 404, never a crash
        let response = app(&server).oneshot(del(id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn file_serving_returns_bytes_and_rejects_traversal() {
        let server = test_server("x", 50.0);
        std::fs::write(server.ctx.uploads_dir.join("sample.png"), b"fakepng").unwrap();

        let response = app(&server)
            .oneshot(get("/api/files/sample.png"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "image/png"
        );
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"fakepng");

        let response = app(&server)
            .oneshot(get("/api/files/..%2Fdocuscan.db"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app(&server)
            .oneshot(get("/api/files/missing.png"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stats_aggregate_counts_and_confidence() {
        let server = test_server("x", 80.0);
        let response = app(&server)
            .oneshot(multipart_upload("scan.png", "image/png", &png_bytes(), None))
            .await
            .unwrap();
        let id = response_json(response).await["id"].as_i64().unwrap();
        wait_for_status(&server, id, "completed").await;

        let response = app(&server)
            .oneshot(get("/api/documents/stats"))
            .await
            .unwrap();
        let json = response_json(response).await;
        assert_eq!(json["total"], 1);
        assert_eq!(json["completed"], 1);
        assert_eq!(json["average_confidence"], 80.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn end_to_end_license_upload_extracts_fields() {
        let server = test_server("License No. AB1234 Expires: 03/01/2026", 88.0);
        let response = app(&server)
            .oneshot(multipart_upload(
                "license.png",
                "image/png",
                &png_bytes(),
                Some("license"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = response_json(response).await["id"].as_i64().unwrap();

        wait_for_status(&server, id, "completed").await;

        let response = app(&server)
            .oneshot(get(&format!("/api/documents/{id}")))
            .await
            .unwrap();
        let doc = response_json(response).await;
        assert_eq!(doc["status"], "completed");
        assert_eq!(doc["confidence"], 88);

        let response = app(&server)
            .oneshot(get(&format!("/api/documents/{id}/ocr")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let result = response_json(response).await;
        assert_eq!(result["fields"]["license_number"], "AB1234");
        assert_eq!(result["fields"]["expiration_date"], "03/01/2026");
        assert_eq!(result["confidence"], 88);
        assert!(result["extracted_text"].as_str().unwrap().contains("AB1234"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn end_to_end_pdf_upload_fails_and_retry_reprocesses() {
        let server = test_server("unused", 90.0);
        let response = app(&server)
            .oneshot(multipart_upload(
                "report.pdf",
                "application/pdf",
                b"%PDF-1.4 not really a renderable pdf",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = response_json(response).await["id"].as_i64().unwrap();

        // PDFs pass the upload filter and fail in preprocessing
        wait_for_status(&server, id, "failed").await;

        let response = app(&server)
            .oneshot(get(&format!("/api/documents/{id}")))
            .await
            .unwrap();
        let doc = response_json(response).await;
        assert_eq!(doc["confidence"], 0);

        // a failed document is retryable; the PDF fails again the same way
        let req = Request::builder()
            .method("POST")
            .uri(format!("/api/documents/{id}/retry"))
            .body(Body::empty())
            .unwrap();
        let response = app(&server).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["status"], "pending");

        wait_for_status(&server, id, "failed").await;
    }
}
