//! Raw file serving for stored uploads.

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::ApiContext;

/// `GET /api/files/:filename` — raw bytes of a stored upload.
///
/// Stored filenames are flat uuid-based names; anything that looks like a
/// path is rejected before touching the filesystem.
pub async fn serve(
    State(ctx): State<ApiContext>,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return Err(ApiError::BadRequest("Invalid filename".into()));
    }

    let path = ctx.uploads_dir.join(&filename);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("File {filename} not found")));
        }
        Err(e) => return Err(ApiError::Internal(format!("Read failed: {e}"))),
    };

    let mime = mime_guess::from_path(&filename).first_or_octet_stream();
    Ok(([(header::CONTENT_TYPE, mime.essence_str().to_string())], bytes).into_response())
}
