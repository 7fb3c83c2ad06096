use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Application-level constants
pub const APP_NAME: &str = "Docuscan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_BIND: &str = "127.0.0.1:8787";
const DEFAULT_WORKERS: usize = 4;

/// Get the application data directory.
/// `~/Docuscan/` unless overridden with `DOCUSCAN_DATA_DIR`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("DOCUSCAN_DATA_DIR") {
        return PathBuf::from(dir);
    }
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("Docuscan")
}

/// Directory holding stored uploads (and transient preprocessing output).
pub fn uploads_dir() -> PathBuf {
    data_dir().join("uploads")
}

/// Path of the SQLite database file.
pub fn db_path() -> PathBuf {
    data_dir().join("docuscan.db")
}

/// Listen address, `DOCUSCAN_BIND` or the local default.
pub fn bind_addr() -> SocketAddr {
    let raw = std::env::var("DOCUSCAN_BIND").unwrap_or_else(|_| DEFAULT_BIND.into());
    raw.parse().unwrap_or_else(|_| {
        tracing::warn!(value = %raw, "Invalid DOCUSCAN_BIND, using {DEFAULT_BIND}");
        DEFAULT_BIND.parse().expect("default bind address parses")
    })
}

/// Processing worker count, `DOCUSCAN_WORKERS` or 4, minimum 1.
pub fn worker_count() -> usize {
    std::env::var("DOCUSCAN_WORKERS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(DEFAULT_WORKERS)
        .max(1)
}

/// Tesseract data directory for the `ocr` feature,
/// `DOCUSCAN_TESSDATA` or the distro default.
pub fn tessdata_dir() -> PathBuf {
    std::env::var("DOCUSCAN_TESSDATA")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/usr/share/tesseract-ocr/5/tessdata"))
}

pub fn default_log_filter() -> String {
    format!("{}=info,tower_http=info", env!("CARGO_PKG_NAME"))
}

/// Delete preprocessing artifacts left behind by a crash mid-attempt.
/// Returns the number of files removed.
pub fn sweep_orphaned_artifacts(uploads: &Path) -> usize {
    let entries = match std::fs::read_dir(uploads) {
        Ok(entries) => entries,
        Err(_) => return 0, // Uploads dir may not exist yet
    };

    let marker = format!("{}.png", crate::pipeline::preprocess::PROCESSED_SUFFIX);
    let mut cleaned = 0usize;

    for entry in entries.flatten() {
        let path = entry.path();
        let is_artifact = path
            .file_name()
            .map(|name| name.to_string_lossy().ends_with(&marker))
            .unwrap_or(false);
        if is_artifact && std::fs::remove_file(&path).is_ok() {
            cleaned += 1;
        }
    }

    if cleaned > 0 {
        tracing::info!(files_cleaned = cleaned, "Cleaned orphaned preprocessing artifacts");
    }
    cleaned
}
