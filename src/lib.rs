pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::pipeline::engine::EngineService;
use crate::pipeline::processor::DocumentProcessor;
use crate::pipeline::queue::ProcessingQueue;

/// Bootstrap and run the service until interrupted.
pub async fn run() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let uploads_dir = config::uploads_dir();
    std::fs::create_dir_all(&uploads_dir)
        .map_err(|e| format!("Cannot create {}: {e}", uploads_dir.display()))?;

    let db_path = config::db_path();
    db::open_database(&db_path).map_err(|e| format!("Database init failed: {e}"))?;

    // Clean up intermediates from crashed attempts before taking uploads
    config::sweep_orphaned_artifacts(&uploads_dir);

    let engine = Arc::new(build_engine_service());
    let processor = Arc::new(DocumentProcessor::new(db_path.clone(), engine));
    let queue = ProcessingQueue::start(processor, config::worker_count());

    let ctx = api::types::ApiContext::new(db_path, uploads_dir, queue.handle());
    let mut server = api::server::start_server(ctx, config::bind_addr()).await?;
    tracing::info!(addr = %server.addr(), "{} ready", config::APP_NAME);

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Signal handler failed: {e}"))?;
    tracing::info!("Shutdown requested");

    server.shutdown();
    queue.shutdown().await;
    Ok(())
}

#[cfg(feature = "ocr")]
fn build_engine_service() -> EngineService {
    use crate::pipeline::engine::{OcrEngine, TesseractEngine};

    EngineService::new(Box::new(|| {
        let engine = TesseractEngine::new(&config::tessdata_dir())?;
        Ok(Box::new(engine) as Box<dyn OcrEngine + Send>)
    }))
}

#[cfg(not(feature = "ocr"))]
fn build_engine_service() -> EngineService {
    use crate::pipeline::PipelineError;

    EngineService::new(Box::new(|| {
        Err(PipelineError::Engine(
            "no recognition backend compiled in; rebuild with the `ocr` feature".into(),
        ))
    }))
}
