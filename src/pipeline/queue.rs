//! Background processing queue.
//!
//! Upload and retry handlers push document ids onto an unbounded channel
//! and return immediately; a fixed pool of workers drains it, one blocking
//! attempt at a time. An id-keyed in-flight set stops a document from being
//! scheduled twice while it is queued or processing.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};

use crate::pipeline::processor::DocumentProcessor;

/// Cloneable scheduling handle held by the API layer.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<i64>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

impl QueueHandle {
    /// Enqueue a document for processing.
    ///
    /// Returns `false` without side effects when the document is already
    /// queued or processing, or when the queue has shut down.
    pub fn schedule(&self, document_id: i64) -> bool {
        let mut in_flight = match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        if !in_flight.insert(document_id) {
            tracing::debug!(document_id, "Already scheduled, ignoring");
            return false;
        }
        if self.tx.send(document_id).is_err() {
            in_flight.remove(&document_id);
            tracing::warn!(document_id, "Queue is shut down, dropping request");
            return false;
        }
        true
    }
}

/// Worker pool consuming the processing queue.
///
/// Supports graceful shutdown: workers finish the attempt they are running,
/// then stop. Ids still queued at shutdown stay `pending` in the database
/// and are picked up on the next restart's upload/retry.
pub struct ProcessingQueue {
    handle: QueueHandle,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl ProcessingQueue {
    /// Spawn `worker_count` workers (minimum 1) over a shared channel.
    pub fn start(processor: Arc<DocumentProcessor>, worker_count: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<i64>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let in_flight = Arc::new(Mutex::new(HashSet::new()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = QueueHandle {
            tx,
            in_flight: in_flight.clone(),
        };

        let count = worker_count.max(1);
        let workers = (0..count)
            .map(|worker| {
                let rx = rx.clone();
                let processor = processor.clone();
                let in_flight = in_flight.clone();
                let mut shutdown = shutdown_rx.clone();

                tokio::spawn(async move {
                    loop {
                        let next = {
                            let mut rx = rx.lock().await;
                            tokio::select! {
                                id = rx.recv() => id,
                                _ = shutdown.changed() => None,
                            }
                        };
                        let Some(id) = next else { break };

                        let task = processor.clone();
                        let outcome =
                            tokio::task::spawn_blocking(move || task.process_document(id)).await;
                        match outcome {
                            Ok(Ok(())) => {
                                tracing::debug!(document_id = id, worker, "Attempt finished")
                            }
                            Ok(Err(e)) => {
                                tracing::error!(document_id = id, worker, error = %e, "Attempt aborted")
                            }
                            Err(e) => {
                                tracing::error!(document_id = id, worker, error = %e, "Attempt panicked")
                            }
                        }

                        if let Ok(mut set) = in_flight.lock() {
                            set.remove(&id);
                        }
                    }
                    tracing::debug!(worker, "Queue worker stopped");
                })
            })
            .collect();

        tracing::info!(workers = count, "Processing queue started");

        Self {
            handle,
            shutdown_tx,
            workers,
        }
    }

    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    /// Signal workers and wait for them to finish their current attempt.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for worker in self.workers {
            let _ = worker.await;
        }
        tracing::info!("Processing queue stopped");
    }
}
