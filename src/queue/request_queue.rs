//! Admission queue serializing generation onto a blocking worker
//!
//! Both front-ends submit here. One worker task drains the queue and runs
//! each job with `spawn_blocking`, awaiting it before taking the next, so at
//! most one inference touches the shared pipeline at a time. Callers beyond
//! `max_pending` waiting jobs are rejected with [`AppError::QueueFull`].

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::QueueSettings;
use crate::error::{AppError, Result};
use crate::generation::{GenerationRequest, GenerationResult, GenerationService};

/// Request with its response channel
struct QueuedRequest {
    request: GenerationRequest,
    response_tx: oneshot::Sender<Result<GenerationResult>>,
}

/// Configuration for the generation queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of jobs waiting behind the running one
    pub max_pending: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_pending: 16 }
    }
}

impl From<&QueueSettings> for QueueConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            max_pending: settings.max_pending,
        }
    }
}

/// Generation queue shared by the HTTP and tool front-ends
pub struct GenerationQueue {
    request_tx: mpsc::Sender<QueuedRequest>,
    config: QueueConfig,
    pending: AtomicU64,
    counters: Arc<WorkerCounters>,
}

/// Outcomes recorded by the worker
#[derive(Default)]
struct WorkerCounters {
    processed: AtomicU64,
    skipped: AtomicU64,
}

impl GenerationQueue {
    /// Create a queue and spawn its worker. Must be called within a Tokio
    /// runtime.
    pub fn with_config(service: Arc<GenerationService>, config: QueueConfig) -> Self {
        let (request_tx, request_rx) = mpsc::channel(config.max_pending.max(1));
        let counters = Arc::new(WorkerCounters::default());

        tokio::spawn(Self::process_requests(request_rx, service, counters.clone()));

        Self {
            request_tx,
            config,
            pending: AtomicU64::new(0),
            counters,
        }
    }

    /// Submit a request and wait for its result
    pub async fn submit(&self, request: GenerationRequest) -> Result<GenerationResult> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .try_send(QueuedRequest {
                request,
                response_tx,
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => {
                    warn!(max_pending = self.config.max_pending, "Generation queue is full");
                    AppError::QueueFull(self.config.max_pending)
                }
                TrySendError::Closed(_) => {
                    AppError::Internal("Generation worker has stopped".to_string())
                }
            })?;

        let _pending = PendingGuard::enter(&self.pending);
        debug!(pending = self.pending_count(), "Request queued");

        response_rx
            .await
            .map_err(|_| AppError::Internal("Request processing was cancelled".to_string()))?
    }

    /// Drain the queue one job at a time
    async fn process_requests(
        mut request_rx: mpsc::Receiver<QueuedRequest>,
        service: Arc<GenerationService>,
        counters: Arc<WorkerCounters>,
    ) {
        while let Some(QueuedRequest {
            request,
            response_tx,
        }) = request_rx.recv().await
        {
            if response_tx.is_closed() {
                debug!("Caller went away before generation started, skipping");
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let service = service.clone();
            let result = tokio::task::spawn_blocking(move || service.generate(&request))
                .await
                .unwrap_or_else(|e| {
                    Err(AppError::Internal(format!("Generation worker failed: {}", e)))
                });

            counters.processed.fetch_add(1, Ordering::Relaxed);
            let _ = response_tx.send(result);
        }
        debug!("Generation queue closed");
    }

    /// Number of submitted requests still waiting for a result
    pub fn pending_count(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }

    /// Number of jobs the worker has finished
    pub fn processed_count(&self) -> u64 {
        self.counters.processed.load(Ordering::Relaxed)
    }

    /// Number of jobs dropped because their caller disconnected first
    pub fn skipped_count(&self) -> u64 {
        self.counters.skipped.load(Ordering::Relaxed)
    }

    /// Get queue statistics
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.pending_count(),
            processed: self.processed_count(),
            skipped: self.skipped_count(),
            max_pending: self.config.max_pending,
        }
    }
}

/// Keeps the pending counter right even when the waiting caller is dropped
struct PendingGuard<'a>(&'a AtomicU64);

impl<'a> PendingGuard<'a> {
    fn enter(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Queue statistics
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    /// Jobs run to completion, successful or not
    pub processed: u64,
    /// Jobs whose caller was gone before they started
    pub skipped: u64,
    pub max_pending: usize,
}
