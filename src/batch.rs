// src/batch.rs
//
// =============================================================================
// FLOWBRIDGE: BATCH DRIVER
// =============================================================================
//
// Drives N simultaneous conversions over a worker pool. The conversion core
// stays synchronous and pure; this module owns the queueing, fan-out, and
// cancellation around it.
//
// Model:
// - worker count = CPU count, capped at 16 by default;
// - one bounded job queue (capacity 2 * workers) feeding all workers;
// - results published unordered as workers finish;
// - a shared cancellation flag checked between jobs — a conversion in
//   progress runs to completion and its result is then discarded.

use crate::convert::{ConversionOutcome, ConversionService};
use crate::error::ConvertError;
use crate::platforms::Platform;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Default cap on the worker pool.
pub const MAX_WORKERS: usize = 16;

#[derive(Debug, Clone)]
pub struct BatchJob {
    /// Display name (typically the file name).
    pub name: String,
    pub bytes: Vec<u8>,
    /// Auto-detected when absent.
    pub from: Option<Platform>,
    pub to: Platform,
}

pub struct BatchResult {
    pub name: String,
    pub outcome: Result<ConversionOutcome, ConvertError>,
}

pub struct BatchDriver {
    workers: usize,
    cancel: Arc<AtomicBool>,
}

impl Default for BatchDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchDriver {
    pub fn new() -> Self {
        Self {
            workers: num_cpus::get().min(MAX_WORKERS),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.clamp(1, MAX_WORKERS);
        self
    }

    /// Shared flag for external cancellation (e.g. ctrl-c handling).
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run every job to completion (or cancellation). Result order is not
    /// guaranteed to match submission order.
    pub async fn run(
        &self,
        service: Arc<ConversionService>,
        jobs: Vec<BatchJob>,
    ) -> Vec<BatchResult> {
        let total = jobs.len();
        if total == 0 {
            return Vec::new();
        }
        let workers = self.workers.min(total);
        log::info!("🏭 batch: {total} job(s) across {workers} worker(s)");

        let (job_tx, job_rx) = mpsc::channel::<BatchJob>(workers * 2);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<BatchResult>(total);

        // Feeder: blocks on the bounded queue for backpressure.
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            for job in jobs {
                if cancel.load(Ordering::SeqCst) {
                    break;
                }
                if job_tx.send(job).await.is_err() {
                    break;
                }
            }
        });

        for worker_id in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let service = service.clone();
            let cancel = self.cancel.clone();

            tokio::spawn(async move {
                loop {
                    if cancel.load(Ordering::SeqCst) {
                        log::debug!("worker {worker_id}: cancelled, draining out");
                        break;
                    }
                    let Some(job) = job_rx.lock().await.recv().await else {
                        break;
                    };

                    let name = job.name.clone();
                    let svc = service.clone();
                    // CPU-bound work off the async threads.
                    let outcome = tokio::task::spawn_blocking(move || match job.from {
                        Some(from) => svc.convert(&job.bytes, from, job.to),
                        None => svc.convert_detected(&job.bytes, job.to),
                    })
                    .await
                    .unwrap_or_else(|e| {
                        Err(ConvertError::schema(format!("worker panicked: {e}")))
                    });

                    if cancel.load(Ordering::SeqCst) {
                        // Completed under cancellation: discard.
                        break;
                    }
                    if result_tx.send(BatchResult { name, outcome }).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut results = Vec::with_capacity(total);
        while let Some(result) = result_rx.recv().await {
            match &result.outcome {
                Ok(out) => log::info!(
                    "✅ {} ({} bytes, {} warning(s))",
                    result.name,
                    out.bytes.len(),
                    out.warnings.len()
                ),
                Err(e) => log::error!("❌ {}: {e}", result.name),
            }
            results.push(result);
        }
        results
    }
}
