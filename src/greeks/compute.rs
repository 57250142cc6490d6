//! Bounded compute pool for numeric kernels
//!
//! Greeks arrays and IV solving are CPU-bound; callers suspend while the
//! kernel runs on the blocking pool. Pool width defaults to the available
//! parallelism. When the pool is saturated, new calls queue up to a bounded
//! depth; beyond that the breaker's reject path is taken.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::ComputeSettings;
use crate::errors::{Result, SignalError};

pub struct ComputePool {
    permits: Arc<Semaphore>,
    waiting: AtomicUsize,
    pool_size: usize,
    max_queue_depth: usize,
}

/// Keeps the waiter count honest if an acquire is cancelled mid-await.
struct WaitGuard<'a>(&'a AtomicUsize);

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ComputePool {
    pub fn new(settings: &ComputeSettings) -> Self {
        let pool_size = settings.pool_size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        });
        debug!(pool_size, max_queue_depth = settings.max_queue_depth, "Compute pool initialized");
        Self {
            permits: Arc::new(Semaphore::new(pool_size)),
            waiting: AtomicUsize::new(0),
            pool_size,
            max_queue_depth: settings.max_queue_depth,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Run a CPU-bound job on the blocking pool, bounded by the pool width.
    pub async fn run<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let permit = match self.permits.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                let queued = self.waiting.fetch_add(1, Ordering::SeqCst);
                let guard = WaitGuard(&self.waiting);
                if queued >= self.max_queue_depth {
                    warn!(
                        queued,
                        max_queue_depth = self.max_queue_depth,
                        "Compute pool saturated, rejecting kernel call"
                    );
                    return Err(SignalError::circuit_open(format!(
                        "Compute pool saturated: {queued} kernel calls already queued"
                    )));
                }
                let permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| SignalError::greeks("Compute pool closed"))?;
                drop(guard);
                permit
            }
        };

        let result = tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| SignalError::greeks(format!("Compute pool worker failed: {e}")));
        drop(permit);
        result
    }
}
