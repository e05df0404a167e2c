//! Bounded worker pool for blocking engine calls (transcribe, reply, synthesize).
//!
//! A semaphore caps how many jobs run at once; each job runs on tokio's
//! blocking pool and its result is posted back to the session loop as an
//! event tagged with the epoch it was dispatched under. Jobs that time out
//! are abandoned, not killed: the worker keeps its permit until it returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::cancellation::EpochGuard;
use crate::error::{BridgeError, EngineError, Result};
use crate::metrics::MetricsRegistry;

struct PoolInner {
    permits: Arc<Semaphore>,
    workers: usize,
    timeout: Duration,
    metrics: Arc<MetricsRegistry>,
}

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(workers: usize, timeout: Duration, metrics: Arc<MetricsRegistry>) -> Result<Self> {
        if workers == 0 {
            return Err(BridgeError::InvalidCapacity {
                component: "WorkerPool",
            });
        }
        Ok(Self {
            inner: Arc::new(PoolInner {
                permits: Arc::new(Semaphore::new(workers)),
                workers,
                timeout,
                metrics,
            }),
        })
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// Jobs currently holding a worker, including abandoned ones still running.
    pub fn in_flight(&self) -> usize {
        self.inner.workers - self.inner.permits.available_permits()
    }

    /// Wait for a free worker, unless `guard` is cancelled first.
    async fn acquire(
        &self,
        op: &'static str,
        guard: &EpochGuard,
    ) -> std::result::Result<OwnedSemaphorePermit, EngineError> {
        let permit = tokio::select! {
            biased;
            _ = guard.token().cancelled() => return Err(EngineError::Cancelled(op)),
            permit = Arc::clone(&self.inner.permits).acquire_owned() => permit
                .map_err(|_| EngineError::WorkerPanicked("worker pool closed".into()))?,
        };
        if !guard.should_continue() {
            return Err(EngineError::Cancelled(op));
        }
        Ok(permit)
    }

    /// Run `work` on the blocking pool; the worker holds `permit` until it returns.
    async fn execute<T, F>(
        &self,
        op: &'static str,
        metric: &'static str,
        permit: OwnedSemaphorePermit,
        work: F,
    ) -> std::result::Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce() -> std::result::Result<T, EngineError> + Send + 'static,
    {
        let span = self.inner.metrics.span(metric);
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        });

        match tokio::time::timeout(self.inner.timeout, task).await {
            Ok(Ok(result)) => {
                let elapsed_us = span.finish();
                debug!(op, elapsed_us, ok = result.is_ok(), "worker_job_done");
                result
            }
            Ok(Err(join_err)) => {
                error!(op, error = %join_err, "worker_panicked");
                Err(EngineError::WorkerPanicked(join_err.to_string()))
            }
            Err(_) => {
                warn!(
                    op,
                    timeout_ms = self.inner.timeout.as_millis() as u64,
                    "worker_timed_out"
                );
                Err(EngineError::Timeout(op))
            }
        }
    }

    /// Run `work` on a worker once one is free, unless `guard` is cancelled first.
    /// Latency is recorded under `metric`.
    pub async fn run<T, F>(
        &self,
        op: &'static str,
        metric: &'static str,
        guard: &EpochGuard,
        work: F,
    ) -> std::result::Result<T, EngineError>
    where
        T: Send + 'static,
        F: FnOnce() -> std::result::Result<T, EngineError> + Send + 'static,
    {
        let permit = self.acquire(op, guard).await?;
        self.execute(op, metric, permit, work).await
    }

    /// Run `work` in the background and post `wrap(epoch, result)` to `events`.
    pub fn dispatch<T, F, E, W>(
        &self,
        op: &'static str,
        metric: &'static str,
        guard: EpochGuard,
        work: F,
        events: mpsc::UnboundedSender<E>,
        wrap: W,
    ) -> JoinHandle<()>
    where
        T: Send + 'static,
        F: FnOnce() -> std::result::Result<T, EngineError> + Send + 'static,
        E: Send + 'static,
        W: FnOnce(u64, std::result::Result<T, EngineError>) -> E + Send + 'static,
    {
        let pool = self.clone();
        tokio::spawn(async move {
            let result = pool.run(op, metric, &guard, work).await;
            // Session loop gone: nothing left to tell
            let _ = events.send(wrap(guard.epoch(), result));
        })
    }

    /// Like `dispatch` for a batch, but workers are claimed in `jobs` order:
    /// job n never starts before job n-1 has a worker. Jobs still run
    /// concurrently and complete in any order.
    pub fn dispatch_ordered<T, F, E, W>(
        &self,
        op: &'static str,
        metric: &'static str,
        guard: EpochGuard,
        jobs: Vec<(F, W)>,
        events: mpsc::UnboundedSender<E>,
    ) -> JoinHandle<()>
    where
        T: Send + 'static,
        F: FnOnce() -> std::result::Result<T, EngineError> + Send + 'static,
        E: Send + 'static,
        W: FnOnce(u64, std::result::Result<T, EngineError>) -> E + Send + 'static,
    {
        let pool = self.clone();
        tokio::spawn(async move {
            let epoch = guard.epoch();
            for (work, wrap) in jobs {
                let permit = match pool.acquire(op, &guard).await {
                    Ok(permit) => permit,
                    Err(e) => {
                        let _ = events.send(wrap(epoch, Err(e)));
                        continue;
                    }
                };
                let pool = pool.clone();
                let events = events.clone();
                tokio::spawn(async move {
                    let result = pool.execute(op, metric, permit, work).await;
                    let _ = events.send(wrap(epoch, result));
                });
            }
        })
    }
}
