//! Bounded worker pool for background document jobs.
//!
//! Jobs are Tokio tasks gated by a semaphore, so at most `size` run at once
//! and submission never blocks. The pool internals are created on first use
//! and detached by [`WorkerPool::shutdown`]; a later submit starts a fresh set.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use kbforge_shared::{KbForgeError, Result};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

pub struct WorkerPool {
    size: usize,
    inner: Mutex<Option<PoolInner>>,
    in_flight: Arc<AtomicUsize>,
}

struct PoolInner {
    permits: Arc<Semaphore>,
    // Every job holds a clone; the receiver sees `None` once all are dropped.
    drain_tx: mpsc::Sender<()>,
    drain_rx: mpsc::Receiver<()>,
}

impl PoolInner {
    fn new(size: usize) -> Self {
        let (drain_tx, drain_rx) = mpsc::channel(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            drain_tx,
            drain_rx,
        }
    }
}

impl WorkerPool {
    /// A pool running at most `size` jobs concurrently (minimum 1).
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            inner: Mutex::new(None),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs submitted and not yet finished (queued or running).
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Queue `job` and return immediately. Must be called within a Tokio runtime.
    pub fn submit<F>(&self, job: F) -> JobHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (permits, drain_tx) = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let inner = inner.get_or_insert_with(|| {
                debug!(size = self.size, "starting worker pool");
                PoolInner::new(self.size)
            });
            (inner.permits.clone(), inner.drain_tx.clone())
        };

        let in_flight = InFlight::enter(self.in_flight.clone());
        let handle = tokio::spawn(async move {
            let _in_flight = in_flight;
            let _drain = drain_tx;
            let _permit = permits.acquire_owned().await;
            job.await
        });

        JobHandle { handle }
    }

    /// Detach the current pool internals.
    ///
    /// With `wait`, resolves once every job submitted before the call has
    /// finished. Without it, returns at once and those jobs keep running.
    pub async fn shutdown(&self, wait: bool) {
        let detached = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let Some(PoolInner {
            drain_tx,
            mut drain_rx,
            ..
        }) = detached
        else {
            return;
        };
        drop(drain_tx);

        if wait {
            debug!(in_flight = self.in_flight(), "draining worker pool");
            while drain_rx.recv().await.is_some() {}
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Decrements the in-flight counter when the job ends, including on panic.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle to a submitted job.
#[derive(Debug)]
pub struct JobHandle<T> {
    handle: JoinHandle<T>,
}

impl<T> JobHandle<T> {
    /// Wait for the job's result. A panicked job is an executor error.
    pub async fn wait(self) -> Result<T> {
        self.handle.await.map_err(|e| {
            if e.is_panic() {
                KbForgeError::Executor("job panicked".into())
            } else {
                KbForgeError::Executor(format!("job aborted: {e}"))
            }
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
