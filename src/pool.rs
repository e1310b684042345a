use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use fieldx::fxstruct;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::ConfigError;
use crate::error::SubmitError;
use crate::traits::LoadExecutor;
use crate::types::TaskFuture;

/// Fixed-size pool of load workers on top of a tokio runtime.
///
/// At most `workers` tasks run at a time, up to `queue_capacity` more wait for a free worker. Anything beyond that is
/// rejected. The pool doesn't own the runtime, only the right to spawn on it.
///
/// ```ignore
/// let pool = WorkerPool::builder()
///     .runtime(Handle::current())
///     .workers(8)
///     .queue_capacity(100)
///     .build()?;
/// ```
#[fxstruct(sync, rc, no_new, default(off), builder)]
pub struct WorkerPool {
    #[fieldx(get(clone), builder(required))]
    runtime: Handle,

    #[fieldx(get(copy), default(8))]
    workers: usize,

    #[fieldx(get(copy), default(1_000))]
    queue_capacity: usize,

    #[fieldx(lazy, private, get(clone), builder(off))]
    permits: Arc<Semaphore>,

    // Queued plus running tasks.
    #[fieldx(builder(off), default(Arc::new(AtomicUsize::new(0))))]
    pending: Arc<AtomicUsize>,

    #[fieldx(builder(off), default(AtomicBool::new(false)))]
    shut_down: AtomicBool,
}

// Frees a pool slot when its task finishes, is aborted or is dropped unstarted.
struct PoolSlot(Arc<AtomicUsize>);

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl WorkerPool {
    fn build_permits(&self) -> Arc<Semaphore> {
        Arc::new(Semaphore::new(self.workers()))
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.workers() + self.queue_capacity()
    }

    /// Number of tasks either running or waiting for a worker.
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl LoadExecutor for WorkerPool {
    fn submit(&self, task: TaskFuture) -> Result<AbortHandle, SubmitError> {
        if self.is_shut_down() {
            return Err(SubmitError::ShutDown);
        }

        let capacity = self.capacity();
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < capacity).then_some(n + 1))
            .map_err(|_| SubmitError::Saturated { capacity })?;

        let slot = PoolSlot(Arc::clone(&self.pending));
        let permits = self.permits();
        let handle = self.runtime().spawn(async move {
            let _slot = slot;
            // The semaphore is closed on shutdown; queued tasks are dropped without running.
            let Ok(_permit) = permits.acquire_owned().await
            else {
                return;
            };
            task.await;
        });

        Ok(handle.abort_handle())
    }

    fn ensure_ready(&self) -> Result<(), ConfigError> {
        if self.is_shut_down() {
            Err(ConfigError::ExecutorShutDown)
        }
        else if self.workers() == 0 {
            Err(ConfigError::NoWorkers)
        }
        else {
            Ok(())
        }
    }

    fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            debug!(pending = self.pending(), "Shutting down worker pool");
            self.permits().close();
        }
    }
}
