//! Bounded worker pool for offloaded jobs.
//!
//! The pool accepts zero-argument jobs, runs them on a fixed set of worker
//! threads, and records each job's result or failure on its [`Operation`]
//! handle. No work stealing and no priorities: a single shared queue feeds
//! all workers in submission order.

pub mod operation;
mod worker;

pub use operation::{Operation, OperationId, Outcome};

use crate::error::OffloadError;
use crate::pool::operation::JobFn;
use crate::pool::worker::Worker;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// One queued job plus the handle its outcome is recorded on.
pub(crate) struct QueuedJob {
    pub(crate) op: Arc<Operation>,
    pub(crate) job: JobFn,
}

/// Internal atomic counters behind [`PoolStats`].
#[derive(Default)]
pub(crate) struct PoolCounters {
    pub(crate) submitted: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) failed: AtomicU64,
    pub(crate) cancelled: AtomicU64,
}

/// Pool statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Jobs accepted by `submit`
    pub submitted: u64,

    /// Jobs that ran to completion
    pub completed: u64,

    /// Jobs that panicked
    pub failed: u64,

    /// Jobs cancelled before they ran
    pub cancelled: u64,
}

/// Bounded pool of worker threads.
pub struct WorkerPool {
    /// Job intake; taken (and dropped) on shutdown to disconnect workers
    sender: Mutex<Option<Sender<QueuedJob>>>,

    /// Kept for draining still-queued jobs on shutdown
    receiver: Receiver<QueuedJob>,

    /// Worker handles, joined on shutdown
    workers: Mutex<Vec<Worker>>,

    /// Rejects submissions once set
    closed: AtomicBool,

    counters: Arc<PoolCounters>,

    size: usize,
}

impl WorkerPool {
    /// Create a pool with the given number of worker threads.
    /// If `threads` is 0, defaults to the number of CPU cores.
    pub fn new(threads: usize) -> Self {
        let size = if threads == 0 { num_cpus::get() } else { threads };
        let (sender, receiver) = unbounded();
        let counters = Arc::new(PoolCounters::default());

        let workers = (0..size)
            .map(|id| Worker::spawn(id, receiver.clone(), counters.clone()))
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            receiver,
            workers: Mutex::new(workers),
            closed: AtomicBool::new(false),
            counters,
            size,
        }
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get a statistics snapshot.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Whether the pool has been shut down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Schedule `job` for execution on some worker thread.
    ///
    /// Never blocks beyond queue admission. Fails with
    /// [`OffloadError::PoolClosed`] once the pool is shut down.
    pub fn submit<F>(&self, job: F) -> Result<Arc<Operation>, OffloadError>
    where
        F: FnOnce() -> Box<dyn Any + Send> + Send + 'static,
    {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(OffloadError::PoolClosed)?;

        let op = Arc::new(Operation::new());
        sender
            .send(QueuedJob {
                op: op.clone(),
                job: Box::new(job),
            })
            .map_err(|_| OffloadError::PoolClosed)?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(op)
    }

    /// Shut the pool down and join all workers.
    ///
    /// Stops accepting new work immediately. With `cancel_pending`, jobs
    /// still queued are completed as cancelled instead of running; either
    /// way this blocks until every worker thread has stopped. Idempotent.
    pub fn shutdown(&self, cancel_pending: bool) {
        self.closed.store(true, Ordering::Release);

        // Dropping the only sender disconnects the channel; workers drain
        // whatever they can still receive and then exit.
        let sender = self.sender.lock().take();
        drop(sender);

        if cancel_pending {
            // Race with the workers over the remaining queue; whichever side
            // receives a job owns its completion.
            while let Ok(item) = self.receiver.try_recv() {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                item.op.complete(Err(OffloadError::Cancelled));
            }
        }

        for worker in self.workers.lock().drain(..) {
            worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}
