//! Worker thread that executes queued jobs.
//!
//! Workers pull jobs off the shared channel until it disconnects, running
//! each job under `catch_unwind` so a panicking job becomes the operation's
//! failure outcome instead of killing the thread.

use crate::error::{panic_message, OffloadError};
use crate::pool::{PoolCounters, QueuedJob};
use crossbeam::channel::Receiver;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Worker thread handle.
pub(crate) struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn a worker over the shared job queue.
    pub(crate) fn spawn(id: usize, queue: Receiver<QueuedJob>, counters: Arc<PoolCounters>) -> Self {
        let handle = thread::Builder::new()
            .name(format!("offthread-worker-{}", id))
            .spawn(move || Self::run_loop(id, queue, counters))
            .expect("failed to spawn worker thread");

        Self {
            id,
            handle: Some(handle),
        }
    }

    /// Worker thread main loop; exits when the queue disconnects.
    fn run_loop(id: usize, queue: Receiver<QueuedJob>, counters: Arc<PoolCounters>) {
        while let Ok(item) = queue.recv() {
            if item.op.is_cancel_requested() {
                counters.cancelled.fetch_add(1, Ordering::Relaxed);
                item.op.complete(Err(OffloadError::Cancelled));
                continue;
            }

            let job = item.job;
            match panic::catch_unwind(AssertUnwindSafe(move || job())) {
                Ok(value) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                    item.op.complete(Ok(value));
                }
                Err(payload) => {
                    let message = panic_message(&*payload);
                    eprintln!(
                        "offthread: worker {}: operation {} panicked: {}",
                        id,
                        item.op.id().as_u64(),
                        message
                    );
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    item.op.complete(Err(OffloadError::Panicked(message)));
                }
            }
        }
    }

    /// Get the worker ID.
    #[allow(dead_code)]
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Wait for the worker thread to exit.
    pub(crate) fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("failed to join worker thread");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::operation::Operation;
    use crossbeam::channel::unbounded;
    use std::any::Any;

    fn boxed_job<T, F>(func: F) -> crate::pool::operation::JobFn
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        Box::new(move || Box::new(func()) as Box<dyn Any + Send>)
    }

    #[test]
    fn test_worker_runs_job() {
        let (tx, rx) = unbounded();
        let counters = Arc::new(PoolCounters::default());
        let worker = Worker::spawn(0, rx, counters.clone());

        let op = Arc::new(Operation::new());
        tx.send(QueuedJob {
            op: op.clone(),
            job: boxed_job(|| 21 * 2),
        })
        .unwrap();
        drop(tx);
        worker.join();

        assert!(op.is_done());
        let value = *op.take_outcome().unwrap().unwrap().downcast::<i32>().unwrap();
        assert_eq!(value, 42);
        assert_eq!(counters.completed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_worker_survives_panicking_job() {
        let (tx, rx) = unbounded();
        let counters = Arc::new(PoolCounters::default());
        let worker = Worker::spawn(0, rx, counters.clone());

        let bad = Arc::new(Operation::new());
        let good = Arc::new(Operation::new());
        tx.send(QueuedJob {
            op: bad.clone(),
            job: boxed_job(|| -> i32 { panic!("kaboom") }),
        })
        .unwrap();
        tx.send(QueuedJob {
            op: good.clone(),
            job: boxed_job(|| 1),
        })
        .unwrap();
        drop(tx);
        worker.join();

        assert_eq!(
            bad.take_outcome().unwrap().unwrap_err(),
            OffloadError::Panicked("kaboom".into())
        );
        assert!(good.is_done());
        assert_eq!(counters.failed.load(Ordering::Relaxed), 1);
        assert_eq!(counters.completed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_worker_skips_cancelled_job() {
        let (tx, rx) = unbounded();
        let counters = Arc::new(PoolCounters::default());

        let op = Arc::new(Operation::new());
        op.request_cancel();
        tx.send(QueuedJob {
            op: op.clone(),
            job: boxed_job(|| -> i32 { unreachable!("cancelled job must not run") }),
        })
        .unwrap();
        drop(tx);

        let worker = Worker::spawn(0, rx, counters.clone());
        worker.join();

        assert_eq!(
            op.take_outcome().unwrap().unwrap_err(),
            OffloadError::Cancelled
        );
        assert_eq!(counters.cancelled.load(Ordering::Relaxed), 1);
    }
}
