//! The suspend/resume contract and its two implementations.
//!
//! [`Runner`] is the surface an application sees: offload one call, offload
//! many calls as a lazy stream, start a routine fire-and-forget, or start
//! one and block until it finishes. [`ThreadRunner`] executes offloaded
//! work on a bounded pool and resumes routines on the main thread;
//! [`SequentialRunner`] implements the identical contract with no threads
//! at all, so test suites stay deterministic.

mod batch;
mod sequential;
mod thread;

pub use batch::{BatchId, WorkBatch};
pub use sequential::SequentialRunner;
pub use thread::ThreadRunner;

use crate::error::OffloadError;
use std::future::Future;

/// Lazy stream of offloaded-job results.
///
/// Each call to [`next`](ResultStream::next) yields one result as it
/// becomes ready, or `None` once every job has been accounted for.
/// Dropping the stream early cancels work that has not run yet.
pub trait ResultStream<T> {
    /// Wait for and return the next ready result.
    fn next(&mut self) -> impl Future<Output = Option<Result<T, OffloadError>>> + Send;
}

/// A scheduler for suspendable routines that offload work to threads.
///
/// A routine is a future driven step-by-step on the designated main
/// thread: it runs until it awaits offloaded work, control returns to the
/// host event loop, and the routine resumes on the main thread once a
/// result is ready. Routines must be `Send` because a suspended routine is
/// held by state that worker threads observe, but it is only ever *polled*
/// on the main thread.
pub trait Runner {
    /// Run the given jobs on the pool, yielding results as they get ready.
    ///
    /// Results arrive in completion order, not submission order. Jobs are
    /// fed to the pool in bounded batches so one caller cannot monopolize
    /// the workers; stopping consumption early cancels whatever has not
    /// run yet.
    fn offload_many<T, F>(&self, funcs: Vec<F>) -> impl ResultStream<T> + Send
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static;

    /// Run `func` on the pool and suspend until its result is ready.
    ///
    /// The single-job special case of
    /// [`offload_many`](Runner::offload_many): the calling routine yields
    /// control while the job runs and resumes with its return value, or
    /// with the failure if the job panicked.
    fn offload<T, F>(&self, func: F) -> impl Future<Output = Result<T, OffloadError>> + Send
    where
        Self: Sync,
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        async move {
            let mut results = self.offload_many(vec![func]);
            match results.next().await {
                Some(result) => result,
                None => unreachable!("a one-job stream yields exactly one result"),
            }
        }
    }

    /// Begin driving `routine`, returning without waiting for it.
    ///
    /// Must be called from the main thread. A panic inside a
    /// fire-and-forget routine is logged, not re-raised: there is no
    /// caller stack waiting for it.
    fn start<F>(&self, routine: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Drive `routine` to completion, blocking the calling thread.
    ///
    /// Pumps the host dispatcher while waiting, so posted wakeups still
    /// get through. A last resort for contexts where the host loop is not
    /// running yet (start-up, tests); a panicking routine is re-raised
    /// here.
    fn run_to_completion<F>(&self, routine: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static;

    /// True iff no batch of offloaded work is in flight.
    fn is_idle(&self) -> bool;

    /// Shut down, cancelling in-flight work.
    ///
    /// Safe to call with routines still suspended; their batches are torn
    /// down and the pool is joined before this returns.
    fn close(&self);

    /// Wrap a routine factory into a plain callback that starts a fresh
    /// routine each time it is invoked.
    ///
    /// Useful for connecting host-UI signals to async logic without
    /// boilerplate.
    fn to_sync<M, F>(&self, make_routine: M) -> impl Fn() + Send + 'static
    where
        Self: Clone + Send + Sync + 'static,
        M: Fn() -> F + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let runner = self.clone();
        move || runner.start(make_routine())
    }
}
