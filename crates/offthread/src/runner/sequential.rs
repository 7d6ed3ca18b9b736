//! Inline runner that never touches a thread.
//!
//! Implements the same contract as [`ThreadRunner`](crate::ThreadRunner)
//! but runs every job synchronously on the calling thread, in submission
//! order. Nothing is ever deferred, so tests built on it need no waiting
//! primitives.

use crate::error::{panic_message, OffloadError};
use crate::runner::{ResultStream, Runner};
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::pin::pin;
use std::task::{Context, Poll, Waker};

/// Runner that evaluates routines to completion on the spot.
///
/// `offload` just calls the function; `offload_many` yields results in
/// submission order; `start` and `run_to_completion` drive the routine
/// synchronously. Always idle.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialRunner;

impl SequentialRunner {
    /// Create a sequential runner.
    pub fn new() -> Self {
        SequentialRunner
    }
}

impl Runner for SequentialRunner {
    fn offload_many<T, F>(&self, funcs: Vec<F>) -> impl ResultStream<T> + Send
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        SequentialResults {
            funcs: funcs.into_iter(),
            _result: PhantomData,
        }
    }

    fn start<F>(&self, routine: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.run_to_completion(routine);
    }

    fn run_to_completion<F>(&self, routine: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        // Sequential jobs finish the moment they are awaited, so a routine
        // can never actually suspend here.
        let mut cx = Context::from_waker(Waker::noop());
        match pin!(routine).poll(&mut cx) {
            Poll::Ready(output) => output,
            Poll::Pending => {
                panic!("a routine suspended under the sequential runner; it may only await offloaded work")
            }
        }
    }

    fn is_idle(&self) -> bool {
        true
    }

    fn close(&self) {}
}

/// Stream yielding results synchronously, in submission order.
struct SequentialResults<T, F> {
    funcs: std::vec::IntoIter<F>,
    _result: PhantomData<fn() -> T>,
}

impl<T, F> ResultStream<T> for SequentialResults<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    fn next(&mut self) -> impl Future<Output = Option<Result<T, OffloadError>>> + Send {
        // Run the job before entering the future: the result is ready by
        // the time it is awaited, mirroring how the threaded runner
        // resumes with a finished operation in hand.
        let item = self.funcs.next().map(|func| {
            panic::catch_unwind(AssertUnwindSafe(func))
                .map_err(|payload| OffloadError::Panicked(panic_message(&*payload)))
        });
        async move { item }
    }
}
