//! Thread-pool backed runner: the scheduling core.
//!
//! Routines are futures stored in a registry and polled only on the main
//! thread. When a routine awaits offloaded work it suspends on a
//! [`WorkBatch`]; the batch holds the routine's waker as the claim. When
//! any operation in the batch finishes, its worker races the other workers
//! for the claim, and the single winner posts a resume through the
//! main-thread dispatcher. The resumed routine drains every operation that
//! finished in the meantime, so no result is lost or delivered twice.

use crate::dispatch::MainThreadDispatcher;
use crate::error::{panic_message, OffloadError};
use crate::pool::{PoolStats, WorkerPool};
use crate::runner::batch::{BatchId, WorkBatch};
use crate::runner::{ResultStream, Runner};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// How often `run_to_completion` pumps the dispatcher while waiting.
const PUMP_INTERVAL: Duration = Duration::from_millis(1);

/// Unique identifier for a routine being driven.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct RoutineId(u64);

static NEXT_ROUTINE_ID: AtomicU64 = AtomicU64::new(1);

impl RoutineId {
    fn new() -> Self {
        RoutineId(NEXT_ROUTINE_ID.fetch_add(1, Ordering::Relaxed))
    }

    fn as_u64(self) -> u64 {
        self.0
    }
}

type RoutineFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// State shared between the runner, its wakers, and posted callbacks.
struct RunnerShared {
    pool: WorkerPool,

    dispatcher: Arc<dyn MainThreadDispatcher>,

    /// The thread that created the runner; the only thread allowed to
    /// drive routines.
    main_thread: ThreadId,

    /// Suspended (and not-yet-first-polled) routines. Touched only on the
    /// main thread.
    routines: Mutex<FxHashMap<RoutineId, RoutineFuture>>,

    /// Batches with operations in flight, for the idle query and for
    /// teardown on close. Touched only on the main thread.
    active_batches: Mutex<FxHashMap<BatchId, Arc<WorkBatch>>>,
}

impl RunnerShared {
    fn assert_main_thread(&self) {
        assert_eq!(
            thread::current().id(),
            self.main_thread,
            "routines must be driven from the thread that created the runner"
        );
    }

    /// Resume (or first start) a routine: poll it once on the main thread.
    ///
    /// A pending routine goes back into the registry; its batch-wait
    /// future has claimed its waker, and a later completion notification
    /// will post another drive. A finished routine is dropped. A panicking
    /// fire-and-forget routine is logged, since no caller is waiting.
    fn drive(self: Arc<Self>, id: RoutineId) {
        self.assert_main_thread();

        let Some(mut routine) = self.routines.lock().remove(&id) else {
            // Already finished, or torn down by close(); stale wakeups are
            // expected and harmless.
            return;
        };

        let waker = Waker::from(Arc::new(RoutineWaker {
            routine: id,
            shared: Arc::downgrade(&self),
        }));
        let mut cx = Context::from_waker(&waker);

        match panic::catch_unwind(AssertUnwindSafe(|| routine.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) => {
                self.routines.lock().insert(id, routine);
            }
            Ok(Poll::Ready(())) => {}
            Err(payload) => {
                eprintln!(
                    "offthread: routine {} panicked: {}",
                    id.as_u64(),
                    panic_message(&*payload)
                );
            }
        }
    }
}

/// Waker for one routine. Waking posts a resume through the dispatcher;
/// the routine is never polled on the waking thread.
struct RoutineWaker {
    routine: RoutineId,
    shared: Weak<RunnerShared>,
}

impl Wake for RoutineWaker {
    fn wake(self: Arc<Self>) {
        if let Some(shared) = self.shared.upgrade() {
            let id = self.routine;
            let target = Arc::downgrade(&shared);
            shared.dispatcher.post(Box::new(move || {
                if let Some(shared) = target.upgrade() {
                    shared.drive(id);
                }
            }));
        }
    }
}

/// Runner that executes offloaded work on a bounded thread pool and
/// resumes routines on the thread that created it.
///
/// Cheap to clone; clones share the pool, dispatcher, and routine
/// registry. Call [`close`](Runner::close) to tear everything down.
#[derive(Clone)]
pub struct ThreadRunner {
    shared: Arc<RunnerShared>,
}

impl ThreadRunner {
    /// Create a runner with the given pool width, bound to the calling
    /// thread. If `threads` is 0, defaults to the number of CPU cores.
    pub fn new(threads: usize, dispatcher: Arc<dyn MainThreadDispatcher>) -> Self {
        Self {
            shared: Arc::new(RunnerShared {
                pool: WorkerPool::new(threads),
                dispatcher,
                main_thread: thread::current().id(),
                routines: Mutex::new(FxHashMap::default()),
                active_batches: Mutex::new(FxHashMap::default()),
            }),
        }
    }

    /// Number of worker threads in the pool.
    pub fn pool_size(&self) -> usize {
        self.shared.pool.size()
    }

    /// Statistics snapshot of the underlying pool.
    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    /// The dispatcher this runner posts resumptions through.
    pub fn dispatcher(&self) -> &Arc<dyn MainThreadDispatcher> {
        &self.shared.dispatcher
    }
}

impl Runner for ThreadRunner {
    fn offload_many<T, F>(&self, funcs: Vec<F>) -> impl ResultStream<T> + Send
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        ParallelResults {
            shared: Arc::clone(&self.shared),
            pending: funcs.into_iter(),
            batch: None,
            buffered: VecDeque::new(),
            _result: PhantomData,
        }
    }

    fn start<F>(&self, routine: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shared.assert_main_thread();
        let id = RoutineId::new();
        self.shared.routines.lock().insert(id, Box::pin(routine));
        Arc::clone(&self.shared).drive(id);
    }

    fn run_to_completion<F>(&self, routine: F) -> F::Output
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.shared.assert_main_thread();

        fn resolve<T>(result: thread::Result<T>) -> T {
            match result {
                Ok(value) => value,
                Err(payload) => panic::resume_unwind(payload),
            }
        }

        let slot: Arc<Mutex<Option<thread::Result<F::Output>>>> = Arc::new(Mutex::new(None));
        let out = Arc::clone(&slot);
        let guarded = CatchUnwind {
            inner: Box::pin(routine),
        };
        self.start(async move {
            *out.lock() = Some(guarded.await);
        });

        loop {
            // A routine that never suspends has already finished inside
            // start(); no pumping needed then.
            if let Some(result) = slot.lock().take() {
                return resolve(result);
            }
            self.shared.dispatcher.pump();
            if let Some(result) = slot.lock().take() {
                return resolve(result);
            }
            thread::sleep(PUMP_INTERVAL);
        }
    }

    fn is_idle(&self) -> bool {
        self.shared.active_batches.lock().is_empty()
    }

    fn close(&self) {
        self.shared.assert_main_thread();

        // Drop pending wakeups first so batch teardown sees no claim.
        for (_, batch) in self.shared.active_batches.lock().drain() {
            batch.take_claimed();
            batch.shutdown();
        }
        self.shared.routines.lock().clear();
        self.shared.pool.shutdown(true);
    }
}

/// Pin-agnostic panic-catching adapter used by `run_to_completion`.
struct CatchUnwind<T> {
    inner: Pin<Box<dyn Future<Output = T> + Send>>,
}

impl<T> Future for CatchUnwind<T> {
    type Output = thread::Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = &mut self.get_mut().inner;
        match panic::catch_unwind(AssertUnwindSafe(|| inner.as_mut().poll(cx))) {
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(payload)),
        }
    }
}

/// Stream over results of one `offload_many` call.
///
/// Jobs are submitted in batches of `max(pool_size / 2, 1)` instead of all
/// at once: submitting everything up front would let one caller fill the
/// queue and stall every other routine's offloaded work until it finished.
/// Each batch is fully drained before the next one is submitted, trading a
/// little latency for a fair share of the pool.
struct ParallelResults<T, F> {
    shared: Arc<RunnerShared>,
    pending: std::vec::IntoIter<F>,
    batch: Option<Arc<WorkBatch>>,
    buffered: VecDeque<crate::pool::Outcome>,
    _result: PhantomData<fn() -> T>,
}

impl<T, F> ParallelResults<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    /// Submit the next slice of jobs and make their batch current.
    fn submit_batch(&mut self) {
        let batch_size = (self.shared.pool.size() / 2).max(1);

        let mut ops = Vec::with_capacity(batch_size);
        for func in self.pending.by_ref().take(batch_size) {
            match self
                .shared
                .pool
                .submit(move || Box::new(func()) as Box<dyn Any + Send>)
            {
                Ok(op) => ops.push(op),
                Err(err) => self.buffered.push_back(Err(err)),
            }
        }
        if ops.is_empty() {
            return;
        }

        let batch = Arc::new(WorkBatch::new(ops));
        for op in batch.operations() {
            let batch = Arc::clone(&batch);
            op.on_done(move || {
                // Completion listeners race for the claim; the single
                // winner triggers the single resume.
                if let Some(waker) = batch.take_claimed() {
                    waker.wake();
                }
            });
        }

        self.shared
            .active_batches
            .lock()
            .insert(batch.id(), Arc::clone(&batch));
        self.batch = Some(batch);
    }

    /// Tear down the current batch, cancelling whatever is still in it.
    fn retire_batch(&mut self) {
        if let Some(batch) = self.batch.take() {
            batch.shutdown();
            self.shared.active_batches.lock().remove(&batch.id());
        }
    }
}

impl<T, F> ResultStream<T> for ParallelResults<T, F>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    fn next(&mut self) -> impl Future<Output = Option<Result<T, OffloadError>>> + Send {
        async move {
            loop {
                if let Some(outcome) = self.buffered.pop_front() {
                    return Some(outcome.map(downcast_value::<T>));
                }

                let wait_on = match &self.batch {
                    Some(batch) if !batch.is_empty() => Arc::clone(batch),
                    _ => {
                        self.retire_batch();
                        if self.pending.len() == 0 {
                            return None;
                        }
                        self.submit_batch();
                        continue;
                    }
                };

                BatchWait { batch: Arc::clone(&wait_on) }.await;
                // Take everything that finished as of this resume, not
                // just the operation that triggered it.
                self.buffered.extend(wait_on.drain_ready());
            }
        }
    }
}

impl<T, F> Drop for ParallelResults<T, F> {
    fn drop(&mut self) {
        // Consumer stopped early (or the routine is being torn down):
        // cancel what has not run and never submit the rest.
        if let Some(batch) = self.batch.take() {
            batch.shutdown();
            self.shared.active_batches.lock().remove(&batch.id());
        }
    }
}

fn downcast_value<T: 'static>(boxed: Box<dyn Any + Send>) -> T {
    *boxed
        .downcast::<T>()
        .expect("offloaded job produced a value of an unexpected type")
}

/// Future that resolves once any operation in the batch has finished.
///
/// Readiness is checked before claiming, so a batch with results already
/// in hand resumes the routine in the same driving step with no thread
/// hop.
struct BatchWait {
    batch: Arc<WorkBatch>,
}

impl Future for BatchWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.batch.is_ready() {
            return Poll::Ready(());
        }

        self.batch.try_claim_for_wakeup(cx.waker());

        // An operation may have finished between the readiness check and
        // the claim, in which case its listener saw an empty claim slot
        // and no wakeup is coming. Re-check; winning the claim back means
        // no notification was sent and it is safe to resume right here.
        if self.batch.is_ready() {
            if self.batch.take_claimed().is_some() {
                return Poll::Ready(());
            }
            // A notifier took the claim; its wakeup is already on the way.
        }
        Poll::Pending
    }
}
