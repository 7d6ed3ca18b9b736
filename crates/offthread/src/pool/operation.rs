//! Operation handles for work submitted to the pool.

use crate::error::OffloadError;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Outcome of one offloaded job: the boxed return value, or the failure.
pub type Outcome = Result<Box<dyn Any + Send>, OffloadError>;

/// The job closure as stored by the pool.
pub(crate) type JobFn = Box<dyn FnOnce() -> Box<dyn Any + Send> + Send + 'static>;

type Listener = Box<dyn FnOnce() + Send + 'static>;

/// Unique identifier for an [`Operation`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct OperationId(u64);

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

impl OperationId {
    /// Generate a new unique OperationId.
    pub fn new() -> Self {
        OperationId(NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for one unit of work submitted to the pool.
///
/// Transitions from pending to exactly one of completed, failed, or
/// cancelled; the transition sets the outcome and fires the completion
/// listener at most once.
pub struct Operation {
    /// Unique identifier
    id: OperationId,

    /// The outcome, set exactly once on completion
    outcome: Mutex<Option<Outcome>>,

    /// Whether the outcome has been set
    done: AtomicBool,

    /// Best-effort cancellation request flag
    cancel_requested: AtomicBool,

    /// Completion listener, fired once after the outcome is set
    listener: Mutex<Option<Listener>>,
}

impl Operation {
    pub(crate) fn new() -> Self {
        Self {
            id: OperationId::new(),
            outcome: Mutex::new(None),
            done: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            listener: Mutex::new(None),
        }
    }

    /// Get this operation's unique ID.
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Whether the outcome has been set.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Request cancellation.
    ///
    /// Best-effort: a job that is already running (or already finished) is
    /// unaffected. A job still queued will be completed as cancelled
    /// instead of running.
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Register a completion listener.
    ///
    /// Invoked at most once, from whichever thread sets the outcome. If the
    /// operation is already done, the listener runs immediately on the
    /// registering thread.
    pub fn on_done<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut slot = self.listener.lock();
            debug_assert!(slot.is_none(), "operation already has a completion listener");
            *slot = Some(Box::new(listener));
        }
        // The outcome may have been set between registration and here; the
        // take() under the lock guarantees at most one invocation either way.
        if self.done.load(Ordering::Acquire) {
            if let Some(listener) = self.listener.lock().take() {
                listener();
            }
        }
    }

    /// Set the outcome and fire the listener.
    pub(crate) fn complete(&self, outcome: Outcome) {
        {
            let mut slot = self.outcome.lock();
            debug_assert!(slot.is_none(), "operation completed twice");
            *slot = Some(outcome);
        }
        self.done.store(true, Ordering::Release);
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener();
        }
    }

    /// Remove and return the outcome, if set.
    pub(crate) fn take_outcome(&self) -> Option<Outcome> {
        self.outcome.lock().take()
    }
}
