//! Marshalling callbacks onto the main thread.
//!
//! Every host with a single-threaded event loop offers some way to post a
//! callback to run on that loop from another thread. The runner does not
//! care which mechanism it is; it only needs the small contract captured by
//! [`MainThreadDispatcher`]. [`QueuedDispatcher`] is a channel-backed
//! implementation for hosts (and tests) that pump the queue themselves.

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::thread::{self, ThreadId};

/// A callback posted for execution on the main thread.
pub type MainThreadCallback = Box<dyn FnOnce() + Send + 'static>;

/// Capability to run callbacks on the designated main thread.
///
/// Implementations must be callable from any thread. `post` must only
/// enqueue: the callback runs later, on the main thread, after the posting
/// thread's stack has unwound. Enqueueing is expected to be infallible.
pub trait MainThreadDispatcher: Send + Sync + 'static {
    /// Enqueue `callback` to run on the main thread.
    fn post(&self, callback: MainThreadCallback);

    /// Run all currently pending callbacks.
    ///
    /// Must be called from the main thread only. Hosts whose event loop
    /// delivers posted callbacks natively may implement this as a no-op;
    /// it is required only by blocking waits such as `run_to_completion`.
    fn pump(&self);
}

/// Channel-backed dispatcher.
///
/// `post` pushes onto an unbounded queue; `pump` drains it on the thread
/// that created the dispatcher. Callbacks posted while pumping are executed
/// in the same pump pass.
pub struct QueuedDispatcher {
    sender: Sender<MainThreadCallback>,
    receiver: Receiver<MainThreadCallback>,
    main_thread: ThreadId,
}

impl QueuedDispatcher {
    /// Create a dispatcher bound to the calling thread.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            main_thread: thread::current().id(),
        }
    }

    /// Number of callbacks currently queued.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl Default for QueuedDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MainThreadDispatcher for QueuedDispatcher {
    fn post(&self, callback: MainThreadCallback) {
        // Cannot fail: the receiver lives as long as self.
        let _ = self.sender.send(callback);
    }

    fn pump(&self) {
        debug_assert_eq!(
            thread::current().id(),
            self.main_thread,
            "pump must be called from the thread that created the dispatcher"
        );
        while let Ok(callback) = self.receiver.try_recv() {
            callback();
        }
    }
}
