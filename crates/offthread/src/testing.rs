//! Test harness helper.
//!
//! Driving a [`ThreadRunner`] in a test means pumping its dispatcher until
//! all offloaded work has drained. [`AsyncTester`] wraps that loop with a
//! timeout so a stuck routine fails the test instead of hanging it.

use crate::dispatch::QueuedDispatcher;
use crate::runner::{Runner, ThreadRunner};
use std::future::Future;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Default time to wait for the runner to become idle.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Environment variable overriding the idle-wait timeout, in seconds.
/// Useful under debuggers or on slow CI machines.
const TIMEOUT_ENV_VAR: &str = "OFFTHREAD_TEST_TIMEOUT";

fn default_timeout() -> Duration {
    std::env::var(TIMEOUT_ENV_VAR)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TIMEOUT)
}

/// Helper that starts routines and waits for the runner to go idle.
///
/// Note that waiting for idle is not the same as waiting for one routine:
/// if the started routine starts further routines, this waits for all of
/// them.
pub struct AsyncTester {
    runner: ThreadRunner,
    timeout: Duration,
}

impl AsyncTester {
    /// Create a tester with its own runner over a queued dispatcher.
    /// If `threads` is 0, defaults to the number of CPU cores.
    pub fn new(threads: usize) -> Self {
        let dispatcher = Arc::new(QueuedDispatcher::new());
        Self::from_runner(ThreadRunner::new(threads, dispatcher))
    }

    /// Wrap an existing runner.
    pub fn from_runner(runner: ThreadRunner) -> Self {
        Self {
            runner,
            timeout: default_timeout(),
        }
    }

    /// Replace the idle-wait timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// A clone of the underlying runner, for handing to routines.
    pub fn runner(&self) -> ThreadRunner {
        self.runner.clone()
    }

    /// Start `routine` and pump until the runner reports idle.
    pub fn start_and_wait<F>(&self, routine: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runner.start(routine);
        self.wait_idle();
    }

    /// Pump the dispatcher until the runner reports idle.
    ///
    /// Panics if the runner is still busy after the timeout.
    pub fn wait_idle(&self) {
        let deadline = Instant::now() + self.timeout;
        loop {
            self.runner.dispatcher().pump();
            if self.runner.is_idle() {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "timed out after {:?} waiting for the runner to become idle",
                self.timeout
            );
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Shut the runner down.
    pub fn close(&self) {
        self.runner.close();
    }
}
