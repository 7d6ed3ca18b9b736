//! Offload blocking work from a single-threaded event loop.
//!
//! Many interactive hosts drive everything from one main thread and forbid
//! touching application state anywhere else, yet still need to run slow or
//! CPU-bound calls without freezing. This crate provides:
//! - Suspendable routines driven step-by-step on the main thread
//! - A bounded worker pool executing offloaded jobs
//! - A cross-thread completion bridge that delivers exactly one resume per
//!   suspension, no matter how many workers race to report results
//! - A sequential twin of the scheduler for deterministic, thread-free tests
//!
//! The host only has to supply a [`MainThreadDispatcher`]: a way to post a
//! callback onto its event loop from another thread.
//!
//! ```no_run
//! use offthread::{QueuedDispatcher, Runner, ThreadRunner};
//! use std::sync::Arc;
//!
//! let runner = ThreadRunner::new(0, Arc::new(QueuedDispatcher::new()));
//! let r = runner.clone();
//! runner.start(async move {
//!     // Runs on a worker thread; the main thread stays responsive.
//!     let report = r.offload(|| expensive_analysis()).await.unwrap();
//!     // Back on the main thread: safe to touch host state.
//!     show(report);
//! });
//! # fn expensive_analysis() -> u32 { 0 }
//! # fn show(_: u32) {}
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod dispatch;
pub mod error;
pub mod pool;
pub mod runner;
pub mod testing;

pub use dispatch::{MainThreadCallback, MainThreadDispatcher, QueuedDispatcher};
pub use error::OffloadError;
pub use pool::{Operation, OperationId, Outcome, PoolStats, WorkerPool};
pub use runner::{BatchId, ResultStream, Runner, SequentialRunner, ThreadRunner, WorkBatch};
pub use testing::AsyncTester;
