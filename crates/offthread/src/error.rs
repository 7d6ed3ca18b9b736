//! Error types for offloaded work.

use std::any::Any;

/// Errors surfaced to a routine at the point it awaits offloaded work.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OffloadError {
    /// The offloaded job panicked on its worker thread.
    #[error("offloaded job panicked: {0}")]
    Panicked(String),

    /// The job was cancelled before it started running.
    #[error("offloaded job was cancelled before it ran")]
    Cancelled,

    /// The worker pool has been shut down and no longer accepts work.
    #[error("worker pool is shut down")]
    PoolClosed,
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
