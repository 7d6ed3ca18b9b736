//! A batch of in-flight operations tied to one suspension point.

use crate::pool::{Operation, Outcome};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::Waker;

/// Unique identifier for a [`WorkBatch`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BatchId(u64);

static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(1);

impl BatchId {
    /// Generate a new unique BatchId.
    pub fn new() -> Self {
        BatchId(NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

/// A set of operations submitted together at one suspension point.
///
/// The batch tracks which operations have finished and holds the claim: the
/// waker of the routine suspended on it, if any. Completion listeners race
/// to [`take_claimed`](WorkBatch::take_claimed); exactly one wins and
/// triggers exactly one resume, no matter how many operations finish
/// back-to-back on different worker threads.
pub struct WorkBatch {
    id: BatchId,

    /// Remaining operations; only ever shrinks
    ops: Mutex<Vec<Arc<Operation>>>,

    /// The pending wakeup target, if a routine is suspended on this batch
    claim: Mutex<Option<Waker>>,
}

impl WorkBatch {
    /// Create a batch from operations already submitted to the pool.
    pub fn new(ops: Vec<Arc<Operation>>) -> Self {
        Self {
            id: BatchId::new(),
            ops: Mutex::new(ops),
            claim: Mutex::new(None),
        }
    }

    /// Get this batch's unique ID.
    pub fn id(&self) -> BatchId {
        self.id
    }

    /// Number of operations not yet drained.
    pub fn remaining(&self) -> usize {
        self.ops.lock().len()
    }

    /// Whether all operations have been drained.
    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }

    /// Snapshot of the current operation handles.
    pub fn operations(&self) -> Vec<Arc<Operation>> {
        self.ops.lock().clone()
    }

    /// True iff at least one contained operation has finished.
    pub fn is_ready(&self) -> bool {
        self.ops.lock().iter().any(|op| op.is_done())
    }

    /// Remove and return the outcome of every finished operation,
    /// leaving unfinished ones in place.
    pub fn drain_ready(&self) -> Vec<Outcome> {
        let mut ops = self.ops.lock();
        let mut ready = Vec::new();
        ops.retain(|op| {
            if op.is_done() {
                ready.push(
                    op.take_outcome()
                        .expect("finished operation lost its outcome"),
                );
                false
            } else {
                true
            }
        });
        ready
    }

    /// Record `waker` as the pending wakeup target if none is recorded.
    ///
    /// Returns whether the claim succeeded.
    pub fn try_claim_for_wakeup(&self, waker: &Waker) -> bool {
        let mut claim = self.claim.lock();
        if claim.is_none() {
            *claim = Some(waker.clone());
            true
        } else {
            false
        }
    }

    /// Read and clear the recorded wakeup target.
    ///
    /// Of N concurrent callers, exactly one receives `Some`. This is what
    /// keeps two operations finishing in the same race window from
    /// resuming the owning routine twice.
    pub fn take_claimed(&self) -> Option<Waker> {
        self.claim.lock().take()
    }

    /// Cancel all remaining operations and clear the set.
    ///
    /// Must only be called when no routine is suspended on this batch.
    pub fn shutdown(&self) {
        debug_assert!(
            self.claim.lock().is_none(),
            "batch shut down while a routine is still claimed on it"
        );
        for op in self.ops.lock().drain(..) {
            op.request_cancel();
        }
    }
}
