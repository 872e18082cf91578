//! Write coalescing.
//!
//! Concurrent mutations are funneled through a [`Batcher`]: callers enqueue
//! their transaction closure, the first caller to arrive drains the queue and
//! executes everything it finds inside one combined transaction. When the
//! combined transaction fails, each closure is re-run in its own transaction
//! so one caller's error never poisons the others, with a single automatic
//! retry when the backend reports contention. The observable outcome is the
//! same as running every closure serially.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use log::debug;

use super::{Kernel, KernelError, WriteTxn};

/// A batched transaction closure.
///
/// Closures must be re-runnable: a combined batch that fails is retried
/// closure by closure. Operation results travel through state captured by
/// the closure, not through the return value.
pub type BatchOp<E> = Arc<dyn Fn(&mut dyn WriteTxn) -> Result<(), E> + Send + Sync>;

/// Error type usable with the batcher.
pub trait BatchableError: From<KernelError> + Clone + Send + 'static {
    /// True when the error is transient backend contention.
    fn is_conflict(&self) -> bool;
}

impl BatchableError for KernelError {
    fn is_conflict(&self) -> bool {
        matches!(self, KernelError::Conflict)
    }
}

struct PendingOp<E> {
    op: BatchOp<E>,
    done: mpsc::Sender<Result<(), E>>,
}

struct BatchState<E> {
    pending: Vec<PendingOp<E>>,
    flushing: bool,
}

/// Coalesces concurrently submitted write closures into shared transactions.
pub struct Batcher<E> {
    kernel: Kernel,
    state: Mutex<BatchState<E>>,
}

impl<E: BatchableError> Batcher<E> {
    pub fn new(kernel: Kernel) -> Self {
        Self {
            kernel,
            state: Mutex::new(BatchState {
                pending: Vec::new(),
                flushing: false,
            }),
        }
    }

    /// Executes `op` inside a write transaction, possibly sharing the
    /// transaction with other callers. Blocks until the result is known.
    pub fn execute(&self, op: BatchOp<E>) -> Result<(), E> {
        let (done, result) = mpsc::channel();

        let leader = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.pending.push(PendingOp { op, done });
            if state.flushing {
                false
            } else {
                state.flushing = true;
                true
            }
        };

        if leader {
            loop {
                let batch = {
                    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                    if state.pending.is_empty() {
                        state.flushing = false;
                        break;
                    }
                    std::mem::take(&mut state.pending)
                };
                self.run_batch(batch);
            }
        }

        result
            .recv()
            .map_err(|_| E::from(KernelError::Io("batch executor dropped its result".into())))?
    }

    fn run_batch(&self, batch: Vec<PendingOp<E>>) {
        if let [single] = batch.as_slice() {
            let res = self.run_solo(&single.op);
            let _ = single.done.send(res);
            return;
        }

        let combined: Result<(), E> = self.kernel.update(|txn| {
            for pending in &batch {
                (pending.op)(txn)?;
            }
            Ok(())
        });

        match combined {
            Ok(()) => {
                for pending in &batch {
                    let _ = pending.done.send(Ok(()));
                }
            }
            Err(_) => {
                debug!(
                    "combined batch of {} transactions failed, re-running each solo",
                    batch.len()
                );
                for pending in &batch {
                    let res = self.run_solo(&pending.op);
                    let _ = pending.done.send(res);
                }
            }
        }
    }

    fn run_solo(&self, op: &BatchOp<E>) -> Result<(), E> {
        let first = self.kernel.update(|txn| op(txn));
        match first {
            Err(ref e) if e.is_conflict() => {
                debug!("transaction hit backend contention, retrying once");
                self.kernel.update(|txn| op(txn))
            }
            other => other,
        }
    }
}

impl<E> std::fmt::Debug for Batcher<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batcher").finish_non_exhaustive()
    }
}
