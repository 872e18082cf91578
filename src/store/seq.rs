//! Block-based payment sequence allocation.
//!
//! Sequence numbers order payments and key the sequence index. To keep
//! transactional contention low on distributed backends, the persisted
//! upper bound on the `payments` scope is advanced one block at a time and
//! allocations are served from the in-process window. The persisted bound
//! never decreases, so numbers stay unique across restarts; a crash inside
//! a block leaks the unused remainder, which callers tolerate.

use std::sync::Mutex;

use crate::errors::PaymentError;
use crate::kernel::Kernel;
use crate::store::PAYMENTS_SCOPE;

/// How many sequence numbers each persisted reservation covers.
const SEQ_BLOCK_SIZE: u64 = 1000;

#[derive(Debug, Default)]
struct SeqWindow {
    /// Last allocated number.
    current: u64,
    /// Persisted upper bound of the reserved block.
    stored_upper: u64,
}

/// Allocates strictly monotone payment sequence numbers.
#[derive(Debug, Default)]
pub(crate) struct SequenceAllocator {
    window: Mutex<SeqWindow>,
}

impl SequenceAllocator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the next sequence number, refreshing the reserved block from
    /// the store when the window is exhausted. The first call initializes
    /// the window from the persisted bound.
    pub(crate) fn next(&self, kernel: &Kernel) -> Result<u64, PaymentError> {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());

        if window.current == window.stored_upper {
            let (persisted, new_upper) = kernel.update::<_, PaymentError, _>(|txn| {
                txn.create_scope(&[PAYMENTS_SCOPE])?;
                let persisted = txn.sequence(&[PAYMENTS_SCOPE])?;
                let new_upper = persisted + SEQ_BLOCK_SIZE;
                txn.set_sequence(&[PAYMENTS_SCOPE], new_upper)?;
                Ok((persisted, new_upper))
            })?;

            // Adopt the persisted position. For a lone process this is a
            // no-op past the first call (we wrote the bound ourselves);
            // with multiple processes it skips blocks reserved by others.
            window.current = persisted;
            window.stored_upper = new_upper;
        }

        window.current += 1;
        Ok(window.current)
    }
}
