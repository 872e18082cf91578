//! Persistent control store for outgoing multi-path payments.
//!
//! This crate owns the lifecycle of a node's outgoing payments: the HTLC
//! shards attempted for each payment, the derived payment status, and the
//! invariants that guarantee a node never double-pays, never sends more
//! than the user authorized, and can recover in-flight payments across a
//! restart. The payment router consults the store before, during and
//! after each shard is dispatched; the store itself never touches the
//! wire.
//!
//! # Architecture
//!
//! - [`kernel`]: object-safe transactional abstraction over an embedded
//!   storage engine with hierarchical scopes, plus the write coalescer.
//!   Ships an in-memory reference backend and a sled-backed durable one.
//! - [`core`]: pure domain model with payment snapshots, HTLC outcomes as
//!   a sum type, route accessors and the status state machine.
//! - [`store`]: the [`PaymentStore`] facade composing both inside one
//!   transaction per operation, the entity codec, the block sequence
//!   allocator and the query/delete surfaces.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use payment_control::{MemoryBackend, PaymentStore};
//!
//! let store = PaymentStore::new(Arc::new(MemoryBackend::new())).unwrap();
//! ```

pub mod core;
pub mod errors;
pub mod kernel;
pub mod primitives;
pub mod store;

pub use crate::core::payment::{
    FailureReason, HtlcAttempt, HtlcAttemptInfo, HtlcFailInfo, HtlcFailReason, HtlcOutcome,
    HtlcSettleInfo, Payment, PaymentCreationInfo, SessionKey,
};
pub use crate::core::route::{AmpRecord, Hop, MppRecord, Route, Vertex};
pub use crate::core::state::{PaymentState, PaymentStatus};
pub use crate::errors::PaymentError;
pub use crate::kernel::memory::MemoryBackend;
pub use crate::kernel::sled_store::SledBackend;
pub use crate::kernel::{Kernel, KernelError, TxnBackend};
pub use crate::primitives::{CancelToken, Msat, PaymentIdentifier, Preimage};
pub use crate::store::codec::CodecError;
pub use crate::store::{PaymentQuery, PaymentResponse, PaymentStore, PaymentStoreConfig};
