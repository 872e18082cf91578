//! The closed error set of the payment control store.
//!
//! Every semantic error a caller can observe is one of the variants below,
//! stable across versions so that callers may pattern-match on the kind.
//! Infrastructure failures are nested: backend errors arrive as
//! [`PaymentError::Store`] and record-format errors as
//! [`PaymentError::Codec`].

use thiserror::Error;

use crate::kernel::KernelError;
use crate::primitives::Msat;
use crate::store::codec::CodecError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    /// The payment was never initialized, or has been deleted.
    #[error("payment isn't initiated")]
    PaymentNotInitiated,

    /// Initialization was attempted for a payment that already exists and
    /// is not in a retryable state.
    #[error("payment already exists")]
    PaymentAlreadyExists,

    /// The payment already settled at least one HTLC; paying again would
    /// double-pay the receiver.
    #[error("payment is already succeeded")]
    PaymentAlreadySucceeded,

    /// The payment has shards on the wire.
    #[error("payment is in transition")]
    PaymentInFlight,

    /// The payment reached the failed state and the requested mutation is
    /// not legal on it.
    #[error("payment has already failed")]
    PaymentAlreadyFailed,

    /// The payment reached a terminal condition (succeeded, or failed with
    /// no shards left in flight) and may no longer be altered.
    #[error("payment has reached terminal condition")]
    PaymentTerminal,

    /// The stored payment is in a state this version does not recognize.
    #[error("unknown payment status")]
    UnknownPaymentStatus,

    /// The derived state of the payment contradicts its status, e.g. a
    /// succeeded payment with a non-zero remaining amount.
    #[error("payment internal error: {0}")]
    PaymentInternal(String),

    /// Settle or fail was requested for an attempt id that was never
    /// registered on this payment.
    #[error("htlc attempt {0} not registered")]
    AttemptNotFound(u64),

    #[error("attempt already settled")]
    AttemptAlreadySettled,

    #[error("attempt already failed")]
    AttemptAlreadyFailed,

    /// A non-MPP attempt must carry the full payment amount.
    #[error("attempted value doesn't match payment amount")]
    ValueMismatch,

    /// Registering the attempt would push the non-failed total above the
    /// user-authorized payment amount.
    #[error("attempted value exceeds payment amount: attempted={attempted}, total={total}")]
    ValueExceedsAmount { attempted: Msat, total: Msat },

    /// The recorded shards already sum above the payment amount. Indicates
    /// a corrupt record; surfaced instead of being masked.
    #[error("total sent exceeds payment amount: sent={sent}, total={total}")]
    SentExceedsTotal { sent: Msat, total: Msat },

    /// A non-MPP attempt was registered for a payment with MPP shards.
    #[error("payment has MPP attempts")]
    NonMppIntoMpp,

    /// An MPP attempt was registered for a payment with non-MPP shards.
    #[error("payment has non-MPP attempts")]
    MppIntoNonMpp,

    #[error("payment address mismatch")]
    MppPaymentAddrMismatch,

    #[error("mpp payment total amount mismatch")]
    MppTotalAmountMismatch,

    /// Blinded payments carry no MPP records; the recipient correlates
    /// shards through the encrypted data instead.
    #[error("blinded payment cannot contain MPP records")]
    MppRecordInBlindedPayment,

    #[error("blinded path total amount mismatch")]
    BlindedTotalAmountMismatch,

    /// New shards are rejected once any shard settled.
    #[error("payment has settled htlcs")]
    PaymentPendingSettled,

    /// New shards are rejected once a failure reason is recorded.
    #[error("payment has failure reason")]
    PaymentPendingFailed,

    /// Underlying store failure: I/O or transaction conflict.
    #[error(transparent)]
    Store(#[from] KernelError),

    /// A persisted record did not decode.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The caller's cancellation token fired during a scan.
    #[error("operation cancelled")]
    Cancelled,
}

impl PaymentError {
    /// True for transient backend contention that is safe to retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PaymentError::Store(KernelError::Conflict))
    }
}

impl crate::kernel::BatchableError for PaymentError {
    fn is_conflict(&self) -> bool {
        PaymentError::is_conflict(self)
    }
}
