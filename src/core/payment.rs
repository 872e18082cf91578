//! Payment snapshots and HTLC attempt records.
//!
//! A [`Payment`] is a read-only snapshot assembled from the persisted
//! record: creation info, the HTLC attempts with their outcomes and the
//! optional payment-level failure reason. Status and derived state are
//! computed at assembly time and validated against the consistency rules;
//! mutations never operate on a snapshot, they go through the store.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use bitcoin::secp256k1::SecretKey;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::core::route::Route;
use crate::core::state::{
    decide_payment_status, validate_state, PaymentState, PaymentStatus,
};
use crate::errors::PaymentError;
use crate::primitives::{Msat, PaymentIdentifier, Preimage};
use crate::store::codec::CodecError;

// ============================================================================
// Failure Reasons
// ============================================================================

/// Why a payment was ultimately given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The payment timed out before any attempt succeeded.
    Timeout,
    /// Path finding found no route to the destination.
    NoRoute,
    /// An unexpected error happened during the payment.
    Error,
    /// The hash is unknown to the receiver, or amount/expiry were wrong.
    PaymentDetails,
    /// Not enough local balance to complete the payment.
    InsufficientBalance,
    /// The user canceled the payment.
    Canceled,
}

impl FailureReason {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            FailureReason::Timeout => 0,
            FailureReason::NoRoute => 1,
            FailureReason::Error => 2,
            FailureReason::PaymentDetails => 3,
            FailureReason::InsufficientBalance => 4,
            FailureReason::Canceled => 5,
        }
    }

    pub(crate) fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(FailureReason::Timeout),
            1 => Some(FailureReason::NoRoute),
            2 => Some(FailureReason::Error),
            3 => Some(FailureReason::PaymentDetails),
            4 => Some(FailureReason::InsufficientBalance),
            5 => Some(FailureReason::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::NoRoute => write!(f, "no_route"),
            FailureReason::Error => write!(f, "error"),
            FailureReason::PaymentDetails => write!(f, "incorrect_payment_details"),
            FailureReason::InsufficientBalance => write!(f, "insufficient_balance"),
            FailureReason::Canceled => write!(f, "canceled"),
        }
    }
}

/// Why a single HTLC shard failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HtlcFailReason {
    /// The shard failed for an unknown reason.
    Unknown,
    /// The failure message could not be decrypted.
    Unreadable,
    /// The shard failed because of a local error.
    Internal,
    /// The shard failed with a network failure message.
    WireMessage,
}

impl HtlcFailReason {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            HtlcFailReason::Unknown => 0,
            HtlcFailReason::Unreadable => 1,
            HtlcFailReason::Internal => 2,
            HtlcFailReason::WireMessage => 3,
        }
    }

    pub(crate) fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(HtlcFailReason::Unknown),
            1 => Some(HtlcFailReason::Unreadable),
            2 => Some(HtlcFailReason::Internal),
            3 => Some(HtlcFailReason::WireMessage),
            _ => None,
        }
    }
}

// ============================================================================
// Creation Info
// ============================================================================

/// The immutable intent of a payment, written once at init time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentCreationInfo {
    /// Payment hash, or the set id for AMP payments.
    pub payment_identifier: PaymentIdentifier,
    /// The user-authorized amount. No set of non-failed shards may ever
    /// exceed it.
    pub value: Msat,
    /// When the payment was initiated.
    pub creation_time: DateTime<Utc>,
    /// The full payment request, if any.
    pub payment_request: Vec<u8>,
    /// TLV records delivered to the first hop over the wire message.
    pub first_hop_custom_records: BTreeMap<u64, Vec<u8>>,
}

// ============================================================================
// Session Key
// ============================================================================

/// The ephemeral key of one HTLC attempt.
///
/// Persisted as 32 raw bytes; the expensive parse into a curve scalar is
/// deferred until a caller actually needs to sign with it, and memoized
/// afterwards.
pub struct SessionKey {
    raw: [u8; 32],
    cached: OnceLock<SecretKey>,
}

impl SessionKey {
    pub fn from_raw(raw: [u8; 32]) -> Self {
        Self {
            raw,
            cached: OnceLock::new(),
        }
    }

    /// Builds a session key from an already-parsed secret key, seeding the
    /// memoized form.
    pub fn from_secret_key(key: &SecretKey) -> Self {
        let cached = OnceLock::new();
        let _ = cached.set(*key);
        Self {
            raw: key.secret_bytes(),
            cached,
        }
    }

    /// The raw persisted bytes.
    pub fn raw(&self) -> &[u8; 32] {
        &self.raw
    }

    /// The parsed curve scalar. Parses on first use.
    pub fn secret_key(&self) -> Result<&SecretKey, PaymentError> {
        if let Some(key) = self.cached.get() {
            return Ok(key);
        }
        let parsed = SecretKey::from_slice(&self.raw)
            .map_err(|_| PaymentError::Codec(CodecError::InvalidSessionKey))?;
        Ok(self.cached.get_or_init(|| parsed))
    }
}

impl Clone for SessionKey {
    fn clone(&self) -> Self {
        let cached = OnceLock::new();
        if let Some(key) = self.cached.get() {
            let _ = cached.set(*key);
        }
        Self {
            raw: self.raw,
            cached,
        }
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for SessionKey {}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        write!(f, "SessionKey(<32 bytes>)")
    }
}

// ============================================================================
// HTLC Attempts
// ============================================================================

/// Static information about one HTLC shard, recorded when the shard is
/// registered and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtlcAttemptInfo {
    /// Unique id of the attempt within its payment.
    pub attempt_id: u64,
    /// Ephemeral key used for the onion of this attempt.
    pub session_key: SessionKey,
    /// The route the shard was dispatched on.
    pub route: Route,
    /// When the shard was dispatched.
    pub attempt_time: DateTime<Utc>,
    /// Per-shard hash. Differs across attempts for AMP payments; `None`
    /// means the payment identifier doubles as the hash.
    pub hash: Option<[u8; 32]>,
}

/// Proof of a shard's success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtlcSettleInfo {
    pub preimage: Preimage,
    pub settle_time: DateTime<Utc>,
}

/// Structured failure of a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtlcFailInfo {
    pub fail_time: DateTime<Utc>,
    /// Encoded wire failure message; empty when none was received.
    pub message: Vec<u8>,
    pub reason: HtlcFailReason,
    /// Index of the node that generated the failure. Zero is the sender.
    pub failure_source_index: u32,
}

/// Outcome of one HTLC shard. Settled and failed are mutually exclusive by
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtlcOutcome {
    /// Dispatched, no result yet.
    InFlight,
    Settled(HtlcSettleInfo),
    Failed(HtlcFailInfo),
}

impl HtlcOutcome {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, HtlcOutcome::InFlight)
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, HtlcOutcome::Settled(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, HtlcOutcome::Failed(_))
    }

    pub fn settle(&self) -> Option<&HtlcSettleInfo> {
        match self {
            HtlcOutcome::Settled(info) => Some(info),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&HtlcFailInfo> {
        match self {
            HtlcOutcome::Failed(info) => Some(info),
            _ => None,
        }
    }
}

/// One HTLC shard with its recorded outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtlcAttempt {
    pub info: HtlcAttemptInfo,
    pub outcome: HtlcOutcome,
}

impl HtlcAttempt {
    pub fn attempt_id(&self) -> u64 {
        self.info.attempt_id
    }
}

// ============================================================================
// Payment Snapshot
// ============================================================================

/// A consistent snapshot of one payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    sequence_num: u64,
    info: PaymentCreationInfo,
    htlcs: Vec<HtlcAttempt>,
    failure_reason: Option<FailureReason>,
    status: PaymentStatus,
    state: PaymentState,
}

impl Payment {
    /// Assembles a snapshot, deriving status and state and checking the
    /// consistency rules.
    pub(crate) fn new(
        sequence_num: u64,
        info: PaymentCreationInfo,
        htlcs: Vec<HtlcAttempt>,
        failure_reason: Option<FailureReason>,
    ) -> Result<Self, PaymentError> {
        let (sent, fees) = sent_and_fees(&htlcs);
        if sent > info.value {
            return Err(PaymentError::SentExceedsTotal {
                sent,
                total: info.value,
            });
        }

        let status = decide_payment_status(&htlcs, failure_reason.as_ref());
        let state = PaymentState {
            num_attempts_in_flight: htlcs
                .iter()
                .filter(|h| h.outcome.is_in_flight())
                .count(),
            remaining_amt: Msat(info.value.msat() - sent.msat()),
            fees_paid: fees,
            has_settled_htlc: htlcs.iter().any(|h| h.outcome.is_settled()),
            payment_failed: failure_reason.is_some(),
        };
        validate_state(status, &state, info.value)?;

        Ok(Self {
            sequence_num,
            info,
            htlcs,
            failure_reason,
            status,
            state,
        })
    }

    /// Sequence number assigned at init time; orders payments by creation.
    pub fn sequence_num(&self) -> u64 {
        self.sequence_num
    }

    pub fn info(&self) -> &PaymentCreationInfo {
        &self.info
    }

    pub fn htlcs(&self) -> &[HtlcAttempt] {
        &self.htlcs
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        self.failure_reason
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn state(&self) -> &PaymentState {
        &self.state
    }

    /// True when the payment can no longer be updated.
    pub fn terminated(&self) -> bool {
        self.status.updatable().is_err()
    }

    /// The first settled attempt, if any, and the payment-level failure
    /// reason.
    pub fn terminal_info(&self) -> (Option<&HtlcAttempt>, Option<FailureReason>) {
        let settled = self.htlcs.iter().find(|h| h.outcome.is_settled());
        (settled, self.failure_reason)
    }

    /// Sum of receiver amounts and fees over the non-failed shards.
    pub fn sent_amt(&self) -> (Msat, Msat) {
        sent_and_fees(&self.htlcs)
    }

    /// The shards with no outcome yet.
    pub fn in_flight_htlcs(&self) -> Vec<&HtlcAttempt> {
        self.htlcs
            .iter()
            .filter(|h| h.outcome.is_in_flight())
            .collect()
    }

    /// Looks up an attempt by id.
    pub fn get_attempt(&self, attempt_id: u64) -> Result<&HtlcAttempt, PaymentError> {
        self.htlcs
            .iter()
            .find(|h| h.info.attempt_id == attempt_id)
            .ok_or(PaymentError::AttemptNotFound(attempt_id))
    }

    /// Whether another HTLC may be registered for this payment.
    pub fn registrable(&self) -> Result<(), PaymentError> {
        self.status.updatable()?;

        if self.status != PaymentStatus::InFlight {
            return Ok(());
        }

        // With shards in flight, new registrations are only allowed while
        // nothing settled and the payment was not failed.
        if self.state.has_settled_htlc {
            return Err(PaymentError::PaymentPendingSettled);
        }
        if self.state.payment_failed {
            return Err(PaymentError::PaymentPendingFailed);
        }
        Ok(())
    }

    /// Whether the router should stop creating attempts and wait for the
    /// outstanding shards to resolve.
    pub fn need_wait_attempts(&self) -> Result<bool, PaymentError> {
        if self.state.remaining_amt != Msat::ZERO {
            return match self.status {
                PaymentStatus::Initiated => Ok(false),
                PaymentStatus::InFlight => {
                    if self.state.has_settled_htlc {
                        warn!(
                            "payment={} has remaining amount {}, yet at least \
                             one of its HTLCs is settled",
                            self.info.payment_identifier, self.state.remaining_amt
                        );
                        return Ok(true);
                    }
                    // A recorded failure reason means no new shards will be
                    // sent; wait for the in-flight ones.
                    if self.state.payment_failed {
                        return Ok(true);
                    }
                    Ok(false)
                }
                PaymentStatus::Succeeded => Err(PaymentError::PaymentInternal(format!(
                    "parts of the payment already succeeded but still have \
                     remaining amount {}",
                    self.state.remaining_amt
                ))),
                PaymentStatus::Failed => Ok(false),
            };
        }

        match self.status {
            PaymentStatus::Initiated => Err(PaymentError::PaymentInternal(
                "initiated payment has zero remaining amount".into(),
            )),
            PaymentStatus::InFlight => Ok(true),
            PaymentStatus::Succeeded => Ok(false),
            PaymentStatus::Failed => Err(PaymentError::PaymentInternal(
                "failed payment has zero remaining amount".into(),
            )),
        }
    }

    /// Whether the router may create more attempts for this payment.
    pub fn allow_more_attempts(&self) -> Result<bool, PaymentError> {
        if self.state.remaining_amt == Msat::ZERO {
            if self.status == PaymentStatus::Initiated {
                return Err(PaymentError::PaymentInternal(
                    "initiated payment has zero remaining amount".into(),
                ));
            }
            return Ok(false);
        }

        if self.status == PaymentStatus::Succeeded {
            return Err(PaymentError::PaymentInternal(format!(
                "payment already succeeded but still has remaining amount {}",
                self.state.remaining_amt
            )));
        }

        if let Err(e) = self.registrable() {
            warn!(
                "payment {}: cannot register HTLC attempt: {}, current status: {}",
                self.info.payment_identifier, e, self.status
            );
            return Ok(false);
        }

        Ok(true)
    }
}

fn sent_and_fees(htlcs: &[HtlcAttempt]) -> (Msat, Msat) {
    let mut sent = 0u64;
    let mut fees = 0u64;
    for htlc in htlcs {
        if htlc.outcome.is_failed() {
            continue;
        }
        // Not failed, so the amount potentially reached the receiver.
        sent = sent.saturating_add(htlc.info.route.receiver_amt().msat());
        fees = fees.saturating_add(htlc.info.route.total_fees().msat());
    }
    (Msat(sent), Msat(fees))
}
