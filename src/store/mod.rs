//! The payment store facade.
//!
//! [`PaymentStore`] is the single source of truth for the lifecycle of
//! outgoing multi-path payments. Every public operation runs inside one
//! transaction of the underlying [`crate::kernel`] backend; mutations are
//! funneled through the write coalescer so concurrent callers share
//! commits without changing the serial semantics.
//!
//! # Persisted layout
//!
//! ```text
//! payments/                        top scope, sequence = allocator bound
//!   <identifier (32 bytes)>/
//!     creation-info                codec::creation info
//!     sequence                     8-byte big-endian sequence number
//!     fail-info                    1-byte failure reason
//!     htlcs/
//!       attempt-info/<id be64>     codec::attempt info
//!       settle-info/<id be64>      codec::settle info
//!       fail-info/<id be64>        codec::fail info
//! payments-index/
//!   <sequence be64>                index type ∥ identifier
//! ```

pub mod codec;
mod delete;
mod query;
mod seq;

pub use query::{PaymentQuery, PaymentResponse};

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::debug;

use crate::core::payment::{
    FailureReason, HtlcAttempt, HtlcAttemptInfo, HtlcFailInfo, HtlcOutcome, HtlcSettleInfo,
    Payment, PaymentCreationInfo,
};
use crate::errors::PaymentError;
use crate::kernel::{BatchOp, Batcher, Kernel, ReadTxn, TxnBackend, WriteTxn};
use crate::primitives::{CancelToken, PaymentIdentifier};
use crate::store::seq::SequenceAllocator;

pub(crate) const PAYMENTS_SCOPE: &[u8] = b"payments";
pub(crate) const PAYMENTS_INDEX_SCOPE: &[u8] = b"payments-index";

pub(crate) const CREATION_INFO_KEY: &[u8] = b"creation-info";
pub(crate) const SEQUENCE_KEY: &[u8] = b"sequence";
pub(crate) const FAIL_INFO_KEY: &[u8] = b"fail-info";
pub(crate) const HTLCS_SCOPE: &[u8] = b"htlcs";

pub(crate) const HTLC_ATTEMPT_INFO_PREFIX: &[u8] = b"attempt-info/";
pub(crate) const HTLC_SETTLE_INFO_PREFIX: &[u8] = b"settle-info/";
pub(crate) const HTLC_FAIL_INFO_PREFIX: &[u8] = b"fail-info/";

/// Interval between progress log lines during large scans.
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(30);

pub(crate) fn htlc_key(prefix: &[u8], attempt_id: u64) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(&attempt_id.to_be_bytes());
    key
}

fn strip_htlc_key(key: &[u8], prefix: &[u8]) -> Option<u64> {
    let rest = key.strip_prefix(prefix)?;
    let bytes: [u8; 8] = rest.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

type Slot<T> = Arc<Mutex<Option<T>>>;

fn take_snapshot(slot: &Slot<Payment>) -> Result<Payment, PaymentError> {
    lock(slot).take().ok_or_else(|| {
        PaymentError::PaymentInternal("transaction committed without a snapshot".into())
    })
}

/// Store-level options.
#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentStoreConfig {
    /// When set, [`PaymentStore::delete_failed_attempts`] keeps failed HTLC
    /// records around for inspection instead of deleting them.
    pub keep_failed_payment_attempts: bool,
}

/// Persistent control store for outgoing multi-path payments.
pub struct PaymentStore {
    kernel: Kernel,
    batcher: Batcher<PaymentError>,
    seq: SequenceAllocator,
    config: PaymentStoreConfig,
}

impl PaymentStore {
    /// Opens the store over `backend` with default options.
    pub fn new(backend: Arc<dyn TxnBackend>) -> Result<Self, PaymentError> {
        Self::with_config(backend, PaymentStoreConfig::default())
    }

    /// Opens the store over `backend`, creating the top-level scopes.
    pub fn with_config(
        backend: Arc<dyn TxnBackend>,
        config: PaymentStoreConfig,
    ) -> Result<Self, PaymentError> {
        let kernel = Kernel::new(backend);
        kernel.update::<_, PaymentError, _>(|txn| {
            txn.create_scope(&[PAYMENTS_SCOPE])?;
            txn.create_scope(&[PAYMENTS_INDEX_SCOPE])?;
            Ok(())
        })?;

        Ok(Self {
            batcher: Batcher::new(kernel.clone()),
            seq: SequenceAllocator::new(),
            kernel,
            config,
        })
    }

    /// Records the creation info of a new payment, or retries a failed one.
    ///
    /// A payment that is initiated, in flight or succeeded is not
    /// re-initializable and the call fails with the status-specific error
    /// without touching any state. Retrying a failed payment assigns a
    /// fresh sequence number, rewrites the index entry and wipes the HTLC
    /// records and failure reason of the previous run; callers that need
    /// the historical attempts must read them before retrying.
    pub fn init_payment(
        &self,
        identifier: PaymentIdentifier,
        info: PaymentCreationInfo,
    ) -> Result<(), PaymentError> {
        let sequence_num = self.seq.next(&self.kernel)?;
        // Serialize before the transaction opens.
        let info_bytes = codec::encode_creation_info(&info)?;

        let init_err: Slot<PaymentError> = Arc::new(Mutex::new(None));
        let op_err = init_err.clone();
        let op: BatchOp<PaymentError> = Arc::new(move |txn: &mut dyn WriteTxn| {
            // Reset, the closure may run more than once under batching.
            *lock(&op_err) = None;

            prefetch_payment(txn, &identifier);
            let scope: [&[u8]; 2] = [PAYMENTS_SCOPE, identifier.as_bytes()];
            txn.create_scope(&scope)?;

            match fetch_payment_in_scope(txn, &identifier) {
                Ok(existing) => {
                    if let Err(e) = existing.status().initializable() {
                        *lock(&op_err) = Some(e);
                        return Ok(());
                    }
                }
                Err(PaymentError::PaymentNotInitiated) => {}
                Err(e) => return Err(e),
            }

            // A retried payment still owns an index entry under its old
            // sequence number; remove it before writing the new one.
            if let Some(prev_seq) = txn.get(&scope, SEQUENCE_KEY)? {
                txn.delete(&[PAYMENTS_INDEX_SCOPE], &prev_seq)?;
            }

            let index_bytes = codec::encode_index_entry(&identifier)?;
            txn.put(
                &[PAYMENTS_INDEX_SCOPE],
                &sequence_num.to_be_bytes(),
                &index_bytes,
            )?;
            txn.put(&scope, SEQUENCE_KEY, &sequence_num.to_be_bytes())?;
            txn.put(&scope, CREATION_INFO_KEY, &info_bytes)?;

            // Clean slate for the retry.
            txn.delete_scope(&[PAYMENTS_SCOPE, identifier.as_bytes(), HTLCS_SCOPE])?;
            txn.delete(&scope, FAIL_INFO_KEY)?;
            Ok(())
        });

        self.batcher.execute(op)?;
        let taken = lock(&init_err).take();
        match taken {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Registers a new HTLC shard for the payment and returns the
    /// refreshed snapshot.
    pub fn register_attempt(
        &self,
        identifier: PaymentIdentifier,
        attempt: HtlcAttemptInfo,
    ) -> Result<Payment, PaymentError> {
        let attempt_id = attempt.attempt_id;
        let attempt_bytes = codec::encode_attempt_info(&attempt)?;

        let slot: Slot<Payment> = Arc::new(Mutex::new(None));
        let op_slot = slot.clone();
        let op: BatchOp<PaymentError> = Arc::new(move |txn: &mut dyn WriteTxn| {
            *lock(&op_slot) = None;

            prefetch_payment(txn, &identifier);
            let payment = fetch_payment_in_scope(txn, &identifier)?;
            payment.registrable()?;
            check_shard_compatibility(&payment, &attempt)?;

            let htlcs_scope: [&[u8]; 3] =
                [PAYMENTS_SCOPE, identifier.as_bytes(), HTLCS_SCOPE];
            txn.create_scope(&htlcs_scope)?;
            txn.put(
                &htlcs_scope,
                &htlc_key(HTLC_ATTEMPT_INFO_PREFIX, attempt_id),
                &attempt_bytes,
            )?;

            *lock(&op_slot) = Some(fetch_payment_in_scope(txn, &identifier)?);
            Ok(())
        });

        self.batcher.execute(op)?;
        take_snapshot(&slot)
    }

    /// Marks the attempt settled with its preimage. For a multi-shard
    /// payment this may implicitly complete the whole payment; afterwards
    /// `init_payment` refuses the identifier forever.
    pub fn settle_attempt(
        &self,
        identifier: PaymentIdentifier,
        attempt_id: u64,
        settle: HtlcSettleInfo,
    ) -> Result<Payment, PaymentError> {
        let settle_bytes = codec::encode_settle_info(&settle)?;
        self.update_htlc_key(identifier, attempt_id, HTLC_SETTLE_INFO_PREFIX, settle_bytes)
    }

    /// Marks the attempt failed.
    pub fn fail_attempt(
        &self,
        identifier: PaymentIdentifier,
        attempt_id: u64,
        fail: HtlcFailInfo,
    ) -> Result<Payment, PaymentError> {
        let fail_bytes = codec::encode_fail_info(&fail)?;
        self.update_htlc_key(identifier, attempt_id, HTLC_FAIL_INFO_PREFIX, fail_bytes)
    }

    /// Writes the outcome record of a single HTLC. Outcomes may be written
    /// while the payment is initiated or in flight; a shard that already
    /// has an outcome is rejected with the matching error.
    fn update_htlc_key(
        &self,
        identifier: PaymentIdentifier,
        attempt_id: u64,
        key_prefix: &'static [u8],
        value: Vec<u8>,
    ) -> Result<Payment, PaymentError> {
        let slot: Slot<Payment> = Arc::new(Mutex::new(None));
        let op_slot = slot.clone();
        let op: BatchOp<PaymentError> = Arc::new(move |txn: &mut dyn WriteTxn| {
            *lock(&op_slot) = None;

            prefetch_payment(txn, &identifier);
            let payment = fetch_payment_in_scope(txn, &identifier)?;
            payment.status().updatable()?;

            let htlcs_scope: [&[u8]; 3] =
                [PAYMENTS_SCOPE, identifier.as_bytes(), HTLCS_SCOPE];
            if !txn.scope_exists(&htlcs_scope)? {
                return Err(PaymentError::AttemptNotFound(attempt_id));
            }
            if txn
                .get(&htlcs_scope, &htlc_key(HTLC_ATTEMPT_INFO_PREFIX, attempt_id))?
                .is_none()
            {
                return Err(PaymentError::AttemptNotFound(attempt_id));
            }

            // The outcome of a shard is written exactly once.
            if txn
                .get(&htlcs_scope, &htlc_key(HTLC_FAIL_INFO_PREFIX, attempt_id))?
                .is_some()
            {
                return Err(PaymentError::AttemptAlreadyFailed);
            }
            if txn
                .get(&htlcs_scope, &htlc_key(HTLC_SETTLE_INFO_PREFIX, attempt_id))?
                .is_some()
            {
                return Err(PaymentError::AttemptAlreadySettled);
            }

            txn.put(&htlcs_scope, &htlc_key(key_prefix, attempt_id), &value)?;

            *lock(&op_slot) = Some(fetch_payment_in_scope(txn, &identifier)?);
            Ok(())
        });

        self.batcher.execute(op)?;
        take_snapshot(&slot)
    }

    /// Records the payment-level failure reason.
    ///
    /// Deliberately legal while shards are still in flight: the derived
    /// status stays in flight until every shard resolves, and late
    /// settle/fail records are still accepted. The payment only becomes
    /// failed once no non-failed shards remain.
    pub fn fail_payment(
        &self,
        identifier: PaymentIdentifier,
        reason: FailureReason,
    ) -> Result<Payment, PaymentError> {
        let slot: Slot<Payment> = Arc::new(Mutex::new(None));
        let fail_err: Slot<PaymentError> = Arc::new(Mutex::new(None));
        let op_slot = slot.clone();
        let op_err = fail_err.clone();
        let op: BatchOp<PaymentError> = Arc::new(move |txn: &mut dyn WriteTxn| {
            *lock(&op_slot) = None;
            *lock(&op_err) = None;

            prefetch_payment(txn, &identifier);
            // Mark the payment as failed as long as it is known; the last
            // shard to fail terminally writes its record without extra
            // synchronization against the others.
            match fetch_payment_in_scope(txn, &identifier) {
                Ok(_) => {}
                Err(PaymentError::PaymentNotInitiated) => {
                    *lock(&op_err) = Some(PaymentError::PaymentNotInitiated);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }

            let scope: [&[u8]; 2] = [PAYMENTS_SCOPE, identifier.as_bytes()];
            txn.put(&scope, FAIL_INFO_KEY, &codec::encode_failure_reason(reason))?;

            *lock(&op_slot) = Some(fetch_payment_in_scope(txn, &identifier)?);
            Ok(())
        });

        self.batcher.execute(op)?;
        if let Some(e) = lock(&fail_err).take() {
            return Err(e);
        }
        take_snapshot(&slot)
    }

    /// Returns the current snapshot of a payment.
    pub fn fetch_payment(&self, identifier: PaymentIdentifier) -> Result<Payment, PaymentError> {
        self.kernel.view(|txn| {
            prefetch_payment(txn, &identifier);
            fetch_payment_in_scope(txn, &identifier)
        })
    }

    /// Returns every payment that has not reached a terminal condition.
    ///
    /// Scans the whole payment scope inside one read transaction; progress
    /// is logged every 30 seconds for large stores and `cancel` is checked
    /// between records.
    pub fn fetch_in_flight_payments(
        &self,
        cancel: &CancelToken,
    ) -> Result<Vec<Payment>, PaymentError> {
        let start = Instant::now();

        let (in_flight, processed) = self.kernel.view(|txn| -> Result<(Vec<Payment>, usize), PaymentError> {
            let mut identifiers = Vec::new();
            txn.for_each(&[PAYMENTS_SCOPE], &mut |name, value| {
                if value.is_none() {
                    identifiers.push(name.to_vec());
                }
                Ok(())
            })?;

            let mut in_flight = Vec::new();
            let mut processed = 0usize;
            let mut last_log = Instant::now();
            for raw in identifiers {
                cancel.check()?;

                let identifier = PaymentIdentifier::from_slice(&raw).ok_or_else(|| {
                    PaymentError::PaymentInternal(format!(
                        "malformed payment scope name: {}",
                        hex::encode(&raw)
                    ))
                })?;
                let payment = fetch_payment_in_scope(txn, &identifier)?;
                processed += 1;

                if last_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                    debug!(
                        "scanning in-flight payments (in progress), processed {}, \
                         last processed payment: {}",
                        processed, identifier
                    );
                    last_log = Instant::now();
                }

                if payment.terminated() {
                    continue;
                }
                in_flight.push(payment);
            }
            Ok((in_flight, processed))
        })?;

        debug!(
            "completed scanning for in-flight payments: total_processed={}, \
             found_inflight={}, elapsed={:?}",
            processed,
            in_flight.len(),
            start.elapsed()
        );
        Ok(in_flight)
    }
}

impl std::fmt::Debug for PaymentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn prefetch_payment<T: ReadTxn + ?Sized>(txn: &T, identifier: &PaymentIdentifier) {
    let payment_path: [&[u8]; 2] = [PAYMENTS_SCOPE, identifier.as_bytes()];
    let htlcs_path: [&[u8]; 3] = [PAYMENTS_SCOPE, identifier.as_bytes(), HTLCS_SCOPE];
    txn.prefetch(&[&payment_path[..], &htlcs_path[..]]);
}

/// Assembles the payment snapshot stored under `identifier`.
///
/// Returns [`PaymentError::PaymentNotInitiated`] when the payment scope or
/// its creation info is absent.
pub(crate) fn fetch_payment_in_scope<T: ReadTxn + ?Sized>(
    txn: &T,
    identifier: &PaymentIdentifier,
) -> Result<Payment, PaymentError> {
    let scope: [&[u8]; 2] = [PAYMENTS_SCOPE, identifier.as_bytes()];

    let creation_bytes = match txn.get(&scope, CREATION_INFO_KEY)? {
        Some(bytes) => bytes,
        None => return Err(PaymentError::PaymentNotInitiated),
    };
    let info = codec::decode_creation_info(&creation_bytes)?;

    let sequence_bytes = txn.get(&scope, SEQUENCE_KEY)?.ok_or_else(|| {
        PaymentError::PaymentInternal(format!("payment {} has no sequence number", identifier))
    })?;
    let sequence_arr: [u8; 8] = sequence_bytes.as_slice().try_into().map_err(|_| {
        PaymentError::PaymentInternal(format!("payment {} has a corrupt sequence", identifier))
    })?;
    let sequence_num = u64::from_be_bytes(sequence_arr);

    let failure_reason = match txn.get(&scope, FAIL_INFO_KEY)? {
        Some(bytes) => Some(codec::decode_failure_reason(&bytes)?),
        None => None,
    };

    let htlcs_scope: [&[u8]; 3] = [PAYMENTS_SCOPE, identifier.as_bytes(), HTLCS_SCOPE];
    let mut records: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    txn.for_each(&htlcs_scope, &mut |key, value| {
        if let Some(value) = value {
            records.push((key.to_vec(), value.to_vec()));
        }
        Ok(())
    })?;

    let mut infos: BTreeMap<u64, HtlcAttemptInfo> = BTreeMap::new();
    let mut settles: BTreeMap<u64, HtlcSettleInfo> = BTreeMap::new();
    let mut fails: BTreeMap<u64, HtlcFailInfo> = BTreeMap::new();
    for (key, value) in records {
        if let Some(id) = strip_htlc_key(&key, HTLC_ATTEMPT_INFO_PREFIX) {
            infos.insert(id, codec::decode_attempt_info(&value)?);
        } else if let Some(id) = strip_htlc_key(&key, HTLC_SETTLE_INFO_PREFIX) {
            settles.insert(id, codec::decode_settle_info(&value)?);
        } else if let Some(id) = strip_htlc_key(&key, HTLC_FAIL_INFO_PREFIX) {
            fails.insert(id, codec::decode_fail_info(&value)?);
        } else {
            return Err(PaymentError::PaymentInternal(format!(
                "unexpected htlc record key: {}",
                hex::encode(&key)
            )));
        }
    }

    let mut htlcs = Vec::with_capacity(infos.len());
    for (id, attempt_info) in infos {
        let outcome = if let Some(settle) = settles.remove(&id) {
            HtlcOutcome::Settled(settle)
        } else if let Some(fail) = fails.remove(&id) {
            HtlcOutcome::Failed(fail)
        } else {
            HtlcOutcome::InFlight
        };
        htlcs.push(HtlcAttempt {
            info: attempt_info,
            outcome,
        });
    }
    if !settles.is_empty() || !fails.is_empty() {
        return Err(PaymentError::PaymentInternal(
            "htlc outcome recorded for an unregistered attempt".into(),
        ));
    }

    Payment::new(sequence_num, info, htlcs, failure_reason)
}

/// Validates a new shard against the payment's existing non-failed shards.
fn check_shard_compatibility(
    payment: &Payment,
    attempt: &HtlcAttemptInfo,
) -> Result<(), PaymentError> {
    let final_hop = attempt.route.final_hop().ok_or_else(|| {
        PaymentError::PaymentInternal("attempt route has no hops".into())
    })?;

    // Encrypted data on the final hop marks a blinded payment. Blinded
    // shards carry no MPP records; the recipient correlates them through
    // the encrypted payloads, so the only cross-shard check is the total
    // amount.
    let is_blinded = final_hop.is_blinded();
    let mpp = final_hop.mpp.as_ref();

    if is_blinded && mpp.is_some() {
        return Err(PaymentError::MppRecordInBlindedPayment);
    }

    // Attempt ids are unique within a payment; re-registering one would
    // silently overwrite the recorded shard.
    if payment
        .htlcs()
        .iter()
        .any(|h| h.attempt_id() == attempt.attempt_id)
    {
        return Err(PaymentError::PaymentInternal(format!(
            "attempt id {} is already registered",
            attempt.attempt_id
        )));
    }

    for htlc in payment.in_flight_htlcs() {
        let Some(existing_hop) = htlc.info.route.final_hop() else {
            continue;
        };
        let existing_mpp = existing_hop.mpp.as_ref();

        if is_blinded && existing_mpp.is_some() {
            return Err(PaymentError::MppRecordInBlindedPayment);
        }

        if is_blinded {
            if final_hop.total_amt_msat != existing_hop.total_amt_msat {
                return Err(PaymentError::BlindedTotalAmountMismatch);
            }
            continue;
        }

        match (mpp, existing_mpp) {
            (None, Some(_)) => return Err(PaymentError::NonMppIntoMpp),
            (Some(_), None) => return Err(PaymentError::MppIntoNonMpp),
            (None, None) => continue,
            (Some(new), Some(existing)) => {
                if new.payment_addr != existing.payment_addr {
                    return Err(PaymentError::MppPaymentAddrMismatch);
                }
                if new.total_msat != existing.total_msat {
                    return Err(PaymentError::MppTotalAmountMismatch);
                }
            }
        }
    }

    // A non-MPP attempt must carry the full amount in one shard. Blinded
    // attempts count as multi-part here.
    let amt = attempt.route.receiver_amt();
    if !is_blinded && mpp.is_none() && amt != payment.info().value {
        return Err(PaymentError::ValueMismatch);
    }

    // Never authorize more than the payment value across live shards.
    let (sent, _) = payment.sent_amt();
    let attempted = sent.checked_add(amt).unwrap_or(crate::primitives::Msat(u64::MAX));
    if attempted > payment.info().value {
        return Err(PaymentError::ValueExceedsAmount {
            attempted,
            total: payment.info().value,
        });
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::core::route::{Hop, MppRecord, Route, Vertex};
    use crate::kernel::memory::MemoryBackend;
    use crate::primitives::Msat;
    use chrono::{TimeZone, Utc};

    pub(crate) fn memory_store() -> PaymentStore {
        PaymentStore::new(Arc::new(MemoryBackend::new())).unwrap()
    }

    pub(crate) fn identifier(byte: u8) -> PaymentIdentifier {
        PaymentIdentifier([byte; 32])
    }

    pub(crate) fn creation_info(id: PaymentIdentifier, value: u64) -> PaymentCreationInfo {
        PaymentCreationInfo {
            payment_identifier: id,
            value: Msat::from_msat(value),
            creation_time: Utc.timestamp_nanos(1_700_000_000_000_000_000),
            payment_request: Vec::new(),
            first_hop_custom_records: std::collections::BTreeMap::new(),
        }
    }

    pub(crate) fn hop(receiver_amt: u64) -> Hop {
        Hop {
            pub_key: Vertex([3u8; 33]),
            channel_id: 42,
            outgoing_time_lock: 144,
            amt_to_forward: Msat::from_msat(receiver_amt),
            mpp: None,
            amp: None,
            encrypted_data: Vec::new(),
            blinding_point: None,
            total_amt_msat: Msat::ZERO,
            metadata: Vec::new(),
            custom_records: std::collections::BTreeMap::new(),
        }
    }

    pub(crate) fn route(receiver_amt: u64, fee: u64) -> Route {
        Route {
            total_time_lock: 200,
            total_amt: Msat::from_msat(receiver_amt + fee),
            source_pub_key: Vertex([2u8; 33]),
            hops: vec![hop(receiver_amt)],
        }
    }

    pub(crate) fn attempt(attempt_id: u64, receiver_amt: u64) -> HtlcAttemptInfo {
        HtlcAttemptInfo {
            attempt_id,
            session_key: crate::core::payment::SessionKey::from_raw([0x11u8; 32]),
            route: route(receiver_amt, 10),
            attempt_time: Utc.timestamp_nanos(1_700_000_001_000_000_000),
            hash: None,
        }
    }

    pub(crate) fn mpp_attempt(
        attempt_id: u64,
        receiver_amt: u64,
        addr: [u8; 32],
        total: u64,
    ) -> HtlcAttemptInfo {
        let mut info = attempt(attempt_id, receiver_amt);
        info.route.hops[0].mpp = Some(MppRecord {
            payment_addr: addr,
            total_msat: Msat::from_msat(total),
        });
        info
    }

    pub(crate) fn blinded_attempt(
        attempt_id: u64,
        receiver_amt: u64,
        total: u64,
    ) -> HtlcAttemptInfo {
        let mut info = attempt(attempt_id, receiver_amt);
        info.route.hops[0].encrypted_data = vec![0xEB; 8];
        info.route.hops[0].total_amt_msat = Msat::from_msat(total);
        info
    }

    pub(crate) fn settle_info(byte: u8) -> HtlcSettleInfo {
        HtlcSettleInfo {
            preimage: crate::primitives::Preimage([byte; 32]),
            settle_time: Utc.timestamp_nanos(1_700_000_002_000_000_000),
        }
    }

    pub(crate) fn fail_info() -> HtlcFailInfo {
        HtlcFailInfo {
            fail_time: Utc.timestamp_nanos(1_700_000_002_000_000_000),
            message: Vec::new(),
            reason: crate::core::payment::HtlcFailReason::WireMessage,
            failure_source_index: 1,
        }
    }
}
