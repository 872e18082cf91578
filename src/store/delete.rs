//! Payment deletion.
//!
//! Whole payments may only be removed once they are terminal; their index
//! entry goes with them so the sequence index stays bijective with the
//! live payments. The failed-HTLC-only variants leave the payment record
//! in place and strip the shards that failed, which keeps long-lived
//! stores small without touching proof-of-payment data.

use log::debug;

use crate::core::payment::Payment;
use crate::core::state::PaymentStatus;
use crate::errors::PaymentError;
use crate::kernel::WriteTxn;
use crate::primitives::{CancelToken, PaymentIdentifier};

use super::{
    fetch_payment_in_scope, htlc_key, PaymentStore, HTLCS_SCOPE, HTLC_ATTEMPT_INFO_PREFIX,
    HTLC_FAIL_INFO_PREFIX, PAYMENTS_INDEX_SCOPE, PAYMENTS_SCOPE,
};

impl PaymentStore {
    /// Deletes one payment, or with `failed_htlcs_only` just its failed
    /// shard records. Both forms require the payment to be terminal.
    pub fn delete_payment(
        &self,
        identifier: PaymentIdentifier,
        failed_htlcs_only: bool,
    ) -> Result<(), PaymentError> {
        self.kernel.update(|txn| {
            let payment = fetch_payment_in_scope(txn, &identifier)?;
            payment.status().removable()?;
            delete_in_scope(txn, &identifier, &payment, failed_htlcs_only)
        })
    }

    /// Deletes the failed shard records of a terminal payment, unless the
    /// store is configured to keep them.
    pub fn delete_failed_attempts(
        &self,
        identifier: PaymentIdentifier,
    ) -> Result<(), PaymentError> {
        if self.config.keep_failed_payment_attempts {
            return Ok(());
        }
        self.delete_payment(identifier, true)
    }

    /// Sweeps the store, deleting every removable payment (or only the
    /// failed ones with `failed_only`), whole or restricted to failed
    /// shard records with `failed_htlcs_only`. Returns the number of
    /// payments affected. `cancel` is checked while the candidates are
    /// collected.
    pub fn delete_payments(
        &self,
        cancel: &CancelToken,
        failed_only: bool,
        failed_htlcs_only: bool,
    ) -> Result<usize, PaymentError> {
        let deleted = self.kernel.update(|txn| -> Result<usize, PaymentError> {
            let mut names = Vec::new();
            txn.for_each(&[PAYMENTS_SCOPE], &mut |name, value| {
                if value.is_none() {
                    names.push(name.to_vec());
                }
                Ok(())
            })?;

            // Collect first, delete second; mutating a scope while walking
            // it is undefined on some backends.
            let mut victims: Vec<(PaymentIdentifier, Payment)> = Vec::new();
            for raw in names {
                cancel.check()?;

                let identifier = PaymentIdentifier::from_slice(&raw).ok_or_else(|| {
                    PaymentError::PaymentInternal(format!(
                        "malformed payment scope name: {}",
                        hex::encode(&raw)
                    ))
                })?;
                let payment = fetch_payment_in_scope(txn, &identifier)?;

                if payment.status().removable().is_err() {
                    continue;
                }
                if failed_only && payment.status() != PaymentStatus::Failed {
                    continue;
                }
                victims.push((identifier, payment));
            }

            let count = victims.len();
            for (identifier, payment) in victims {
                delete_in_scope(txn, &identifier, &payment, failed_htlcs_only)?;
            }
            Ok(count)
        })?;

        debug!(
            "deleted {} payments (failed_only={}, failed_htlcs_only={})",
            deleted, failed_only, failed_htlcs_only
        );
        Ok(deleted)
    }
}

fn delete_in_scope<T: WriteTxn + ?Sized>(
    txn: &mut T,
    identifier: &PaymentIdentifier,
    payment: &Payment,
    failed_htlcs_only: bool,
) -> Result<(), PaymentError> {
    if failed_htlcs_only {
        let htlcs_scope: [&[u8]; 3] = [PAYMENTS_SCOPE, identifier.as_bytes(), HTLCS_SCOPE];
        for htlc in payment.htlcs() {
            if !htlc.outcome.is_failed() {
                continue;
            }
            let id = htlc.attempt_id();
            txn.delete(&htlcs_scope, &htlc_key(HTLC_ATTEMPT_INFO_PREFIX, id))?;
            txn.delete(&htlcs_scope, &htlc_key(HTLC_FAIL_INFO_PREFIX, id))?;
        }
        return Ok(());
    }

    // Whole-payment removal erases the index entry too (the index stays
    // bijective with live payments).
    txn.delete(
        &[PAYMENTS_INDEX_SCOPE],
        &payment.sequence_num().to_be_bytes(),
    )?;
    txn.delete_scope(&[PAYMENTS_SCOPE, identifier.as_bytes()])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;
    use crate::core::payment::FailureReason;
    use crate::store::{PaymentQuery, PaymentStoreConfig};
    use crate::kernel::memory::MemoryBackend;
    use std::sync::Arc;

    fn failed_payment(store: &PaymentStore, byte: u8) -> PaymentIdentifier {
        let id = identifier(byte);
        store.init_payment(id, creation_info(id, 100)).unwrap();
        store.register_attempt(id, attempt(1, 100)).unwrap();
        store.fail_attempt(id, 1, fail_info()).unwrap();
        store.fail_payment(id, FailureReason::Timeout).unwrap();
        id
    }

    fn settled_payment(store: &PaymentStore, byte: u8) -> PaymentIdentifier {
        let id = identifier(byte);
        store.init_payment(id, creation_info(id, 100)).unwrap();
        store.register_attempt(id, attempt(1, 100)).unwrap();
        store.settle_attempt(id, 1, settle_info(1)).unwrap();
        id
    }

    #[test]
    fn test_delete_requires_terminal() {
        let store = memory_store();
        let id = identifier(0x10);
        store.init_payment(id, creation_info(id, 100)).unwrap();

        assert!(matches!(
            store.delete_payment(id, false),
            Err(PaymentError::PaymentInFlight)
        ));

        store.register_attempt(id, attempt(1, 100)).unwrap();
        assert!(matches!(
            store.delete_payment(id, false),
            Err(PaymentError::PaymentInFlight)
        ));
    }

    #[test]
    fn test_delete_whole_payment_erases_index() {
        let store = memory_store();
        let id = settled_payment(&store, 0x11);

        store.delete_payment(id, false).unwrap();
        assert!(matches!(
            store.fetch_payment(id),
            Err(PaymentError::PaymentNotInitiated)
        ));

        let page = store
            .query_payments(
                &CancelToken::new(),
                &PaymentQuery {
                    max_payments: 10,
                    include_incomplete: true,
                    count_total: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(page.payments.is_empty());
        assert_eq!(page.total_count, Some(0));
    }

    #[test]
    fn test_delete_failed_htlcs_only_keeps_payment() {
        let store = memory_store();
        let id = identifier(0x12);
        store.init_payment(id, creation_info(id, 100)).unwrap();
        store
            .register_attempt(id, mpp_attempt(1, 60, [7u8; 32], 100))
            .unwrap();
        store.fail_attempt(id, 1, fail_info()).unwrap();
        store
            .register_attempt(id, mpp_attempt(2, 60, [7u8; 32], 100))
            .unwrap();
        store
            .register_attempt(id, mpp_attempt(3, 40, [7u8; 32], 100))
            .unwrap();
        store.settle_attempt(id, 2, settle_info(1)).unwrap();
        store.settle_attempt(id, 3, settle_info(2)).unwrap();

        store.delete_payment(id, true).unwrap();

        let payment = store.fetch_payment(id).unwrap();
        assert_eq!(payment.htlcs().len(), 2);
        assert!(payment.htlcs().iter().all(|h| h.outcome.is_settled()));
    }

    #[test]
    fn test_delete_payments_sweep() {
        let store = memory_store();
        let cancel = CancelToken::new();

        let failed = failed_payment(&store, 0x13);
        let settled = settled_payment(&store, 0x14);
        let live = identifier(0x15);
        store.init_payment(live, creation_info(live, 100)).unwrap();
        store.register_attempt(live, attempt(1, 100)).unwrap();

        // failed_only leaves the settled payment alone.
        let count = store.delete_payments(&cancel, true, false).unwrap();
        assert_eq!(count, 1);
        assert!(store.fetch_payment(failed).is_err());
        assert!(store.fetch_payment(settled).is_ok());
        assert!(store.fetch_payment(live).is_ok());

        // A full sweep removes the settled payment and spares the live one.
        let count = store.delete_payments(&cancel, false, false).unwrap();
        assert_eq!(count, 1);
        assert!(store.fetch_payment(settled).is_err());
        assert!(store.fetch_payment(live).is_ok());
    }

    #[test]
    fn test_delete_payments_cancellation() {
        let store = memory_store();
        let _ = settled_payment(&store, 0x16);

        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            store.delete_payments(&cancel, false, false),
            Err(PaymentError::Cancelled)
        ));
        // Cancellation aborted the transaction; nothing was deleted.
        assert!(store.fetch_payment(identifier(0x16)).is_ok());
    }

    #[test]
    fn test_delete_failed_attempts_respects_config() {
        let backend = Arc::new(MemoryBackend::new());
        let store = PaymentStore::with_config(
            backend,
            PaymentStoreConfig {
                keep_failed_payment_attempts: true,
            },
        )
        .unwrap();

        let id = failed_payment(&store, 0x17);
        store.delete_failed_attempts(id).unwrap();
        // Kept: the failed shard is still there.
        assert_eq!(store.fetch_payment(id).unwrap().htlcs().len(), 1);
    }

    #[test]
    fn test_delete_failed_attempts_default() {
        let store = memory_store();
        let id = failed_payment(&store, 0x18);

        store.delete_failed_attempts(id).unwrap();
        let payment = store.fetch_payment(id).unwrap();
        assert!(payment.htlcs().is_empty());
        // Still failed: the payment-level reason survives.
        assert_eq!(payment.status(), PaymentStatus::Failed);
    }
}
