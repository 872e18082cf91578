//! Paginated payment queries.
//!
//! Pagination walks the sequence index inside one read transaction, so a
//! page is always a consistent snapshot. Cursors are exclusive sequence
//! numbers; a reversed query with offset zero starts from the newest
//! payment and walks backward, and reversed pages are flipped before they
//! are returned so callers always see forward order.

use crate::core::payment::Payment;
use crate::core::state::PaymentStatus;
use crate::errors::PaymentError;
use crate::primitives::CancelToken;

use super::{codec, fetch_payment_in_scope, PaymentStore, PAYMENTS_INDEX_SCOPE, PAYMENTS_SCOPE};

/// Filter options for [`PaymentStore::query_payments`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentQuery {
    /// Exclusive starting cursor in sequence order. Zero starts at the
    /// beginning, or at the end for a reversed query.
    pub index_offset: u64,

    /// Upper bound on the number of returned payments. Must be non-zero.
    pub max_payments: u64,

    /// Walk the index backward.
    pub reversed: bool,

    /// Also return payments that have not succeeded.
    pub include_incomplete: bool,

    /// Count all payments in the store and return the total.
    pub count_total: bool,

    /// Inclusive lower bound on the creation time, unix seconds. Zero
    /// means unset.
    pub creation_date_start: i64,

    /// Inclusive upper bound on the creation time, unix seconds. Zero
    /// means unset.
    pub creation_date_end: i64,
}

/// One page of query results.
#[derive(Debug, Clone)]
pub struct PaymentResponse {
    /// The page, in forward sequence order regardless of query direction.
    pub payments: Vec<Payment>,

    /// Sequence number of the first returned payment; zero on an empty
    /// page.
    pub first_index_offset: u64,

    /// Sequence number of the last returned payment; zero on an empty
    /// page.
    pub last_index_offset: u64,

    /// Total number of payments in the store, when requested.
    pub total_count: Option<u64>,
}

impl PaymentStore {
    /// Returns one page of payments matching `query`.
    pub fn query_payments(
        &self,
        cancel: &CancelToken,
        query: &PaymentQuery,
    ) -> Result<PaymentResponse, PaymentError> {
        if query.max_payments == 0 {
            return Err(PaymentError::PaymentInternal(
                "query max_payments must be non-zero".into(),
            ));
        }

        self.kernel.view(|txn| {
            let total_count = if query.count_total {
                let mut count = 0u64;
                txn.for_each(&[PAYMENTS_SCOPE], &mut |_, value| {
                    if value.is_none() {
                        count += 1;
                    }
                    Ok(())
                })?;
                Some(count)
            } else {
                None
            };

            let start_after = if query.index_offset == 0 {
                // Forward: begin at the first entry. Reversed: an offset of
                // zero means "largest possible", begin at the last entry.
                None
            } else {
                Some(query.index_offset.to_be_bytes())
            };

            let mut page: Vec<Payment> = Vec::new();
            let mut scan_err: Option<PaymentError> = None;
            txn.range(
                &[PAYMENTS_INDEX_SCOPE],
                start_after.as_ref().map(|b| b.as_slice()),
                query.reversed,
                &mut |_, entry| {
                    let mut visit = || -> Result<bool, PaymentError> {
                        cancel.check()?;

                        let identifier = codec::decode_index_entry(entry)?;
                        let payment = fetch_payment_in_scope(txn, &identifier)?;

                        let created = payment.info().creation_time.timestamp();
                        if query.creation_date_start != 0 && created < query.creation_date_start {
                            return Ok(true);
                        }
                        if query.creation_date_end != 0 && created > query.creation_date_end {
                            return Ok(true);
                        }
                        if payment.status() != PaymentStatus::Succeeded
                            && !query.include_incomplete
                        {
                            return Ok(true);
                        }

                        page.push(payment);
                        Ok(page.len() < query.max_payments as usize)
                    };
                    match visit() {
                        Ok(more) => Ok(more),
                        Err(e) => {
                            scan_err = Some(e);
                            Ok(false)
                        }
                    }
                },
            )?;
            if let Some(e) = scan_err {
                return Err(e);
            }

            if query.reversed {
                page.reverse();
            }

            if page.is_empty() {
                return Ok(PaymentResponse {
                    payments: page,
                    first_index_offset: 0,
                    last_index_offset: 0,
                    total_count,
                });
            }

            let first_index_offset = page[0].sequence_num();
            let last_index_offset = page[page.len() - 1].sequence_num();
            Ok(PaymentResponse {
                payments: page,
                first_index_offset,
                last_index_offset,
                total_count,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;
    use crate::core::payment::FailureReason;
    use chrono::{TimeZone, Utc};

    /// Creates `n` payments with sequence numbers 1..=n; even ones are
    /// settled, odd ones stay in flight.
    fn seeded_store(n: u64) -> PaymentStore {
        let store = memory_store();
        for i in 1..=n {
            let id = identifier(i as u8);
            let mut info = creation_info(id, 100);
            info.creation_time = Utc.timestamp_nanos(1_700_000_000_000_000_000 + i as i64 * 1_000_000_000);
            store.init_payment(id, info).unwrap();
            store.register_attempt(id, attempt(1, 100)).unwrap();
            if i % 2 == 0 {
                store.settle_attempt(id, 1, settle_info(1)).unwrap();
            }
        }
        store
    }

    fn seqs(response: &PaymentResponse) -> Vec<u64> {
        response.payments.iter().map(|p| p.sequence_num()).collect()
    }

    #[test]
    fn test_max_payments_zero_rejected() {
        let store = memory_store();
        let query = PaymentQuery {
            max_payments: 0,
            ..Default::default()
        };
        assert!(store.query_payments(&CancelToken::new(), &query).is_err());
    }

    #[test]
    fn test_forward_pagination() {
        let store = seeded_store(6);
        let cancel = CancelToken::new();

        let query = PaymentQuery {
            max_payments: 2,
            include_incomplete: true,
            ..Default::default()
        };
        let page = store.query_payments(&cancel, &query).unwrap();
        assert_eq!(seqs(&page), vec![1, 2]);
        assert_eq!(page.first_index_offset, 1);
        assert_eq!(page.last_index_offset, 2);

        // Continue from the cursor.
        let query = PaymentQuery {
            index_offset: page.last_index_offset,
            max_payments: 10,
            include_incomplete: true,
            ..Default::default()
        };
        let page = store.query_payments(&cancel, &query).unwrap();
        assert_eq!(seqs(&page), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_reversed_pagination_from_end() {
        let store = seeded_store(6);
        let cancel = CancelToken::new();

        // Offset zero walks backward from the largest sequence, and the
        // page comes back in forward order.
        let query = PaymentQuery {
            max_payments: 2,
            reversed: true,
            include_incomplete: true,
            ..Default::default()
        };
        let page = store.query_payments(&cancel, &query).unwrap();
        assert_eq!(seqs(&page), vec![5, 6]);
        assert_eq!(page.first_index_offset, 5);
        assert_eq!(page.last_index_offset, 6);

        let query = PaymentQuery {
            index_offset: page.first_index_offset,
            max_payments: 2,
            reversed: true,
            include_incomplete: true,
            ..Default::default()
        };
        let page = store.query_payments(&cancel, &query).unwrap();
        assert_eq!(seqs(&page), vec![3, 4]);
    }

    #[test]
    fn test_incomplete_filter() {
        let store = seeded_store(6);
        let cancel = CancelToken::new();

        // Only settled payments by default.
        let query = PaymentQuery {
            max_payments: 10,
            ..Default::default()
        };
        let page = store.query_payments(&cancel, &query).unwrap();
        assert_eq!(seqs(&page), vec![2, 4, 6]);
    }

    #[test]
    fn test_count_total_ignores_filters() {
        let store = seeded_store(6);
        let cancel = CancelToken::new();

        let query = PaymentQuery {
            max_payments: 1,
            count_total: true,
            ..Default::default()
        };
        let page = store.query_payments(&cancel, &query).unwrap();
        assert_eq!(page.total_count, Some(6));
        assert_eq!(page.payments.len(), 1);

        let query = PaymentQuery {
            max_payments: 1,
            ..Default::default()
        };
        let page = store.query_payments(&cancel, &query).unwrap();
        assert_eq!(page.total_count, None);
    }

    #[test]
    fn test_creation_date_bounds_are_inclusive() {
        let store = seeded_store(6);
        let cancel = CancelToken::new();
        let base = 1_700_000_000i64;

        let query = PaymentQuery {
            max_payments: 10,
            include_incomplete: true,
            creation_date_start: base + 2,
            creation_date_end: base + 4,
            ..Default::default()
        };
        let page = store.query_payments(&cancel, &query).unwrap();
        assert_eq!(seqs(&page), vec![2, 3, 4]);

        // Zero bounds are unset.
        let query = PaymentQuery {
            max_payments: 10,
            include_incomplete: true,
            creation_date_end: base + 1,
            ..Default::default()
        };
        let page = store.query_payments(&cancel, &query).unwrap();
        assert_eq!(seqs(&page), vec![1]);
    }

    #[test]
    fn test_empty_page_response() {
        let store = memory_store();
        let query = PaymentQuery {
            max_payments: 10,
            include_incomplete: true,
            count_total: true,
            ..Default::default()
        };
        let page = store.query_payments(&CancelToken::new(), &query).unwrap();
        assert!(page.payments.is_empty());
        assert_eq!(page.first_index_offset, 0);
        assert_eq!(page.last_index_offset, 0);
        assert_eq!(page.total_count, Some(0));
    }

    #[test]
    fn test_retry_reindexes_payment() {
        let store = memory_store();
        let cancel = CancelToken::new();
        let id = identifier(0x42);

        store.init_payment(id, creation_info(id, 100)).unwrap();
        store.register_attempt(id, attempt(1, 100)).unwrap();
        store.fail_attempt(id, 1, fail_info()).unwrap();
        store.fail_payment(id, FailureReason::NoRoute).unwrap();

        // Retry: the payment moves to a new sequence number and the old
        // index entry disappears.
        store.init_payment(id, creation_info(id, 100)).unwrap();

        let query = PaymentQuery {
            max_payments: 10,
            include_incomplete: true,
            count_total: true,
            ..Default::default()
        };
        let page = store.query_payments(&cancel, &query).unwrap();
        assert_eq!(page.payments.len(), 1);
        assert_eq!(page.total_count, Some(1));
        assert_eq!(page.payments[0].sequence_num(), 2);
    }

    #[test]
    fn test_query_cancellation() {
        let store = seeded_store(2);
        let cancel = CancelToken::new();
        cancel.cancel();

        let query = PaymentQuery {
            max_payments: 10,
            include_incomplete: true,
            ..Default::default()
        };
        assert!(matches!(
            store.query_payments(&cancel, &query),
            Err(PaymentError::Cancelled)
        ));
    }
}
