//! The payment status state machine.
//!
//! Status is never persisted. It is a pure function of the recorded HTLC
//! set and the payment-level failure reason, derived on every fetch; the
//! legality predicates below are the single place that decides which
//! mutation is allowed in which status.

use serde::{Deserialize, Serialize};

use crate::core::payment::{FailureReason, HtlcAttempt};
use crate::errors::PaymentError;
use crate::primitives::Msat;

/// The four statuses a payment can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Creation info recorded, no shard has been sent (or every sent shard
    /// failed without a payment-level failure reason).
    Initiated,
    /// At least one shard is on the wire.
    InFlight,
    /// At least one shard settled; the receiver revealed a preimage.
    Succeeded,
    /// No live shards remain and a failure reason is recorded.
    Failed,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Initiated => write!(f, "initiated"),
            PaymentStatus::InFlight => write!(f, "in_flight"),
            PaymentStatus::Succeeded => write!(f, "succeeded"),
            PaymentStatus::Failed => write!(f, "failed"),
        }
    }
}

impl PaymentStatus {
    /// Whether a payment in this status may be (re-)initialized. Only a
    /// failed payment may be retried; the other statuses map to their
    /// specific rejection.
    pub fn initializable(&self) -> Result<(), PaymentError> {
        match self {
            PaymentStatus::Initiated => Err(PaymentError::PaymentInFlight),
            PaymentStatus::InFlight => Err(PaymentError::PaymentAlreadyExists),
            PaymentStatus::Succeeded => Err(PaymentError::PaymentAlreadySucceeded),
            PaymentStatus::Failed => Ok(()),
        }
    }

    /// Whether HTLC outcomes may still be written. Updating stays legal
    /// while the payment is initiated or in flight, so a late settle or
    /// fail can complete its record even when the payment just turned
    /// terminal at the payment level.
    pub fn updatable(&self) -> Result<(), PaymentError> {
        match self {
            PaymentStatus::Initiated | PaymentStatus::InFlight => Ok(()),
            PaymentStatus::Succeeded => Err(PaymentError::PaymentAlreadySucceeded),
            PaymentStatus::Failed => Err(PaymentError::PaymentAlreadyFailed),
        }
    }

    /// Whether the whole payment may be deleted.
    pub fn removable(&self) -> Result<(), PaymentError> {
        match self {
            PaymentStatus::Initiated | PaymentStatus::InFlight => {
                Err(PaymentError::PaymentInFlight)
            }
            PaymentStatus::Succeeded | PaymentStatus::Failed => Ok(()),
        }
    }
}

/// Derived per-payment state, recomputed whenever the payment is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentState {
    /// Number of HTLCs with neither a settle nor a fail record.
    pub num_attempts_in_flight: usize,
    /// Amount still to be sent to reach the payment value.
    pub remaining_amt: Msat,
    /// Fees committed by the non-failed HTLCs.
    pub fees_paid: Msat,
    /// True once any HTLC settled.
    pub has_settled_htlc: bool,
    /// True once a payment-level failure reason was recorded.
    pub payment_failed: bool,
}

/// Derives the status from the HTLC set and the failure reason.
pub(crate) fn decide_payment_status(
    htlcs: &[HtlcAttempt],
    failure_reason: Option<&FailureReason>,
) -> PaymentStatus {
    let mut in_flight = false;
    let mut settled = false;
    for htlc in htlcs {
        if htlc.outcome.is_in_flight() {
            in_flight = true;
        }
        if htlc.outcome.is_settled() {
            settled = true;
        }
    }

    if htlcs.is_empty() && failure_reason.is_none() {
        PaymentStatus::Initiated
    } else if in_flight {
        PaymentStatus::InFlight
    } else if settled {
        PaymentStatus::Succeeded
    } else if failure_reason.is_some() {
        PaymentStatus::Failed
    } else {
        // Every shard failed but the payment was not given up on; the
        // payment may grow new shards.
        PaymentStatus::Initiated
    }
}

/// Checks the status-consistency rules. A violation means the stored
/// record contradicts itself and is surfaced as an internal error rather
/// than being silently repaired.
pub(crate) fn validate_state(
    status: PaymentStatus,
    state: &PaymentState,
    value: Msat,
) -> Result<(), PaymentError> {
    match status {
        PaymentStatus::Succeeded => {
            if state.remaining_amt != Msat::ZERO {
                return Err(PaymentError::PaymentInternal(format!(
                    "succeeded payment has remaining amount {}",
                    state.remaining_amt
                )));
            }
            if !state.has_settled_htlc {
                return Err(PaymentError::PaymentInternal(
                    "succeeded payment has no settled htlc".into(),
                ));
            }
        }
        PaymentStatus::Initiated => {
            if state.remaining_amt != value {
                return Err(PaymentError::PaymentInternal(format!(
                    "initiated payment has sent amount: remaining {} of {}",
                    state.remaining_amt, value
                )));
            }
        }
        PaymentStatus::Failed => {
            if state.num_attempts_in_flight != 0 {
                return Err(PaymentError::PaymentInternal(format!(
                    "failed payment has {} htlcs in flight",
                    state.num_attempts_in_flight
                )));
            }
            if state.remaining_amt == Msat::ZERO && state.has_settled_htlc {
                return Err(PaymentError::PaymentInternal(
                    "failed payment has settled the full amount".into(),
                ));
            }
        }
        PaymentStatus::InFlight => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initializable() {
        assert!(matches!(
            PaymentStatus::Initiated.initializable(),
            Err(PaymentError::PaymentInFlight)
        ));
        assert!(matches!(
            PaymentStatus::InFlight.initializable(),
            Err(PaymentError::PaymentAlreadyExists)
        ));
        assert!(matches!(
            PaymentStatus::Succeeded.initializable(),
            Err(PaymentError::PaymentAlreadySucceeded)
        ));
        assert!(PaymentStatus::Failed.initializable().is_ok());
    }

    #[test]
    fn test_updatable() {
        assert!(PaymentStatus::Initiated.updatable().is_ok());
        assert!(PaymentStatus::InFlight.updatable().is_ok());
        assert!(matches!(
            PaymentStatus::Succeeded.updatable(),
            Err(PaymentError::PaymentAlreadySucceeded)
        ));
        assert!(matches!(
            PaymentStatus::Failed.updatable(),
            Err(PaymentError::PaymentAlreadyFailed)
        ));
    }

    #[test]
    fn test_removable() {
        assert!(matches!(
            PaymentStatus::Initiated.removable(),
            Err(PaymentError::PaymentInFlight)
        ));
        assert!(matches!(
            PaymentStatus::InFlight.removable(),
            Err(PaymentError::PaymentInFlight)
        ));
        assert!(PaymentStatus::Succeeded.removable().is_ok());
        assert!(PaymentStatus::Failed.removable().is_ok());
    }

    #[test]
    fn test_status_display_and_serde() {
        assert_eq!(PaymentStatus::InFlight.to_string(), "in_flight");
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Succeeded).unwrap(),
            "\"succeeded\""
        );
        let status: PaymentStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(status, PaymentStatus::Failed);
    }

    #[test]
    fn test_validate_state_violations() {
        let state = PaymentState {
            num_attempts_in_flight: 0,
            remaining_amt: Msat::from_msat(10),
            fees_paid: Msat::ZERO,
            has_settled_htlc: true,
            payment_failed: false,
        };
        assert!(matches!(
            validate_state(PaymentStatus::Succeeded, &state, Msat::from_msat(100)),
            Err(PaymentError::PaymentInternal(_))
        ));

        let state = PaymentState {
            num_attempts_in_flight: 0,
            remaining_amt: Msat::from_msat(90),
            fees_paid: Msat::ZERO,
            has_settled_htlc: false,
            payment_failed: false,
        };
        assert!(matches!(
            validate_state(PaymentStatus::Initiated, &state, Msat::from_msat(100)),
            Err(PaymentError::PaymentInternal(_))
        ));

        let state = PaymentState {
            num_attempts_in_flight: 2,
            remaining_amt: Msat::from_msat(100),
            fees_paid: Msat::ZERO,
            has_settled_htlc: false,
            payment_failed: true,
        };
        assert!(matches!(
            validate_state(PaymentStatus::Failed, &state, Msat::from_msat(100)),
            Err(PaymentError::PaymentInternal(_))
        ));
    }
}
