//! Shared primitive types of the payment control store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{
    de::{Error, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

use crate::errors::PaymentError;

/// A monetary amount in milli-units (millisatoshi for Lightning payments).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Msat(pub u64);

impl Msat {
    pub const ZERO: Msat = Msat(0);

    /// Constructs a new `Msat` from a `u64` milli-unit value.
    pub const fn from_msat(msat: u64) -> Self {
        Msat(msat)
    }

    /// Returns the inner milli-unit value.
    pub const fn msat(&self) -> u64 {
        self.0
    }

    pub fn checked_add(self, other: Msat) -> Option<Msat> {
        self.0.checked_add(other.0).map(Msat)
    }

    pub fn checked_sub(self, other: Msat) -> Option<Msat> {
        self.0.checked_sub(other.0).map(Msat)
    }
}

impl core::fmt::Display for Msat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_msat", self.0)
    }
}

/// The 32-byte identifier of a payment: the payment hash for regular
/// payments and the set id for AMP payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PaymentIdentifier(pub [u8; 32]);

impl PaymentIdentifier {
    pub const SIZE: usize = 32;

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == Self::SIZE {
            let mut arr = [0u8; Self::SIZE];
            arr.copy_from_slice(bytes);
            Some(PaymentIdentifier(arr))
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for PaymentIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Serialize for PaymentIdentifier {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

struct PaymentIdentifierVisitor;

impl<'de> Visitor<'de> for PaymentIdentifierVisitor {
    type Value = PaymentIdentifier;

    fn expecting(&self, formatter: &mut core::fmt::Formatter) -> core::fmt::Result {
        formatter.write_str("a 64-character hex string")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: Error,
    {
        let bytes = hex::decode(value)
            .map_err(|e| Error::custom(format!("invalid hex '{}': {}", value, e)))?;
        PaymentIdentifier::from_slice(&bytes).ok_or_else(|| {
            Error::custom(format!(
                "payment identifier must be 32 bytes, got {}",
                bytes.len()
            ))
        })
    }

    fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
    where
        E: Error,
    {
        self.visit_str(&v)
    }
}

impl<'de> Deserialize<'de> for PaymentIdentifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(PaymentIdentifierVisitor)
    }
}

/// The 32-byte preimage of a settled HTLC. Serves as proof of payment.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Preimage(pub [u8; 32]);

impl Preimage {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 32 {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(bytes);
            Some(Preimage(arr))
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for Preimage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Preimage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Preimage({})", hex::encode(self.0))
    }
}

/// Cooperative cancellation handle for long-running read scans.
///
/// Mutating operations are atomic and cannot be interrupted once their
/// transaction has started; the scanning operations (in-flight listing,
/// query pagination, bulk deletion) check the token between records and
/// return [`PaymentError::Cancelled`] without leaving partial state behind.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<(), PaymentError> {
        if self.is_cancelled() {
            Err(PaymentError::Cancelled)
        } else {
            Ok(())
        }
    }
}
