//! Route and hop model.
//!
//! The store treats routes as mostly opaque: it persists them bit-exactly
//! and consults only the final hop's MPP/AMP/blinded attributes and the
//! amount accessors. Node keys stay raw 33-byte values; nothing on the
//! fetch path pays for elliptic-curve parsing.

use std::collections::BTreeMap;

use crate::primitives::Msat;

/// A raw 33-byte compressed node public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Vertex(pub [u8; 33]);

impl Vertex {
    pub const SIZE: usize = 33;

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == Self::SIZE {
            let mut arr = [0u8; Self::SIZE];
            arr.copy_from_slice(bytes);
            Some(Vertex(arr))
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }
}

impl std::fmt::Display for Vertex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// The MPP record of a final hop: correlates the shards of one logical
/// payment at the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MppRecord {
    /// Receiver-provided address shared by every shard of the payment.
    pub payment_addr: [u8; 32],
    /// Total amount the receiver should collect across all shards.
    pub total_msat: Msat,
}

/// The AMP record of a final hop. Stored and compared like an opaque MPP
/// sibling; the store never derives child hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmpRecord {
    pub root_share: [u8; 32],
    pub set_id: [u8; 32],
    pub child_index: u32,
}

/// One hop of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    /// The node this hop forwards to.
    pub pub_key: Vertex,
    /// Short channel id of the channel used for the hop.
    pub channel_id: u64,
    /// Absolute timelock of the outgoing HTLC.
    pub outgoing_time_lock: u32,
    /// Amount to forward to the next node.
    pub amt_to_forward: Msat,
    /// MPP record; only meaningful on the final hop.
    pub mpp: Option<MppRecord>,
    /// AMP record; only meaningful on the final hop.
    pub amp: Option<AmpRecord>,
    /// Encrypted recipient data of a blinded route. Non-empty on the final
    /// hop marks the whole payment as blinded.
    pub encrypted_data: Vec<u8>,
    /// Introduction blinding point, when this hop starts a blinded segment.
    pub blinding_point: Option<Vertex>,
    /// Total amount of a blinded payment as presented to the recipient.
    /// Zero when unused.
    pub total_amt_msat: Msat,
    /// Opaque metadata for the final hop.
    pub metadata: Vec<u8>,
    /// TLV records forwarded verbatim, ordered by type.
    pub custom_records: BTreeMap<u64, Vec<u8>>,
}

impl Hop {
    /// True when the hop carries encrypted recipient data.
    pub fn is_blinded(&self) -> bool {
        !self.encrypted_data.is_empty()
    }
}

/// An ordered route for one HTLC shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Timelock of the first (outgoing) HTLC.
    pub total_time_lock: u32,
    /// Amount leaving the sender, fees included.
    pub total_amt: Msat,
    /// The sending node.
    pub source_pub_key: Vertex,
    pub hops: Vec<Hop>,
}

impl Route {
    /// The hop reaching the receiver, if the route has any hops.
    pub fn final_hop(&self) -> Option<&Hop> {
        self.hops.last()
    }

    /// Amount that reaches the receiver. Zero for an empty route.
    pub fn receiver_amt(&self) -> Msat {
        self.hops.last().map_or(Msat::ZERO, |h| h.amt_to_forward)
    }

    /// Total routing fees: the difference between what leaves the sender
    /// and what reaches the receiver.
    pub fn total_fees(&self) -> Msat {
        self.total_amt
            .checked_sub(self.receiver_amt())
            .unwrap_or(Msat::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_hop(amt: u64) -> Hop {
        Hop {
            pub_key: Vertex([2u8; 33]),
            channel_id: 1,
            outgoing_time_lock: 100,
            amt_to_forward: Msat::from_msat(amt),
            mpp: None,
            amp: None,
            encrypted_data: Vec::new(),
            blinding_point: None,
            total_amt_msat: Msat::ZERO,
            metadata: Vec::new(),
            custom_records: BTreeMap::new(),
        }
    }

    #[test]
    fn test_receiver_amt_and_fees() {
        let route = Route {
            total_time_lock: 120,
            total_amt: Msat::from_msat(100_100),
            source_pub_key: Vertex([3u8; 33]),
            hops: vec![test_hop(100_050), test_hop(100_000)],
        };

        assert_eq!(route.receiver_amt(), Msat::from_msat(100_000));
        assert_eq!(route.total_fees(), Msat::from_msat(100));
        assert_eq!(
            route.final_hop().unwrap().amt_to_forward,
            Msat::from_msat(100_000)
        );
    }

    #[test]
    fn test_empty_route() {
        let route = Route {
            total_time_lock: 0,
            total_amt: Msat::ZERO,
            source_pub_key: Vertex([3u8; 33]),
            hops: Vec::new(),
        };

        assert!(route.final_hop().is_none());
        assert_eq!(route.receiver_amt(), Msat::ZERO);
        assert_eq!(route.total_fees(), Msat::ZERO);
    }

    #[test]
    fn test_blinded_detection() {
        let mut hop = test_hop(1);
        assert!(!hop.is_blinded());
        hop.encrypted_data = vec![0xDE, 0xAD];
        assert!(hop.is_blinded());
    }

    #[test]
    fn test_vertex_from_slice() {
        assert!(Vertex::from_slice(&[0u8; 33]).is_some());
        assert!(Vertex::from_slice(&[0u8; 32]).is_none());
    }
}
