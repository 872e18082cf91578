//! Bit-exact serialization of the persisted entities.
//!
//! All integers are big-endian. The formats are purely additive: decoders
//! read the fields they know and tolerate unknown trailing bytes, so a
//! newer writer never breaks an older reader. Timestamps are unix
//! nanoseconds; the stored value zero stands for the zero time and
//! encoders emit zero for it, never a current-time default.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

use crate::core::payment::{
    FailureReason, HtlcAttemptInfo, HtlcFailInfo, HtlcFailReason, HtlcSettleInfo,
    PaymentCreationInfo, SessionKey,
};
use crate::core::route::{AmpRecord, Hop, MppRecord, Route, Vertex};
use crate::primitives::{Msat, PaymentIdentifier, Preimage};

/// Errors raised while decoding (or, rarely, encoding) persisted records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unexpected end of record")]
    UnexpectedEof,

    #[error("record i/o: {0}")]
    Io(String),

    #[error("unknown payment index type: {0}")]
    UnknownIndexType(u8),

    #[error("unknown failure reason: {0}")]
    UnknownFailureReason(u8),

    #[error("unknown htlc fail reason: {0}")]
    UnknownHtlcFailReason(u8),

    #[error("invalid presence marker: {0}")]
    InvalidPresenceByte(u8),

    #[error("invalid session key")]
    InvalidSessionKey,

    #[error("{field} too long for encoding: {len}")]
    FieldTooLong { field: &'static str, len: usize },
}

impl From<std::io::Error> for CodecError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            CodecError::UnexpectedEof
        } else {
            CodecError::Io(e.to_string())
        }
    }
}

/// Index type tag for sequence-number index entries that map to a payment
/// hash. The only type currently written.
const INDEX_TYPE_HASH: u8 = 0;

/// The zero value persisted timestamps decode to.
pub fn zero_time() -> DateTime<Utc> {
    Utc.timestamp_nanos(0)
}

// ============================================================================
// Shared helpers
// ============================================================================

fn write_time<W: Write>(w: &mut W, t: &DateTime<Utc>) -> Result<(), CodecError> {
    let nanos = t.timestamp_nanos_opt().unwrap_or(0);
    w.write_u64::<BigEndian>(nanos as u64)?;
    Ok(())
}

fn read_time<R: Read>(r: &mut R) -> Result<DateTime<Utc>, CodecError> {
    let nanos = r.read_u64::<BigEndian>()?;
    Ok(Utc.timestamp_nanos(nanos as i64))
}

fn write_var_bytes<W: Write>(
    w: &mut W,
    field: &'static str,
    bytes: &[u8],
) -> Result<(), CodecError> {
    if bytes.len() > u16::MAX as usize {
        return Err(CodecError::FieldTooLong {
            field,
            len: bytes.len(),
        });
    }
    w.write_u16::<BigEndian>(bytes.len() as u16)?;
    w.write_all(bytes)?;
    Ok(())
}

fn read_var_bytes<R: Read>(r: &mut R) -> Result<Vec<u8>, CodecError> {
    let len = r.read_u16::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_array<const N: usize, R: Read>(r: &mut R) -> Result<[u8; N], CodecError> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn write_presence<W: Write>(w: &mut W, present: bool) -> Result<(), CodecError> {
    w.write_u8(u8::from(present))?;
    Ok(())
}

fn read_presence<R: Read>(r: &mut R) -> Result<bool, CodecError> {
    match r.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(CodecError::InvalidPresenceByte(other)),
    }
}

fn write_custom_records<W: Write>(
    w: &mut W,
    records: &BTreeMap<u64, Vec<u8>>,
) -> Result<(), CodecError> {
    if records.len() > u16::MAX as usize {
        return Err(CodecError::FieldTooLong {
            field: "custom records",
            len: records.len(),
        });
    }
    w.write_u16::<BigEndian>(records.len() as u16)?;
    // BTreeMap iteration yields ascending keys, as the format requires.
    for (key, value) in records {
        w.write_u64::<BigEndian>(*key)?;
        write_var_bytes(w, "custom record value", value)?;
    }
    Ok(())
}

fn read_custom_records<R: Read>(r: &mut R) -> Result<BTreeMap<u64, Vec<u8>>, CodecError> {
    let count = r.read_u16::<BigEndian>()? as usize;
    let mut records = BTreeMap::new();
    for _ in 0..count {
        let key = r.read_u64::<BigEndian>()?;
        let value = read_var_bytes(r)?;
        records.insert(key, value);
    }
    Ok(records)
}

// ============================================================================
// Creation info
// ============================================================================

pub(crate) fn encode_creation_info(info: &PaymentCreationInfo) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    buf.write_all(info.payment_identifier.as_bytes())?;
    buf.write_u64::<BigEndian>(info.value.msat())?;
    write_time(&mut buf, &info.creation_time)?;
    write_var_bytes(&mut buf, "payment request", &info.payment_request)?;
    write_custom_records(&mut buf, &info.first_hop_custom_records)?;
    Ok(buf)
}

pub(crate) fn decode_creation_info(bytes: &[u8]) -> Result<PaymentCreationInfo, CodecError> {
    let mut r = Cursor::new(bytes);
    let identifier = read_array::<32, _>(&mut r)?;
    let value = Msat::from_msat(r.read_u64::<BigEndian>()?);
    let creation_time = read_time(&mut r)?;
    let payment_request = read_var_bytes(&mut r)?;
    let first_hop_custom_records = read_custom_records(&mut r)?;
    Ok(PaymentCreationInfo {
        payment_identifier: PaymentIdentifier(identifier),
        value,
        creation_time,
        payment_request,
        first_hop_custom_records,
    })
}

// ============================================================================
// Settle / fail info
// ============================================================================

pub(crate) fn encode_settle_info(info: &HtlcSettleInfo) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    buf.write_all(info.preimage.as_bytes())?;
    write_time(&mut buf, &info.settle_time)?;
    Ok(buf)
}

pub(crate) fn decode_settle_info(bytes: &[u8]) -> Result<HtlcSettleInfo, CodecError> {
    let mut r = Cursor::new(bytes);
    let preimage = read_array::<32, _>(&mut r)?;
    let settle_time = read_time(&mut r)?;
    Ok(HtlcSettleInfo {
        preimage: Preimage(preimage),
        settle_time,
    })
}

pub(crate) fn encode_fail_info(info: &HtlcFailInfo) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    write_time(&mut buf, &info.fail_time)?;
    write_var_bytes(&mut buf, "wire failure message", &info.message)?;
    buf.write_u8(info.reason.to_u8())?;
    buf.write_u32::<BigEndian>(info.failure_source_index)?;
    Ok(buf)
}

pub(crate) fn decode_fail_info(bytes: &[u8]) -> Result<HtlcFailInfo, CodecError> {
    let mut r = Cursor::new(bytes);
    let fail_time = read_time(&mut r)?;
    let message = read_var_bytes(&mut r)?;
    let reason_byte = r.read_u8()?;
    let reason = HtlcFailReason::from_u8(reason_byte)
        .ok_or(CodecError::UnknownHtlcFailReason(reason_byte))?;
    let failure_source_index = r.read_u32::<BigEndian>()?;
    Ok(HtlcFailInfo {
        fail_time,
        message,
        reason,
        failure_source_index,
    })
}

// ============================================================================
// Payment-level failure reason
// ============================================================================

pub(crate) fn encode_failure_reason(reason: FailureReason) -> Vec<u8> {
    vec![reason.to_u8()]
}

pub(crate) fn decode_failure_reason(bytes: &[u8]) -> Result<FailureReason, CodecError> {
    let mut r = Cursor::new(bytes);
    let byte = r.read_u8()?;
    FailureReason::from_u8(byte).ok_or(CodecError::UnknownFailureReason(byte))
}

// ============================================================================
// Index entries
// ============================================================================

pub(crate) fn encode_index_entry(identifier: &PaymentIdentifier) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    buf.write_u8(INDEX_TYPE_HASH)?;
    buf.write_all(identifier.as_bytes())?;
    Ok(buf)
}

pub(crate) fn decode_index_entry(bytes: &[u8]) -> Result<PaymentIdentifier, CodecError> {
    let mut r = Cursor::new(bytes);
    let index_type = r.read_u8()?;
    if index_type != INDEX_TYPE_HASH {
        return Err(CodecError::UnknownIndexType(index_type));
    }
    let identifier = read_array::<32, _>(&mut r)?;
    Ok(PaymentIdentifier(identifier))
}

// ============================================================================
// HTLC attempt info
// ============================================================================

pub(crate) fn encode_attempt_info(info: &HtlcAttemptInfo) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    buf.write_u64::<BigEndian>(info.attempt_id)?;
    // Raw key bytes; the scalar is only ever parsed on demand.
    buf.write_all(info.session_key.raw())?;
    write_time(&mut buf, &info.attempt_time)?;
    write_presence(&mut buf, info.hash.is_some())?;
    if let Some(hash) = &info.hash {
        buf.write_all(hash)?;
    }
    write_route(&mut buf, &info.route)?;
    Ok(buf)
}

pub(crate) fn decode_attempt_info(bytes: &[u8]) -> Result<HtlcAttemptInfo, CodecError> {
    let mut r = Cursor::new(bytes);
    let attempt_id = r.read_u64::<BigEndian>()?;
    let session_key = SessionKey::from_raw(read_array::<32, _>(&mut r)?);
    let attempt_time = read_time(&mut r)?;
    let hash = if read_presence(&mut r)? {
        Some(read_array::<32, _>(&mut r)?)
    } else {
        None
    };
    let route = read_route(&mut r)?;
    Ok(HtlcAttemptInfo {
        attempt_id,
        session_key,
        route,
        attempt_time,
        hash,
    })
}

// ============================================================================
// Routes
// ============================================================================

fn write_route<W: Write>(w: &mut W, route: &Route) -> Result<(), CodecError> {
    if route.hops.len() > u16::MAX as usize {
        return Err(CodecError::FieldTooLong {
            field: "route hops",
            len: route.hops.len(),
        });
    }
    w.write_u32::<BigEndian>(route.total_time_lock)?;
    w.write_u64::<BigEndian>(route.total_amt.msat())?;
    w.write_all(route.source_pub_key.as_bytes())?;
    w.write_u16::<BigEndian>(route.hops.len() as u16)?;
    for hop in &route.hops {
        write_hop(w, hop)?;
    }
    Ok(())
}

fn read_route<R: Read>(r: &mut R) -> Result<Route, CodecError> {
    let total_time_lock = r.read_u32::<BigEndian>()?;
    let total_amt = Msat::from_msat(r.read_u64::<BigEndian>()?);
    let source_pub_key = Vertex(read_array::<33, _>(r)?);
    let hop_count = r.read_u16::<BigEndian>()? as usize;
    let mut hops = Vec::with_capacity(hop_count);
    for _ in 0..hop_count {
        hops.push(read_hop(r)?);
    }
    Ok(Route {
        total_time_lock,
        total_amt,
        source_pub_key,
        hops,
    })
}

fn write_hop<W: Write>(w: &mut W, hop: &Hop) -> Result<(), CodecError> {
    w.write_all(hop.pub_key.as_bytes())?;
    w.write_u64::<BigEndian>(hop.channel_id)?;
    w.write_u32::<BigEndian>(hop.outgoing_time_lock)?;
    w.write_u64::<BigEndian>(hop.amt_to_forward.msat())?;

    write_presence(w, hop.mpp.is_some())?;
    if let Some(mpp) = &hop.mpp {
        w.write_all(&mpp.payment_addr)?;
        w.write_u64::<BigEndian>(mpp.total_msat.msat())?;
    }

    write_presence(w, hop.amp.is_some())?;
    if let Some(amp) = &hop.amp {
        w.write_all(&amp.root_share)?;
        w.write_all(&amp.set_id)?;
        w.write_u32::<BigEndian>(amp.child_index)?;
    }

    write_var_bytes(w, "encrypted data", &hop.encrypted_data)?;

    write_presence(w, hop.blinding_point.is_some())?;
    if let Some(point) = &hop.blinding_point {
        w.write_all(point.as_bytes())?;
    }

    w.write_u64::<BigEndian>(hop.total_amt_msat.msat())?;
    write_var_bytes(w, "hop metadata", &hop.metadata)?;
    write_custom_records(w, &hop.custom_records)?;
    Ok(())
}

fn read_hop<R: Read>(r: &mut R) -> Result<Hop, CodecError> {
    let pub_key = Vertex(read_array::<33, _>(r)?);
    let channel_id = r.read_u64::<BigEndian>()?;
    let outgoing_time_lock = r.read_u32::<BigEndian>()?;
    let amt_to_forward = Msat::from_msat(r.read_u64::<BigEndian>()?);

    let mpp = if read_presence(r)? {
        let payment_addr = read_array::<32, _>(r)?;
        let total_msat = Msat::from_msat(r.read_u64::<BigEndian>()?);
        Some(MppRecord {
            payment_addr,
            total_msat,
        })
    } else {
        None
    };

    let amp = if read_presence(r)? {
        let root_share = read_array::<32, _>(r)?;
        let set_id = read_array::<32, _>(r)?;
        let child_index = r.read_u32::<BigEndian>()?;
        Some(AmpRecord {
            root_share,
            set_id,
            child_index,
        })
    } else {
        None
    };

    let encrypted_data = read_var_bytes(r)?;

    let blinding_point = if read_presence(r)? {
        Some(Vertex(read_array::<33, _>(r)?))
    } else {
        None
    };

    let total_amt_msat = Msat::from_msat(r.read_u64::<BigEndian>()?);
    let metadata = read_var_bytes(r)?;
    let custom_records = read_custom_records(r)?;

    Ok(Hop {
        pub_key,
        channel_id,
        outgoing_time_lock,
        amt_to_forward,
        mpp,
        amp,
        encrypted_data,
        blinding_point,
        total_amt_msat,
        metadata,
        custom_records,
    })
}
