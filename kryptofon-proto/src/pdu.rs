//! The 12-byte-header protocol data unit carried over the datagram
//! channel (`kryptofon-client::datagram`), one per 20 ms voice frame.
//!
//! Fixed-size header fields followed by an opaque body, with bit-packed
//! call numbers and dual sequence counters.

use crate::call::CallContext;
use crate::octets::{OctetBuffer, OutOfRange};
use std::fmt;

/// Call numbers this build fixes to a single value pair (§3: "this
/// implementation fixes them to a single (source=0x3141,
/// destination=0x5926) pair per peer, reflecting a single-call-per-peer
/// constraint").
pub const FIXED_SRC_CALL: u16 = 0x3141;
pub const FIXED_DST_CALL: u16 = 0x5926;

const HEADER_LEN: usize = 12;
const F_BIT: u16 = 0x8000;
const R_BIT: u16 = 0x8000;
const CALL_MASK: u16 = 0x7fff;

/// PDU type byte (byte 10 of the header).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PduType {
    Voice,
    Unknown(u8),
}

impl From<u8> for PduType {
    fn from(v: u8) -> Self {
        match v {
            0x02 => PduType::Voice,
            other => PduType::Unknown(other),
        }
    }
}

impl From<PduType> for u8 {
    fn from(t: PduType) -> u8 {
        match t {
            PduType::Voice => 0x02,
            PduType::Unknown(v) => v,
        }
    }
}

/// PDU subclass byte (byte 11 of the header) — the audio codec in use
/// for `PduType::Voice`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Subclass {
    Lin16,
    Alaw,
    Ulaw,
    Unknown(u8),
}

impl From<u8> for Subclass {
    fn from(v: u8) -> Self {
        match v {
            0x01 => Subclass::Lin16,
            0x02 => Subclass::Alaw,
            0x03 => Subclass::Ulaw,
            other => Subclass::Unknown(other),
        }
    }
}

impl From<Subclass> for u8 {
    fn from(s: Subclass) -> u8 {
        match s {
            Subclass::Lin16 => 0x01,
            Subclass::Alaw => 0x02,
            Subclass::Ulaw => 0x03,
            Subclass::Unknown(v) => v,
        }
    }
}

/// Errors arising from parsing a received datagram as a PDU.
#[derive(Debug)]
pub enum PduError {
    TooShort { len: usize },
    Octet(OutOfRange),
}

impl fmt::Display for PduError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PduError::TooShort { len } => {
                write!(f, "PDU shorter than the {HEADER_LEN}-byte header ({len} bytes)")
            }
            PduError::Octet(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PduError {}

impl From<OutOfRange> for PduError {
    fn from(e: OutOfRange) -> Self {
        PduError::Octet(e)
    }
}

/// A parsed (or about-to-be-sent) protocol data unit.
#[derive(Debug, Clone)]
pub struct Pdu {
    /// Source call number with the F bit already stripped.
    pub src_call: u16,
    /// Destination call number with the R bit already stripped.
    pub dst_call: u16,
    /// F bit observed on parse (always set on our own sends).
    pub f_bit: bool,
    /// R bit observed on parse (always clear on our own sends).
    pub r_bit: bool,
    /// 32-bit wrapping timestamp, widened to a `u64` for arithmetic.
    pub timestamp: u64,
    pub out_seq: u8,
    pub in_seq: u8,
    pub pdu_type: PduType,
    pub subclass: Subclass,
    pub payload: Vec<u8>,
}

impl Pdu {
    /// Parse a received datagram. Unknown `pdu_type`/`subclass` bytes
    /// parse fine — only their *handling* at the call context is a no-op
    /// (§4.6: "Unknown types produce a PDU whose arrival handler only
    /// logs").
    pub fn parse(bytes: &[u8]) -> Result<Pdu, PduError> {
        if bytes.len() < HEADER_LEN {
            return Err(PduError::TooShort { len: bytes.len() });
        }

        let mut buf = OctetBuffer::wrap(bytes.to_vec());
        let raw_src = buf.read_u16()?;
        let raw_dst = buf.read_u16()?;
        let timestamp = buf.read_u32()? as u64;
        let out_seq = buf.read_u8()?;
        let in_seq = buf.read_u8()?;
        let pdu_type = PduType::from(buf.read_u8()?);
        let subclass = Subclass::from(buf.read_u8()?);
        let payload = buf.get_bytes(bytes.len() - HEADER_LEN)?;

        Ok(Pdu {
            src_call: raw_src & CALL_MASK,
            dst_call: raw_dst & CALL_MASK,
            f_bit: raw_src & F_BIT != 0,
            r_bit: raw_dst & R_BIT != 0,
            timestamp,
            out_seq,
            in_seq,
            pdu_type,
            subclass,
            payload,
        })
    }

    /// Build an outbound PDU for `call`, consuming one outbound sequence
    /// number (§4.6: `sendPayload`). `timestamp` is truncated to 32 bits
    /// on encode — callers pass the full-width running clock.
    pub fn for_send(
        call: &mut CallContext,
        pdu_type: PduType,
        subclass: Subclass,
        timestamp: u64,
        payload: Vec<u8>,
    ) -> Pdu {
        Pdu {
            src_call: call.src_call(),
            dst_call: call.dst_call(),
            f_bit: true,
            r_bit: false,
            timestamp,
            out_seq: call.next_out(),
            in_seq: call.current_in(),
            pdu_type,
            subclass,
            payload,
        }
    }

    /// Serialize to the 12-byte header plus payload, ready for the
    /// datagram channel to encrypt and send. The F bit is always set on
    /// the source call number; the R bit is always clear on the
    /// destination, matching the original convention (§4.6).
    pub fn encode(&self) -> Result<Vec<u8>, OutOfRange> {
        let mut buf = OctetBuffer::allocate(HEADER_LEN + self.payload.len());
        buf.write_u16((self.src_call & CALL_MASK) | F_BIT)?;
        buf.write_u16(self.dst_call & CALL_MASK)?;
        buf.write_u32((self.timestamp & 0xffff_ffff) as u32)?;
        buf.write_u8(self.out_seq)?;
        buf.write_u8(self.in_seq)?;
        buf.write_u8(self.pdu_type.into())?;
        buf.write_u8(self.subclass.into())?;
        buf.put_bytes(&self.payload)?;
        Ok(buf.slice().to_vec())
    }

    /// Does this PDU belong to our fixed single-call pairing, as seen
    /// from the receiving side (destination is our fixed source call and
    /// vice versa)?
    pub fn matches_fixed_call(&self) -> bool {
        self.dst_call == FIXED_SRC_CALL && self.src_call == FIXED_DST_CALL
    }

    /// Split a voice PDU's payload into its audio sample, discarding
    /// anything beyond `sample_size` bytes (§4.6).
    pub fn voice_sample(&self, sample_size: usize) -> Option<&[u8]> {
        if !matches!(self.pdu_type, PduType::Voice) {
            return None;
        }
        self.payload.get(..sample_size.min(self.payload.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallContext;

    fn sample_pdu(src: u16, dst: u16, ts: u64, out_seq: u8, in_seq: u8, payload: Vec<u8>) -> Pdu {
        Pdu {
            src_call: src,
            dst_call: dst,
            f_bit: true,
            r_bit: false,
            timestamp: ts,
            out_seq,
            in_seq,
            pdu_type: PduType::Voice,
            subclass: Subclass::Alaw,
            payload,
        }
    }

    #[test]
    fn framing_round_trip() {
        for &(src, dst) in &[(0u16, 0u16), (0x3141, 0x5926), (0x7fff, 0x7fff)] {
            for &ts in &[0u64, 1, 0xffff_ffff] {
                let pdu = sample_pdu(src, dst, ts, 5, 6, vec![1, 2, 3, 4]);
                let bytes = pdu.encode().unwrap();
                let parsed = Pdu::parse(&bytes).unwrap();
                assert_eq!(parsed.src_call, src);
                assert_eq!(parsed.dst_call, dst);
                assert_eq!(parsed.timestamp, ts);
                assert_eq!(parsed.out_seq, 5);
                assert_eq!(parsed.in_seq, 6);
                assert_eq!(parsed.payload, vec![1, 2, 3, 4]);
                assert!(parsed.f_bit);
                assert!(!parsed.r_bit);
            }
        }
    }

    #[test]
    fn too_short_is_rejected() {
        assert!(Pdu::parse(&[0u8; 11]).is_err());
    }

    #[test]
    fn sequence_numbers_are_consecutive_mod_256() {
        let mut call = CallContext::new(0);
        let mut prev = None;
        for _ in 0..512 {
            let pdu = Pdu::for_send(&mut call, PduType::Voice, Subclass::Alaw, 0, vec![]);
            if let Some(p) = prev {
                assert_eq!(pdu.out_seq, p.wrapping_add(1));
            }
            prev = Some(pdu.out_seq);
        }
    }

    #[test]
    fn voice_sample_splits_payload() {
        let pdu = sample_pdu(FIXED_DST_CALL, FIXED_SRC_CALL, 0, 0, 0, vec![1, 2, 3, 4, 5]);
        assert_eq!(pdu.voice_sample(3), Some(&[1u8, 2, 3][..]));
        assert!(pdu.matches_fixed_call());
    }
}
