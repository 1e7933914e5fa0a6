//! The transport PDU and its deterministic wire codec (§3, §4.1, §6).

use crate::addr::{Port, Vip};
use std::fmt;

/// Maximum segment size: the largest payload a single data segment may
/// carry (§4.2).
pub const MSS: usize = 4096;

/// Bit flags carried by a [`Segment`]. Any combination is legal per the
/// data model, though in practice only SYN, SYN+ACK, ACK, FIN, and FIN+ACK
/// combinations are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
}

impl Flags {
    pub const NONE: Self = Self { syn: false, ack: false, fin: false };
    pub const SYN: Self = Self { syn: true, ack: false, fin: false };
    pub const SYN_ACK: Self = Self { syn: true, ack: true, fin: false };
    pub const ACK: Self = Self { syn: false, ack: true, fin: false };
    pub const FIN: Self = Self { syn: false, ack: false, fin: true };

    fn to_byte(self, seq: bool, more: bool) -> u8 {
        let mut b = 0u8;
        if self.syn {
            b |= 0b0000_0001;
        }
        if self.ack {
            b |= 0b0000_0010;
        }
        if self.fin {
            b |= 0b0000_0100;
        }
        if seq {
            b |= 0b0000_1000;
        }
        if more {
            b |= 0b0001_0000;
        }
        b
    }

    fn from_byte(b: u8) -> (Self, bool, bool) {
        let flags = Self {
            syn: b & 0b0000_0001 != 0,
            ack: b & 0b0000_0010 != 0,
            fin: b & 0b0000_0100 != 0,
        };
        let seq = b & 0b0000_1000 != 0;
        let more = b & 0b0001_0000 != 0;
        (flags, seq, more)
    }
}

/// The transport PDU (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub source_vip: Vip,
    pub dest_vip: Vip,
    pub source_port: Port,
    pub dest_port: Port,
    pub flags: Flags,
    /// The alternating-bit sequence number used by stop-and-wait.
    pub seq: bool,
    /// True if another fragment of the same message follows.
    pub more: bool,
    pub payload: Vec<u8>,
}

impl Segment {
    /// Builds a control segment (SYN / SYN+ACK / ACK / FIN / FIN+ACK):
    /// no payload, `seq` and `more` are meaningless and set to `false`.
    pub fn control(
        source_vip: Vip,
        dest_vip: Vip,
        source_port: Port,
        dest_port: Port,
        flags: Flags,
    ) -> Self {
        Self {
            source_vip,
            dest_vip,
            source_port,
            dest_port,
            flags,
            seq: false,
            more: false,
            payload: Vec::new(),
        }
    }

    /// Builds a data segment carrying up to [`MSS`] bytes.
    #[allow(clippy::too_many_arguments)]
    pub fn data(
        source_vip: Vip,
        dest_vip: Vip,
        source_port: Port,
        dest_port: Port,
        seq: bool,
        more: bool,
        payload: Vec<u8>,
    ) -> Self {
        debug_assert!(payload.len() <= MSS);
        Self {
            source_vip,
            dest_vip,
            source_port,
            dest_port,
            flags: Flags::NONE,
            seq,
            more,
            payload,
        }
    }

    pub fn is_data(&self) -> bool {
        !self.flags.syn && !self.flags.fin
    }

    /// Encodes the segment into its wire representation: a fixed address
    /// and flags header followed by a length-prefixed payload (§4.1, §6).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.payload.len());
        encode_label(&mut out, self.source_vip.as_str());
        encode_label(&mut out, self.dest_vip.as_str());
        out.extend_from_slice(&self.source_port.get().to_be_bytes());
        out.extend_from_slice(&self.dest_port.get().to_be_bytes());
        out.push(self.flags.to_byte(self.seq, self.more));
        out.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decodes a segment, failing with [`BadFormat`] for any malformed
    /// input. Total over well-formed inputs, as required by §4.1.
    pub fn decode(bytes: &[u8]) -> Result<Self, BadFormat> {
        let mut cursor = Cursor { bytes, pos: 0 };
        let source_vip = Vip::new(decode_label(&mut cursor)?);
        let dest_vip = Vip::new(decode_label(&mut cursor)?);
        let source_port = Port::new(cursor.take_u16()?).map_err(|_| BadFormat)?;
        let dest_port = Port::new(cursor.take_u16()?).map_err(|_| BadFormat)?;
        let flags_byte = cursor.take_u8()?;
        let (flags, seq, more) = Flags::from_byte(flags_byte);
        let payload_len = cursor.take_u16()? as usize;
        let payload = cursor.take_n(payload_len)?.to_vec();
        if !cursor.is_empty() {
            return Err(BadFormat);
        }
        Ok(Self {
            source_vip,
            dest_vip,
            source_port,
            dest_port,
            flags,
            seq,
            more,
            payload,
        })
    }
}

fn encode_label(out: &mut Vec<u8>, label: &str) {
    let bytes = label.as_bytes();
    debug_assert!(bytes.len() <= u8::MAX as usize);
    out.push(bytes.len() as u8);
    out.extend_from_slice(bytes);
}

fn decode_label(cursor: &mut Cursor) -> Result<String, BadFormat> {
    let len = cursor.take_u8()? as usize;
    let bytes = cursor.take_n(len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| BadFormat)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }

    fn take_n(&mut self, n: usize) -> Result<&'a [u8], BadFormat> {
        let end = self.pos.checked_add(n).ok_or(BadFormat)?;
        let slice = self.bytes.get(self.pos..end).ok_or(BadFormat)?;
        self.pos = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, BadFormat> {
        Ok(self.take_n(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16, BadFormat> {
        let b = self.take_n(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }
}

/// An undecodable segment (§4.1, §7): dropped locally without affecting
/// connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadFormat;

impl fmt::Display for BadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("segment could not be decoded")
    }
}

impl std::error::Error for BadFormat {}

impl From<BadFormat> for crate::error::TransportError {
    fn from(_: BadFormat) -> Self {
        crate::error::TransportError::BadFormat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Segment {
        Segment::data(
            Vip::new("HOST_A"),
            Vip::new("HOST_B"),
            Port::new(10000).unwrap(),
            Port::new(10002).unwrap(),
            true,
            false,
            b"hello".to_vec(),
        )
    }

    #[test]
    fn round_trip_data_segment() {
        let s = sample();
        let encoded = s.encode();
        let decoded = Segment::decode(&encoded).unwrap();
        assert_eq!(s, decoded);
    }

    #[test]
    fn round_trip_control_segment() {
        let s = Segment::control(
            Vip::new("HOST_A"),
            Vip::new("SERVER"),
            Port::new(10000).unwrap(),
            Port::new(10002).unwrap(),
            Flags::SYN_ACK,
        );
        let encoded = s.encode();
        let decoded = Segment::decode(&encoded).unwrap();
        assert_eq!(s, decoded);
        assert!(decoded.flags.syn && decoded.flags.ack && !decoded.flags.fin);
    }

    #[test]
    fn round_trip_empty_payload() {
        let s = Segment::data(
            Vip::new("A"),
            Vip::new("B"),
            Port::new(1).unwrap(),
            Port::new(2).unwrap(),
            false,
            false,
            Vec::new(),
        );
        assert_eq!(Segment::decode(&s.encode()).unwrap(), s);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let s = sample();
        let mut encoded = s.encode();
        encoded.truncate(encoded.len() - 1);
        assert_eq!(Segment::decode(&encoded), Err(BadFormat));
    }

    #[test]
    fn decode_rejects_trailing_garbage() {
        let s = sample();
        let mut encoded = s.encode();
        encoded.push(0xFF);
        assert_eq!(Segment::decode(&encoded), Err(BadFormat));
    }

    #[test]
    fn decode_rejects_empty_input() {
        assert_eq!(Segment::decode(&[]), Err(BadFormat));
    }
}
