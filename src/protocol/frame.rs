//! MAC frame layout shared by nodes and the gateway.
//!
//! ```text
//!   1     1  |   1   |    2   |    2   |    2    |      ...      |  # of bytes per field
//!   0     1  |   2   |  3-4   |  5-6   |  7-8    |       9+      |  byte # in frame
//! +-----+-----+-------+--------+--------+---------+---------------+
//! | FCF | FCA | SEQNO | DSTPAN | SRCPAN | SRCADDR |    payload    |
//! +-----+-----+-------+--------+--------+---------+---------------+
//! ```
//!
//! Header fields are little-endian. Application values inside the payload
//! (the temperature) are big-endian.

use bytes::{BufMut, Bytes, BytesMut};
use packed_struct::prelude::*;
use thiserror::Error;

use super::addresses::{FCA_SRC_SADDR, FCF_DATA};

/// Length of the fixed addressing header.
pub const HEADER_LEN: usize = 9;

/// Offset of the sequence number.
pub const SEQUENCE_OFFSET: usize = 2;

/// Offset of the little-endian source short address.
pub const SRC_ADDR_OFFSET: usize = 7;

/// Length of a temperature field inside a payload.
pub const TEMPERATURE_LEN: usize = 2;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short ({len} bytes, need at least {min})")]
    FrameTooShort { len: usize, min: usize },

    #[error("payload too short for temperature at offset {offset} ({len} bytes)")]
    PayloadTooShort { len: usize, offset: usize },

    #[error("failed to pack frame header: {0}")]
    Packing(String),
}

#[derive(PackedStruct, Debug, Clone, Copy, PartialEq, Eq)]
#[packed_struct(bit_numbering = "msb0")]
pub struct FrameHeader {
    #[packed_field(bytes = "0")]
    pub frame_control: u8,

    #[packed_field(bytes = "1")]
    pub frame_control_ack: u8,

    #[packed_field(bytes = "2")]
    pub sequence: u8,

    #[packed_field(bytes = "3..=4", endian = "lsb")]
    pub dst_pan: u16,

    #[packed_field(bytes = "5..=6", endian = "lsb")]
    pub src_pan: u16,

    #[packed_field(bytes = "7..=8", endian = "lsb")]
    pub src_addr: u16,
}

impl FrameHeader {
    /// Header of a data frame addressed by source short address.
    pub fn data(sequence: u8, dst_pan: u16, src_pan: u16, src_addr: u16) -> Self {
        Self {
            frame_control: FCF_DATA,
            frame_control_ack: FCA_SRC_SADDR,
            sequence,
            dst_pan,
            src_pan,
            src_addr,
        }
    }
}

/// Encoder/decoder for the fixed frame layout.
///
/// `payload_offset` skips an application port header placed in front of the
/// payload by some deployments. It is a configuration constant agreed by both
/// ends, never negotiated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCodec {
    pub payload_offset: usize,
}

impl FrameCodec {
    pub fn new(payload_offset: usize) -> Self {
        Self { payload_offset }
    }

    /// Build a data frame. The payload is appended verbatim.
    pub fn encode(
        &self,
        sequence: u8,
        dst_pan: u16,
        src_pan: u16,
        src_addr: u16,
        payload: &[u8],
    ) -> Result<Bytes, FrameError> {
        let header = FrameHeader::data(sequence, dst_pan, src_pan, src_addr)
            .pack()
            .map_err(|err| FrameError::Packing(format!("{err:?}")))?;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        buf.put(&header[..]);
        buf.put(payload);

        Ok(buf.freeze())
    }

    /// Split a received frame into its source short address and payload.
    pub fn decode<'a>(&self, frame: &'a [u8]) -> Result<(u16, &'a [u8]), FrameError> {
        let min = HEADER_LEN.saturating_add(self.payload_offset);
        if frame.len() < min {
            return Err(FrameError::FrameTooShort { len: frame.len(), min });
        }

        let src_addr = u16::from_le_bytes([frame[SRC_ADDR_OFFSET], frame[SRC_ADDR_OFFSET + 1]]);

        Ok((src_addr, &frame[min..]))
    }

    /// Unpack the whole addressing header.
    pub fn header(&self, frame: &[u8]) -> Result<FrameHeader, FrameError> {
        let raw: &[u8; HEADER_LEN] = frame
            .get(..HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or(FrameError::FrameTooShort { len: frame.len(), min: HEADER_LEN })?;

        FrameHeader::unpack(raw).map_err(|err| FrameError::Packing(format!("{err:?}")))
    }
}

/// Read the big-endian temperature at `offset` within a payload.
///
/// The value is returned as sent, without calibration. It is interpreted as a
/// signed 16-bit quantity so below-zero readings survive the trip.
pub fn decode_temperature(payload: &[u8], offset: usize) -> Result<i32, FrameError> {
    let field = offset
        .checked_add(TEMPERATURE_LEN)
        .and_then(|end| payload.get(offset..end))
        .ok_or(FrameError::PayloadTooShort { len: payload.len(), offset })?;

    Ok(i16::from_be_bytes([field[0], field[1]]) as i32)
}

/// Build a payload of `len` bytes with `celsius` big-endian at `offset`.
///
/// `len` is raised to fit the field if needed; other bytes are zero. `offset`
/// is bounded by `NodeConfig::validate`.
pub fn encode_temperature(celsius: i32, offset: usize, len: usize) -> Bytes {
    let len = len.max(offset + TEMPERATURE_LEN);
    let mut payload = BytesMut::zeroed(len);

    let value = celsius.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    payload[offset..offset + TEMPERATURE_LEN].copy_from_slice(&value.to_be_bytes());

    payload.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::addresses::*;

    #[test]
    fn test_encode_layout() {
        let codec = FrameCodec::default();
        let frame = codec.encode(7, 0x22, 0x1234, 0x5678, &[0x00, 0x0a]).expect("encode");

        assert_eq!(
            &frame[..],
            &[FCF_DATA, FCA_SRC_SADDR, 7, 0x22, 0x00, 0x34, 0x12, 0x78, 0x56, 0x00, 0x0a]
        );
        assert_eq!(frame[SEQUENCE_OFFSET], 7);
    }

    #[test]
    fn test_decode_roundtrip() {
        let codec = FrameCodec::default();
        let frame = codec.encode(7, 0x22, 0x1234, 0x5678, &[0x00, 0x0a]).expect("encode");

        let (src_addr, payload) = codec.decode(&frame).expect("decode");
        assert_eq!(src_addr, 0x5678);
        assert_eq!(payload, &[0x00, 0x0a]);

        let header = codec.header(&frame).expect("header");
        assert_eq!(header, FrameHeader::data(7, 0x22, 0x1234, 0x5678));
    }

    #[test]
    fn test_decode_header_only() {
        let codec = FrameCodec::default();
        let frame = codec.encode(0, NETWORK_PAN, NODE_SRC_PAN, 1, &[]).expect("encode");

        assert_eq!(frame.len(), HEADER_LEN);
        assert_eq!(codec.decode(&frame), Ok((1, &[][..])));
    }

    #[test]
    fn test_decode_too_short() {
        let codec = FrameCodec::default();

        assert_eq!(
            codec.decode(&[0x41, 0x80, 0x00, 0x22]),
            Err(FrameError::FrameTooShort { len: 4, min: HEADER_LEN })
        );
        assert!(codec.header(&[0x41; 8]).is_err());
    }

    #[test]
    fn test_decode_with_port_header() {
        let codec = FrameCodec::new(1);
        let frame = FrameCodec::default()
            .encode(1, 0x22, 0x1234, 0xbeef, &[0x01, 0x00, 0x19])
            .expect("encode");

        let (src_addr, payload) = codec.decode(&frame).expect("decode");
        assert_eq!(src_addr, 0xbeef);
        assert_eq!(payload, &[0x00, 0x19]);

        // header present but port byte missing
        assert!(matches!(
            codec.decode(&frame[..HEADER_LEN]),
            Err(FrameError::FrameTooShort { min: 10, .. })
        ));
    }

    #[test]
    fn test_temperature_is_big_endian() {
        assert_eq!(decode_temperature(&[0x00, 0x0a], 0), Ok(10));
        assert_eq!(decode_temperature(&[0xff, 0x01, 0x2c], 1), Ok(300));
        assert_eq!(decode_temperature(&[0xff, 0xfd], 0), Ok(-3));
        assert_eq!(
            decode_temperature(&[0x00], 0),
            Err(FrameError::PayloadTooShort { len: 1, offset: 0 })
        );
    }

    #[test]
    fn test_huge_offsets_are_rejected() {
        let frame = FrameCodec::default().encode(0, 0x22, 0x1234, 1, &[0x00, 0x0a]).expect("encode");

        assert!(matches!(
            FrameCodec::new(usize::MAX).decode(&frame),
            Err(FrameError::FrameTooShort { min: usize::MAX, .. })
        ));
        assert_eq!(
            decode_temperature(&[0x00, 0x0a], usize::MAX),
            Err(FrameError::PayloadTooShort { len: 2, offset: usize::MAX })
        );
    }

    #[test]
    fn test_encode_temperature() {
        assert_eq!(&encode_temperature(10, 0, 2)[..], &[0x00, 0x0a]);
        assert_eq!(&encode_temperature(-3, 2, 4)[..], &[0x00, 0x00, 0xff, 0xfd]);
        assert_eq!(encode_temperature(25, 2, 0).len(), 4);
    }
}
