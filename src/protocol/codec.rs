use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Air framing carrying one MAC frame over a serial or TCP link:
///
/// ```text
/// [0x32] [len] [frame: len bytes] [xor(len, frame)] [0x34]
/// ```
const FRAME_START: u8 = 0x32;
const FRAME_END: u8 = 0x34;

/// start, len, checksum, end
const ENVELOPE_SIZE: usize = 4;

/// Largest MAC frame the radio carries (802.15.4 PSDU).
pub const MAX_FRAME_LEN: usize = 127;

trait Checksum {
    fn checksum(&mut self) -> u8;
}

impl<'a> Checksum for std::slice::Iter<'a, u8> {
    fn checksum(&mut self) -> u8 {
        self.fold(0, |acc, byte| acc ^ byte)
    }
}

#[derive(Error, Debug)]
enum FramingError {
    #[error("input buffer too small")]
    BufferTooSmall,
    #[error("start of frame marker not found")]
    FrameStartNotFound,
    #[error("end of frame marker not found")]
    FrameEndNotFound,
    #[error("invalid checksum (expected {expected:x}, actual: {actual:x})")]
    InvalidChecksum { expected: u8, actual: u8 },
}

/// Frames received or sent over a port are plain MAC frames; the envelope
/// never leaves this codec.
#[derive(Debug, Default)]
pub struct RadioCodec {
    corrupted: u64,
}

impl RadioCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of frames dropped because of a checksum mismatch.
    pub fn corrupted(&self) -> u64 {
        self.corrupted
    }
}

fn try_read_frame(src: &mut BytesMut) -> Result<Bytes, FramingError> {
    if src.len() < ENVELOPE_SIZE {
        return Err(FramingError::BufferTooSmall);
    }

    if src[0] != FRAME_START {
        return Err(FramingError::FrameStartNotFound);
    }

    let len = src[1] as usize;
    if len > MAX_FRAME_LEN {
        // a start marker that can't be a real frame -- treat as junk
        return Err(FramingError::FrameStartNotFound);
    }

    let size = ENVELOPE_SIZE + len;
    if src.len() < size {
        return Err(FramingError::BufferTooSmall);
    }

    if src[size - 1] != FRAME_END {
        return Err(FramingError::FrameEndNotFound);
    }

    let mut src = src.split_to(size);
    src.advance(1); // ignore frame start

    let expected = src[..len + 1].iter().checksum();
    let actual = src[len + 1];

    if expected != actual {
        return Err(FramingError::InvalidChecksum { expected, actual });
    }

    src.advance(1); // length
    src.truncate(len);

    Ok(src.freeze())
}

impl Decoder for RadioCodec {
    type Item = Bytes;

    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match try_read_frame(src) {
                Ok(frame) => return Ok(Some(frame)),

                // need more data
                Err(FramingError::BufferTooSmall) => return Ok(None),

                Err(FramingError::FrameStartNotFound) | Err(FramingError::FrameEndNotFound) => {
                    // junk in front of a frame, or a start marker that was really
                    // part of a previous frame -- skip a byte to resync
                    src.advance(1);
                    continue;
                }

                Err(err @ FramingError::InvalidChecksum { .. }) => {
                    // the bytes were already consumed; carry on with the next frame
                    self.corrupted += 1;
                    tracing::warn!("dropping corrupted frame: {err}");
                    continue;
                }
            }
        }
    }
}

impl Encoder<Bytes> for RadioCodec {
    type Error = std::io::Error;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("frame of {} bytes exceeds radio MTU of {MAX_FRAME_LEN}", frame.len()),
            ));
        }

        dst.reserve(ENVELOPE_SIZE + frame.len());

        let start = dst.len();
        dst.put_u8(FRAME_START);
        dst.put_u8(frame.len() as u8);
        dst.put(&frame[..]);

        let checksum = dst[start + 1..].iter().checksum();
        dst.put_u8(checksum);
        dst.put_u8(FRAME_END);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    use super::*;

    fn encoded(frame: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        RadioCodec::new().encode(Bytes::copy_from_slice(frame), &mut buf).expect("encode");
        buf
    }

    #[test]
    fn test_codec_encode() {
        let buf = encoded(&[0x01, 0x02, 0x03]);
        assert_eq!(&buf[..], &[0x32, 0x03, 0x01, 0x02, 0x03, 0x03 ^ 0x01 ^ 0x02 ^ 0x03, 0x34]);
    }

    #[test]
    fn test_codec_encode_too_long() {
        let mut buf = BytesMut::new();
        let err = RadioCodec::new()
            .encode(Bytes::from(vec![0u8; MAX_FRAME_LEN + 1]), &mut buf)
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_codec_decode() {
        let frame = [0x41, 0x80, 0x07, 0x22, 0x00, 0x34, 0x12, 0x78, 0x56, 0x00, 0x0a];

        let buf = encoded(&frame);
        let mut fr = FramedRead::new(&buf[..], RadioCodec::new());
        assert_eq!(&fr.next().await.unwrap().unwrap()[..], &frame[..]);
        assert!(fr.next().await.is_none());

        // some junk which includes a start-of-frame marker
        let mut buf = BytesMut::new();
        buf.put(&[0x01, 0x02, 0x32, 0x01, 0x02][..]);
        buf.put(encoded(&frame));
        buf.put(encoded(&[0xaa]));

        let mut fr = FramedRead::new(&buf[..], RadioCodec::new());
        assert_eq!(&fr.next().await.unwrap().unwrap()[..], &frame[..]);
        assert_eq!(&fr.next().await.unwrap().unwrap()[..], &[0xaa]);
    }

    #[test]
    fn test_codec_decode_partial() {
        let full = encoded(&[0x10, 0x20, 0x30]);
        let mut codec = RadioCodec::new();

        let mut buf = BytesMut::from(&full[..4]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.put(&full[4..]);
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], &[0x10, 0x20, 0x30]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_skips_corrupted() {
        let mut bad = encoded(&[0x01, 0x02]);
        bad[2] ^= 0xff;

        let mut buf = BytesMut::new();
        buf.put(bad);
        buf.put(encoded(&[0x05]));

        let mut codec = RadioCodec::new();
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], &[0x05]);
        assert_eq!(codec.corrupted(), 1);
    }
}
