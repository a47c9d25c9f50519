//! Fixed-size packet codec.
//!
//! Every message travels as a run of `packet_size` byte packets. The last
//! payload packet is right-padded with `0x00`, and the message is closed by
//! one extra packet made entirely of zero bytes (the sentinel). There is no
//! length prefix, so both ends must agree on `packet_size` out of band.
//!
//! ```text
//! | payload[0..P] | payload[P..2P] | tail 00 00 00 | 00 00 00 00 00 |
//!   packet 1        packet 2         packet 3        sentinel
//! ```

use crate::error::{Result, WireError};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Default packet size in bytes.
pub const DEFAULT_PACKET_SIZE: usize = 4096;

/// A single decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A payload packet, still carrying any zero padding.
    Data(Bytes),
    /// The all-zero end-of-message sentinel.
    End,
}

impl Packet {
    /// Returns the payload with trailing zero padding removed, or `None` for
    /// the sentinel.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Packet::Data(bytes) => {
                let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
                Some(&bytes[..end])
            }
            Packet::End => None,
        }
    }

    /// Returns true if this is the end-of-message sentinel.
    pub fn is_end(&self) -> bool {
        matches!(self, Packet::End)
    }
}

/// Encoder/decoder for the fixed-size packet protocol.
///
/// Encoding takes a whole text message and emits all of its packets plus the
/// sentinel. Decoding yields one [`Packet`] per `packet_size` bytes read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketCodec {
    packet_size: usize,
}

impl PacketCodec {
    /// Creates a codec for the given packet size.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::InvalidPacketSize`] if `packet_size` is zero.
    pub fn new(packet_size: usize) -> Result<Self> {
        if packet_size == 0 {
            return Err(WireError::InvalidPacketSize(packet_size));
        }
        Ok(Self { packet_size })
    }

    /// Returns the packet size in bytes.
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Returns how many packets, sentinel included, a message of `len`
    /// bytes occupies on the wire.
    pub fn packets_for(&self, len: usize) -> usize {
        len.div_ceil(self.packet_size) + 1
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
        }
    }
}

impl<T: AsRef<str>> Encoder<T> for PacketCodec {
    type Error = WireError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        let bytes = item.as_ref().as_bytes();
        if let Some(offset) = bytes.iter().position(|b| *b == 0) {
            return Err(WireError::EmbeddedNul(offset));
        }

        let size = self.packet_size;
        dst.reserve(self.packets_for(bytes.len()) * size);
        for chunk in bytes.chunks(size) {
            dst.put_slice(chunk);
            dst.put_bytes(0, size - chunk.len());
        }
        dst.put_bytes(0, size);

        trace!(
            "Encoded {} bytes into {} packets",
            bytes.len(),
            self.packets_for(bytes.len())
        );
        Ok(())
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < self.packet_size {
            src.reserve(self.packet_size - src.len());
            return Ok(None);
        }

        let frame = src.split_to(self.packet_size).freeze();
        if frame.iter().all(|b| *b == 0) {
            trace!("Decoded sentinel packet");
            Ok(Some(Packet::End))
        } else {
            trace!("Decoded payload packet");
            Ok(Some(Packet::Data(frame)))
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        match self.decode(src)? {
            Some(packet) => Ok(Some(packet)),
            None if src.is_empty() => Ok(None),
            None => {
                let remaining = src.len();
                src.clear();
                Err(WireError::ConnectionLost(format!(
                    "stream closed {remaining} bytes into a {} byte packet",
                    self.packet_size
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(codec: &mut PacketCodec, text: &str) -> BytesMut {
        let mut buf = BytesMut::new();
        codec.encode(text, &mut buf).unwrap();
        buf
    }

    fn frame_count(codec: &PacketCodec, buf: &BytesMut) -> usize {
        assert_eq!(buf.len() % codec.packet_size(), 0);
        buf.len() / codec.packet_size()
    }

    #[test]
    fn test_zero_packet_size_rejected() {
        assert!(matches!(
            PacketCodec::new(0),
            Err(WireError::InvalidPacketSize(0))
        ));
    }

    #[test]
    fn test_chunking_boundaries() {
        let mut codec = PacketCodec::new(8).unwrap();

        // exactly one packet, one packet with padding, two packets
        for (len, payload_frames) in [(8, 1), (7, 1), (9, 2)] {
            let text = "a".repeat(len);
            let buf = encode(&mut codec, &text);
            assert_eq!(frame_count(&codec, &buf), payload_frames + 1, "len {len}");
            assert_eq!(codec.packets_for(len), payload_frames + 1);
        }
    }

    #[test]
    fn test_padding_and_sentinel_layout() {
        let mut codec = PacketCodec::new(4).unwrap();
        let buf = encode(&mut codec, "hello");
        assert_eq!(&buf[..], b"hello\0\0\0\0\0\0\0");
    }

    #[test]
    fn test_exact_multiple_gets_dedicated_sentinel() {
        let mut codec = PacketCodec::new(4).unwrap();
        let mut buf = encode(&mut codec, "abcdefgh");
        assert_eq!(frame_count(&codec, &buf), 3);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        let third = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.payload(), Some(&b"abcd"[..]));
        assert_eq!(second.payload(), Some(&b"efgh"[..]));
        assert!(third.is_end());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_message_is_only_sentinel() {
        let mut codec = PacketCodec::new(16).unwrap();
        let mut buf = encode(&mut codec, "");
        assert_eq!(frame_count(&codec, &buf), 1);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Packet::End));
    }

    #[test]
    fn test_embedded_nul_rejected_before_writing() {
        let mut codec = PacketCodec::new(4).unwrap();
        let mut buf = BytesMut::new();
        let result = codec.encode("ab\0cd", &mut buf);
        assert!(matches!(result, Err(WireError::EmbeddedNul(2))));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_waits_for_full_packet() {
        let mut codec = PacketCodec::new(4).unwrap();
        let mut buf = BytesMut::from(&b"ab"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"cd");
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.payload(), Some(&b"abcd"[..]));
    }

    #[test]
    fn test_decode_eof_partial_packet_is_connection_lost() {
        let mut codec = PacketCodec::new(4).unwrap();
        let mut buf = BytesMut::from(&b"abcdef"[..]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_some());

        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, WireError::ConnectionLost(_)));
        assert!(err.is_disconnect());
        assert!(buf.is_empty());
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_packet_payload_strips_padding() {
        let packet = Packet::Data(Bytes::from_static(b"hi\0\0"));
        assert_eq!(packet.payload(), Some(&b"hi"[..]));
        assert_eq!(Packet::End.payload(), None);
    }
}
