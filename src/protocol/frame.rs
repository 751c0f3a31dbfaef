//! WebSocket frame parsing and serialization (RFC 6455).
//!
//! [`Frame::encode`] produces the wire form of one frame and [`Frame::parse`]
//! decodes one frame from an in-memory buffer. Streaming decode from a
//! transport lives in [`crate::codec`] and shares the header logic in
//! [`FrameHead`].

use bytes::BufMut;

use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::mask::{apply_mask_fast, random_mask};

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

const FIN_BIT: u8 = 0b1000_0000;
const RSV_BITS: u8 = 0b0111_0000;
const OPCODE_MASK: u8 = 0b0000_1111;
const MASK_BIT: u8 = 0b1000_0000;
const LENGTH_MASK: u8 = 0b0111_1111;

const LENGTH_16BIT: u8 = 126;
const LENGTH_64BIT: u8 = 127;

/// The fixed two leading bytes of a frame, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHead {
    pub fin: bool,
    pub opcode: OpCode,
    pub masked: bool,
    len_code: u8,
}

impl FrameHead {
    /// Decode the first two header bytes.
    ///
    /// # Errors
    ///
    /// - `Error::ReservedBitsSet` if any RSV bit is set
    /// - `Error::UnknownOpcode` if the opcode nibble is undefined
    pub(crate) fn decode(byte0: u8, byte1: u8) -> Result<Self> {
        if byte0 & RSV_BITS != 0 {
            return Err(Error::ReservedBitsSet);
        }

        Ok(Self {
            fin: byte0 & FIN_BIT != 0,
            opcode: OpCode::from_u8(byte0 & OPCODE_MASK)?,
            masked: byte1 & MASK_BIT != 0,
            len_code: byte1 & LENGTH_MASK,
        })
    }

    /// Number of extended length bytes following the two leading bytes.
    pub(crate) const fn extended_len_size(&self) -> usize {
        match self.len_code {
            LENGTH_16BIT => 2,
            LENGTH_64BIT => 8,
            _ => 0,
        }
    }

    pub(crate) const fn mask_size(&self) -> usize {
        if self.masked { 4 } else { 0 }
    }

    /// Payload length, given the extended length bytes (empty for short frames).
    pub(crate) fn payload_len(&self, extended: &[u8]) -> u64 {
        match self.len_code {
            LENGTH_16BIT => u64::from(u16::from_be_bytes([extended[0], extended[1]])),
            LENGTH_64BIT => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&extended[..8]);
                u64::from_be_bytes(bytes)
            }
            short => u64::from(short),
        }
    }
}

/// A WebSocket frame as defined in RFC 6455.
///
/// Frames are the basic unit of communication in the WebSocket protocol.
/// This struct supports both parsing incoming frames and creating outgoing frames.
///
/// ## Frame Structure
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |F|R|R|R| opcode |M| Payload len |    Extended payload length    |
/// |I|S|S|S|  (4)   |A|     (7)     |             (16/64)           |
/// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
/// | |1|2|3|       |K|             |                               |
/// +-+-+-+-+-------+-+-------------+-------------------------------+
/// |                         Masking key (if present)              |
/// +---------------------------------------------------------------+
/// |                     Payload data                              |
/// +---------------------------------------------------------------+
/// ```
///
/// Reserved bits are always written as zero and rejected on decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag. True if this is the last fragment of a message.
    pub fin: bool,
    /// Frame opcode defining the interpretation of payload data.
    pub opcode: OpCode,
    /// Whether the frame is (or was, on the wire) masked.
    pub masked: bool,
    payload: Vec<u8>,
}

impl Frame {
    /// Create a new unmasked frame with the given parameters.
    ///
    /// # Arguments
    ///
    /// * `fin` - Whether this is the final fragment
    /// * `opcode` - The frame opcode
    /// * `payload` - The payload data
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            opcode,
            masked: false,
            payload,
        }
    }

    /// Set whether [`Frame::to_bytes`] masks the payload.
    #[must_use]
    pub fn with_masked(mut self, masked: bool) -> Self {
        self.masked = masked;
        self
    }

    /// Create a text frame.
    #[must_use]
    pub fn text(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Text, data.into())
    }

    /// Create a binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Binary, data.into())
    }

    /// Create a close frame with optional status code and reason.
    #[must_use]
    pub fn close(code: Option<u16>, reason: &[u8]) -> Self {
        let payload = if let Some(code) = code {
            let mut data = Vec::with_capacity(2 + reason.len());
            data.put_u16(code);
            data.put_slice(reason);
            data
        } else {
            Vec::new()
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Ping, data.into())
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(true, OpCode::Pong, data.into())
    }

    /// Get the payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Parse a frame from a buffer.
    ///
    /// Returns the parsed frame and the number of bytes consumed.
    ///
    /// ## Errors
    ///
    /// - `Error::IncompleteFrame` if not enough data is available
    /// - `Error::UnknownOpcode` if the opcode is undefined
    /// - `Error::ReservedBitsSet` if an RSV bit is set
    /// - `Error::FrameTooLarge` if the declared length does not fit in memory
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }

        let head = FrameHead::decode(buf[0], buf[1])?;
        let len_end = 2 + head.extended_len_size();
        if buf.len() < len_end {
            return Err(Error::IncompleteFrame {
                needed: len_end - buf.len(),
            });
        }

        let declared = head.payload_len(&buf[2..len_end]);
        let payload_len = usize::try_from(declared).map_err(|_| Error::FrameTooLarge {
            size: declared,
            max: usize::MAX,
        })?;

        let header_len = len_end + head.mask_size();
        let total_size = header_len
            .checked_add(payload_len)
            .ok_or(Error::FrameTooLarge {
                size: declared,
                max: usize::MAX - header_len,
            })?;

        if buf.len() < total_size {
            return Err(Error::IncompleteFrame {
                needed: total_size - buf.len(),
            });
        }

        let mut payload = buf[header_len..total_size].to_vec();
        if head.masked {
            let mut mask = [0u8; 4];
            mask.copy_from_slice(&buf[len_end..header_len]);
            apply_mask_fast(&mut payload, mask);
        }

        let frame = Frame {
            fin: head.fin,
            opcode: head.opcode,
            masked: head.masked,
            payload,
        };

        Ok((frame, total_size))
    }

    /// Validate the frame according to RFC 6455.
    ///
    /// Control payloads over 125 bytes are tolerated; see
    /// [`MAX_CONTROL_FRAME_PAYLOAD`].
    ///
    /// # Errors
    ///
    /// - `Error::FragmentedControlFrame` if control frame has FIN=0
    pub fn validate(&self) -> Result<()> {
        if self.opcode.is_control() && !self.fin {
            return Err(Error::FragmentedControlFrame);
        }

        if self.opcode.is_control() && self.payload.len() > MAX_CONTROL_FRAME_PAYLOAD {
            log::warn!(
                "{} frame carries {} bytes, above the {} byte control limit",
                self.opcode,
                self.payload.len(),
                MAX_CONTROL_FRAME_PAYLOAD
            );
        }

        Ok(())
    }

    /// Append the wire form of this frame to `out`.
    ///
    /// `mask` selects masking explicitly; `self.masked` is ignored here.
    pub fn encode_into(&self, out: &mut Vec<u8>, mask: Option<[u8; 4]>) {
        let payload_len = self.payload.len();
        out.reserve(self.wire_size(mask.is_some()));

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= FIN_BIT;
        }
        out.put_u8(byte0);

        let mask_bit = if mask.is_some() { MASK_BIT } else { 0 };
        if payload_len <= 125 {
            out.put_u8(mask_bit | payload_len as u8);
        } else if payload_len <= 65535 {
            out.put_u8(mask_bit | LENGTH_16BIT);
            out.put_u16(payload_len as u16);
        } else {
            out.put_u8(mask_bit | LENGTH_64BIT);
            out.put_u64(payload_len as u64);
        }

        match mask {
            Some(key) => {
                out.put_slice(&key);
                let start = out.len();
                out.put_slice(&self.payload);
                apply_mask_fast(&mut out[start..], key);
            }
            None => out.put_slice(&self.payload),
        }
    }

    /// Encode the frame with an explicit masking key (or none).
    #[must_use]
    pub fn encode(&self, mask: Option<[u8; 4]>) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_size(mask.is_some()));
        self.encode_into(&mut out, mask);
        out
    }

    /// Encode the frame, drawing a fresh random key if `self.masked` is set.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mask = self.masked.then(random_mask);
        self.encode(mask)
    }

    /// Calculate the size needed to write this frame.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let payload_len = self.payload.len();
        let extended_len_size = if payload_len <= 125 {
            0
        } else if payload_len <= 65535 {
            2
        } else {
            8
        };
        let mask_size = if masked { 4 } else { 0 };
        2 + extended_len_size + mask_size + payload_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unmasked_text_frame() {
        // FIN=1, opcode=1 (text), unmasked, payload="Hello"
        let data = &[0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f];
        let (frame, len) = Frame::parse(data).unwrap();
        assert_eq!(len, 7);
        assert!(frame.fin);
        assert!(!frame.masked);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload(), b"Hello");
    }

    #[test]
    fn test_parse_masked_text_frame() {
        // Mask key: 0x37, 0xfa, 0x21, 0x3d
        let data = &[
            0x81, 0x85, // FIN + Text, MASK + len=5
            0x37, 0xfa, 0x21, 0x3d, // Mask key
            0x7f, 0x9f, 0x4d, 0x51, 0x58, // Masked "Hello"
        ];
        let (frame, len) = Frame::parse(data).unwrap();
        assert_eq!(len, 11);
        assert!(frame.masked);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload(), b"Hello");
    }

    #[test]
    fn test_parse_close_frame() {
        // payload=[0x03, 0xe8] (1000 = normal close)
        let data = &[0x88, 0x02, 0x03, 0xe8];
        let (frame, len) = Frame::parse(data).unwrap();
        assert_eq!(len, 4);
        assert_eq!(frame.opcode, OpCode::Close);
        assert_eq!(frame.payload(), &[0x03, 0xe8]);
    }

    #[test]
    fn test_parse_ping_and_pong() {
        let (ping, _) = Frame::parse(&[0x89, 0x04, b'p', b'i', b'n', b'g']).unwrap();
        assert_eq!(ping.opcode, OpCode::Ping);
        assert_eq!(ping.payload(), b"ping");

        let (pong, _) = Frame::parse(&[0x8a, 0x04, b'p', b'o', b'n', b'g']).unwrap();
        assert_eq!(pong.opcode, OpCode::Pong);
        assert_eq!(pong.payload(), b"pong");
    }

    #[test]
    fn test_parse_fragmented_frame() {
        // FIN=0, opcode=1 (text), payload="Hel"
        let (frame, _) = Frame::parse(&[0x01, 0x03, 0x48, 0x65, 0x6c]).unwrap();
        assert!(!frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);

        // FIN=1, opcode=0 (continuation), payload="lo"
        let (frame, _) = Frame::parse(&[0x80, 0x02, 0x6c, 0x6f]).unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Continuation);
    }

    #[test]
    fn test_parse_extended_length_126() {
        let mut data = vec![0x82, 0x7e, 0x01, 0x00]; // len=256
        data.extend(vec![0xab; 256]);

        let (frame, len) = Frame::parse(&data).unwrap();
        assert_eq!(len, 4 + 256);
        assert_eq!(frame.payload().len(), 256);
        assert!(frame.payload().iter().all(|&b| b == 0xab));
    }

    #[test]
    fn test_parse_extended_length_127() {
        let mut data = vec![0x82, 0x7f];
        data.extend(65536u64.to_be_bytes());
        data.extend(vec![0xcd; 65536]);

        let (frame, len) = Frame::parse(&data).unwrap();
        assert_eq!(len, 10 + 65536);
        assert_eq!(frame.payload().len(), 65536);
    }

    #[test]
    fn test_parse_empty_payload() {
        let (frame, len) = Frame::parse(&[0x81, 0x00]).unwrap();
        assert_eq!(len, 2);
        assert_eq!(frame.payload(), b"");
    }

    #[test]
    fn test_parse_unknown_opcode() {
        // opcode nibble 12 is undefined
        let result = Frame::parse(&[0x8c, 0x00]);
        assert_eq!(result, Err(Error::UnknownOpcode(12)));
    }

    #[test]
    fn test_parse_rsv_bits_set() {
        let result = Frame::parse(&[0xc1, 0x00]);
        assert_eq!(result, Err(Error::ReservedBitsSet));
    }

    #[test]
    fn test_parse_incomplete_header() {
        assert_eq!(
            Frame::parse(&[0x81]),
            Err(Error::IncompleteFrame { needed: 1 })
        );
    }

    #[test]
    fn test_parse_incomplete_payload() {
        assert_eq!(
            Frame::parse(&[0x81, 0x05, b'H', b'e']),
            Err(Error::IncompleteFrame { needed: 3 })
        );
    }

    #[test]
    fn test_parse_incomplete_extended_length() {
        assert!(matches!(
            Frame::parse(&[0x82, 0x7e, 0x01]),
            Err(Error::IncompleteFrame { needed: 1 })
        ));
        assert!(matches!(
            Frame::parse(&[0x82, 0x7f, 0x00, 0x00]),
            Err(Error::IncompleteFrame { needed: 6 })
        ));
    }

    #[test]
    fn test_parse_incomplete_mask_key() {
        assert!(matches!(
            Frame::parse(&[0x81, 0x85, 0x37, 0xfa]),
            Err(Error::IncompleteFrame { .. })
        ));
    }

    #[test]
    fn test_write_unmasked_text_frame() {
        let frame = Frame::text("Hello");
        assert_eq!(
            frame.encode(None),
            vec![0x81, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f]
        );
    }

    #[test]
    fn test_write_masked_text_frame() {
        let frame = Frame::text("Hello");
        let encoded = frame.encode(Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(
            encoded,
            vec![0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn test_length_code_boundaries() {
        for (len, code, header) in [
            (125usize, 125u8, 2usize),
            (126, 126, 4),
            (65535, 126, 4),
            (65536, 127, 10),
        ] {
            let frame = Frame::binary(vec![0x5a; len]);
            let encoded = frame.encode(None);
            assert_eq!(encoded[1] & 0x7f, code, "length code for {len}");
            assert_eq!(encoded.len(), header + len);

            let (parsed, consumed) = Frame::parse(&encoded).unwrap();
            assert_eq!(consumed, encoded.len());
            assert_eq!(parsed.payload().len(), len);
        }
    }

    #[test]
    fn test_roundtrip_masked() {
        let frame = Frame::new(false, OpCode::Binary, (0..=255).collect());
        let encoded = frame.encode(Some([1, 2, 3, 4]));
        let (parsed, _) = Frame::parse(&encoded).unwrap();
        assert!(!parsed.fin);
        assert!(parsed.masked);
        assert_eq!(parsed.payload(), frame.payload());
    }

    #[test]
    fn test_to_bytes_uses_masked_flag() {
        let frame = Frame::text("abc").with_masked(true);
        let encoded = frame.to_bytes();
        assert_eq!(encoded[1], 0x80 | 3);
        assert_eq!(encoded.len(), 2 + 4 + 3);

        let (parsed, _) = Frame::parse(&encoded).unwrap();
        assert_eq!(parsed.payload(), b"abc");
    }

    #[test]
    fn test_reserved_bits_always_zero() {
        let encoded = Frame::ping("x").encode(None);
        assert_eq!(encoded[0] & 0x70, 0);
        assert_eq!(encoded[0], 0x89);
    }

    #[test]
    fn test_wire_size() {
        assert_eq!(Frame::text(vec![0; 10]).wire_size(false), 12);
        assert_eq!(Frame::text(vec![0; 10]).wire_size(true), 16);
        assert_eq!(Frame::text(vec![0; 200]).wire_size(false), 204);
        assert_eq!(Frame::text(vec![0; 70000]).wire_size(false), 70010);
    }

    #[test]
    fn test_close_frame_with_reason() {
        let frame = Frame::close(Some(1000), b"goodbye");
        assert_eq!(frame.opcode, OpCode::Close);
        assert_eq!(&frame.payload()[0..2], &[0x03, 0xe8]);
        assert_eq!(&frame.payload()[2..], b"goodbye");

        assert!(Frame::close(None, b"ignored").payload().is_empty());
    }

    #[test]
    fn test_validate_fragmented_control_frame() {
        let mut frame = Frame::ping(b"test".to_vec());
        frame.fin = false;
        assert_eq!(frame.validate(), Err(Error::FragmentedControlFrame));
    }

    #[test]
    fn test_validate_tolerates_large_control_payload() {
        let frame = Frame::ping(vec![0u8; 200]);
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn test_payload_exceeds_platform_max() {
        let mut data = vec![0x82, 0x7f];
        data.extend(u64::MAX.to_be_bytes());
        let result = Frame::parse(&data);
        assert!(matches!(result, Err(Error::FrameTooLarge { .. })));
    }
}
