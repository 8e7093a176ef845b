//! WebSocket frame codec
//!
//! Pure byte transforms between the RFC 6455 wire format and [`Frame`]. No I/O
//! happens here; [`crate::message::MessageReassembler`] drives the codec over a
//! stream.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |  Masking-key, if MASK set     |          Payload Data         |
//! +-------------------------------+-------------------------------+
//! ```

use crate::{
    error::FrameError,
    protocol::{constants::MAX_PAYLOAD_LEN, frame::*, Opcode},
};
use bytes::{BufMut, Bytes, BytesMut};

/// FIN and reserved flags of a frame about to be encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHead {
    /// Final frame of its message
    pub fin: bool,
    /// RSV1, RSV2, RSV3
    pub rsv: [bool; 3],
}

impl FrameHead {
    /// Terminal frame with no reserved bits
    pub const FINAL: Self = Self {
        fin: true,
        rsv: [false; 3],
    };

    /// Non-terminal fragment with no reserved bits
    pub const CONTINUED: Self = Self {
        fin: false,
        rsv: [false; 3],
    };

    /// Set reserved bits
    pub fn rsv(mut self, rsv1: bool, rsv2: bool, rsv3: bool) -> Self {
        self.rsv = [rsv1, rsv2, rsv3];
        self
    }

    fn bits(&self) -> u8 {
        ((self.fin as u8) << 7)
            | ((self.rsv[0] as u8) << 6)
            | ((self.rsv[1] as u8) << 5)
            | ((self.rsv[2] as u8) << 4)
    }
}

/// Decoded header of a frame, available before its payload has arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// FIN bit
    pub fin: bool,
    /// RSV1..RSV3
    pub rsv: [bool; 3],
    /// Frame opcode
    pub opcode: Opcode,
    /// MASK bit
    pub masked: bool,
    /// Declared payload length
    pub payload_len: usize,
    /// Bytes before the payload, masking key included
    pub header_len: usize,
}

impl FrameHeader {
    /// Parse the header at the start of `buf`.
    ///
    /// Fails with [`FrameError::Truncated`] until the whole header (extended
    /// length and masking key included) is present, and with
    /// [`FrameError::Overflow`] when a 64-bit length exceeds `i32::MAX`.
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        require(buf, 2)?;

        let first_byte = buf[0];
        let second_byte = buf[1];
        let masked = (second_byte & MASK_BIT) != 0;

        let (payload_len, mut header_len) = match second_byte & PAYLOAD_LEN_MASK {
            PAYLOAD_LEN_16 => {
                require(buf, 4)?;
                (u16::from_be_bytes([buf[2], buf[3]]) as u64, 4)
            }
            PAYLOAD_LEN_64 => {
                require(buf, 10)?;
                let mut len = [0u8; 8];
                len.copy_from_slice(&buf[2..10]);
                (u64::from_be_bytes(len), 10)
            }
            literal => (literal as u64, 2),
        };

        if payload_len > MAX_PAYLOAD_LEN {
            return Err(FrameError::Overflow {
                length: payload_len,
            });
        }

        if masked {
            header_len += MASKING_KEY_LEN;
            require(buf, header_len)?;
        }

        Ok(Self {
            fin: (first_byte & FIN_BIT) != 0,
            rsv: [
                (first_byte & RSV1_BIT) != 0,
                (first_byte & RSV2_BIT) != 0,
                (first_byte & RSV3_BIT) != 0,
            ],
            opcode: Opcode::from_bits(first_byte),
            masked,
            payload_len: payload_len as usize,
            header_len,
        })
    }

    /// Total on-wire length of the frame this header introduces
    pub fn frame_len(&self) -> usize {
        self.header_len + self.payload_len
    }
}

fn require(buf: &[u8], needed: usize) -> Result<(), FrameError> {
    if buf.len() < needed {
        Err(FrameError::Truncated {
            needed,
            have: buf.len(),
        })
    } else {
        Ok(())
    }
}

/// One WebSocket frame.
///
/// The payload is held masked while [`Frame::masking_key`] is `Some` and in
/// the clear once [`Frame::unmask`] has run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    fin: bool,
    rsv: [bool; 3],
    opcode: Opcode,
    mask: Option<[u8; 4]>,
    payload: BytesMut,
}

impl Frame {
    /// Parse one frame from the start of `buf`.
    ///
    /// Bytes past [`Frame::len`] are left for the caller.
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        let header = FrameHeader::parse(buf)?;
        let total = header.frame_len();
        require(buf, total)?;

        let mask = if header.masked {
            let mut key = [0u8; MASKING_KEY_LEN];
            key.copy_from_slice(&buf[header.header_len - MASKING_KEY_LEN..header.header_len]);
            Some(key)
        } else {
            None
        };

        Ok(Self {
            fin: header.fin,
            rsv: header.rsv,
            opcode: header.opcode,
            mask,
            payload: BytesMut::from(&buf[header.header_len..total]),
        })
    }

    /// Build a frame around `payload`.
    ///
    /// With `apply_mask` a fresh random key is generated and the payload is
    /// masked with it. The encoded bytes are read back through
    /// [`Frame::parse`].
    pub fn encode(
        payload: &[u8],
        head: FrameHead,
        opcode: Opcode,
        apply_mask: bool,
    ) -> Result<Self, FrameError> {
        if payload.len() as u64 > MAX_PAYLOAD_LEN {
            return Err(FrameError::Overflow {
                length: payload.len() as u64,
            });
        }

        let mut buf = BytesMut::with_capacity(14 + payload.len());
        buf.put_u8(head.bits() | opcode.value());
        let mask_bit = if apply_mask { MASK_BIT } else { 0 };
        put_length(&mut buf, mask_bit, payload.len());

        if apply_mask {
            let key = rand::random::<[u8; MASKING_KEY_LEN]>();
            buf.put_slice(&key);
            let payload_start = buf.len();
            buf.put_slice(payload);
            toggle_masking(&mut buf, payload_start, key);
        } else {
            buf.put_slice(payload);
        }

        Self::parse(&buf)
    }

    /// Reverse the masking in place. No-op on an unmasked frame.
    pub fn unmask(&mut self) {
        if let Some(key) = self.mask.take() {
            toggle_masking(&mut self.payload, 0, key);
        }
    }

    /// FIN bit
    pub fn fin(&self) -> bool {
        self.fin
    }

    /// Reserved bits
    pub fn rsv(&self) -> [bool; 3] {
        self.rsv
    }

    /// Frame opcode
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Whether the payload is currently masked
    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Masking key, while masked
    pub fn masking_key(&self) -> Option<[u8; 4]> {
        self.mask
    }

    /// Payload bytes in their current (masked or clear) representation
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Consume the frame, keeping its payload
    pub fn into_payload(self) -> Bytes {
        self.payload.freeze()
    }

    /// On-wire length: header + masking key (if masked) + payload
    pub fn wire_len(&self) -> usize {
        let len = self.payload.len();
        let length_field = if len < PAYLOAD_LEN_16 as usize {
            0
        } else if len <= u16::MAX as usize {
            2
        } else {
            8
        };
        let key = if self.is_masked() { MASKING_KEY_LEN } else { 0 };
        2 + length_field + key + len
    }

    /// Serialize the frame to bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Write the frame to a buffer
    pub fn write_to(&self, buf: &mut BytesMut) {
        let head = FrameHead {
            fin: self.fin,
            rsv: self.rsv,
        };
        buf.put_u8(head.bits() | self.opcode.value());

        let mask_bit = if self.is_masked() { MASK_BIT } else { 0 };
        put_length(buf, mask_bit, self.payload.len());

        if let Some(key) = self.mask {
            buf.put_slice(&key);
        }
        buf.put_slice(&self.payload);
    }
}

fn put_length(buf: &mut BytesMut, mask_bit: u8, payload_len: usize) {
    if payload_len < PAYLOAD_LEN_16 as usize {
        buf.put_u8(mask_bit | payload_len as u8);
    } else if payload_len <= u16::MAX as usize {
        buf.put_u8(mask_bit | PAYLOAD_LEN_16);
        buf.put_u16(payload_len as u16);
    } else {
        buf.put_u8(mask_bit | PAYLOAD_LEN_64);
        buf.put_u64(payload_len as u64);
    }
}

/// XOR `buf[offset + i]` with `key[i % 4]` for every byte from `offset` on.
///
/// Applying it twice with the same key restores the input, so this is both
/// the masking and the unmasking routine.
pub fn toggle_masking(buf: &mut [u8], offset: usize, key: [u8; 4]) {
    if offset >= buf.len() {
        return;
    }
    for (i, byte) in buf[offset..].iter_mut().enumerate() {
        *byte ^= key[i % MASKING_KEY_LEN];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_frame_serialization() {
        let frame = Frame::encode(b"hello", FrameHead::FINAL, Opcode::Text, false).unwrap();
        let bytes = frame.to_bytes();

        assert_eq!(bytes[0], 0x81); // FIN=1, RSV=000, Opcode=0001
        assert_eq!(bytes[1], 0x05); // MASK=0, Length=5
        assert_eq!(&bytes[2..], b"hello");
        assert_eq!(frame.wire_len(), bytes.len());
    }

    #[test]
    fn test_masked_frame() {
        let frame = Frame::encode(b"hello", FrameHead::FINAL, Opcode::Text, true).unwrap();
        let bytes = frame.to_bytes();

        assert_eq!(bytes[1] & 0x80, 0x80);
        assert_eq!(bytes.len(), 2 + 4 + 5);
        assert_eq!(frame.wire_len(), bytes.len());

        let key = frame.masking_key().unwrap();
        assert_eq!(&bytes[2..6], &key);
        let mut clear = bytes[6..].to_vec();
        toggle_masking(&mut clear, 0, key);
        assert_eq!(clear, b"hello");
    }

    #[test]
    fn test_rfc_masked_example() {
        // RFC 6455 section 5.7: a single-frame masked text message "Hello"
        let wire = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let mut frame = Frame::parse(&wire).unwrap();
        assert!(frame.fin());
        assert_eq!(frame.opcode(), Opcode::Text);
        assert_eq!(frame.masking_key(), Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(frame.wire_len(), wire.len());

        frame.unmask();
        assert!(!frame.is_masked());
        assert_eq!(frame.payload(), b"Hello");

        frame.unmask();
        assert_eq!(frame.payload(), b"Hello");
    }

    #[test]
    fn test_sixteen_bit_length_class() {
        let payload = vec![7u8; 65535];
        let frame = Frame::encode(&payload, FrameHead::FINAL, Opcode::Binary, false).unwrap();
        let bytes = frame.to_bytes();

        assert_eq!(bytes[1], 126);
        assert_eq!(&bytes[2..4], &65535u16.to_be_bytes());
        assert_eq!(frame.wire_len(), 4 + 65535);
    }

    #[test]
    fn test_large_frame() {
        let payload = vec![0u8; 65536];
        let frame = Frame::encode(&payload, FrameHead::FINAL, Opcode::Binary, false).unwrap();
        let bytes = frame.to_bytes();

        assert_eq!(bytes[1], 127);
        assert_eq!(bytes[2..10], (65536u64).to_be_bytes());
        assert_eq!(frame.wire_len(), 10 + 65536);
    }

    #[test]
    fn test_overflowing_length_rejected() {
        let mut wire = vec![0x82, 127];
        wire.extend_from_slice(&(i32::MAX as u64 + 1).to_be_bytes());

        assert_eq!(
            FrameHeader::parse(&wire),
            Err(FrameError::Overflow {
                length: i32::MAX as u64 + 1
            })
        );
        assert!(matches!(
            Frame::parse(&wire),
            Err(FrameError::Overflow { .. })
        ));
    }

    #[test]
    fn test_max_length_is_only_truncated() {
        let mut wire = vec![0x82, 127];
        wire.extend_from_slice(&(i32::MAX as u64).to_be_bytes());

        let header = FrameHeader::parse(&wire).unwrap();
        assert_eq!(header.payload_len, i32::MAX as usize);
        assert!(matches!(
            Frame::parse(&wire),
            Err(FrameError::Truncated { have: 10, .. })
        ));
    }

    #[test]
    fn test_truncated_header_and_payload() {
        assert_eq!(
            FrameHeader::parse(&[0x81]),
            Err(FrameError::Truncated { needed: 2, have: 1 })
        );
        assert_eq!(
            FrameHeader::parse(&[0x81, 126, 0x01]),
            Err(FrameError::Truncated { needed: 4, have: 3 })
        );
        // masked: key must be present for the header to be complete
        assert_eq!(
            FrameHeader::parse(&[0x81, 0x85, 1, 2]),
            Err(FrameError::Truncated { needed: 6, have: 4 })
        );
        assert_eq!(
            Frame::parse(&[0x81, 0x05, b'h', b'e']),
            Err(FrameError::Truncated { needed: 7, have: 4 })
        );
    }

    #[test]
    fn test_surplus_bytes_are_ignored() {
        let mut wire = Frame::encode(b"one", FrameHead::FINAL, Opcode::Text, false)
            .unwrap()
            .to_bytes()
            .to_vec();
        wire.extend_from_slice(&[0x81, 0x03, b't']);

        let frame = Frame::parse(&wire).unwrap();
        assert_eq!(frame.payload(), b"one");
        assert_eq!(frame.wire_len(), 5);
    }

    #[test]
    fn test_reserved_bits_and_opcode_round_trip() {
        let head = FrameHead::CONTINUED.rsv(true, false, true);
        let frame = Frame::encode(b"x", head, Opcode::ReservedB, false).unwrap();
        assert!(!frame.fin());
        assert_eq!(frame.rsv(), [true, false, true]);
        assert_eq!(frame.opcode(), Opcode::ReservedB);

        let reparsed = Frame::parse(&frame.to_bytes()).unwrap();
        assert_eq!(reparsed, frame);
    }

    #[test]
    fn test_empty_payload() {
        let frame = Frame::encode(b"", FrameHead::FINAL, Opcode::Text, true).unwrap();
        assert_eq!(frame.payload_len(), 0);
        assert_eq!(frame.wire_len(), 6);
        assert_eq!(FrameHeader::parse(&frame.to_bytes()).unwrap().frame_len(), 6);
    }

    #[test]
    fn test_unmasked_frame_serializes_without_key() {
        let mut frame = Frame::encode(b"abc", FrameHead::FINAL, Opcode::Text, true).unwrap();
        frame.unmask();

        let bytes = frame.to_bytes();
        assert_eq!(bytes.as_ref(), &[0x81, 0x03, b'a', b'b', b'c']);
        assert_eq!(frame.wire_len(), bytes.len());
    }

    #[test]
    fn test_toggle_masking_respects_offset() {
        let key = [0xff, 0x00, 0xff, 0x00];
        let mut buf = [1u8, 2, 3, 4, 5, 6];
        toggle_masking(&mut buf, 2, key);
        assert_eq!(buf, [1, 2, 3 ^ 0xff, 4, 5 ^ 0xff, 6]);

        toggle_masking(&mut buf, 2, key);
        assert_eq!(buf, [1, 2, 3, 4, 5, 6]);

        toggle_masking(&mut buf, 10, key);
        assert_eq!(buf, [1, 2, 3, 4, 5, 6]);
    }
}
