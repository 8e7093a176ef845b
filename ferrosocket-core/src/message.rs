//! Message reassembly
//!
//! Frames arrive split across arbitrary reads and may be spread over several
//! continuation frames. [`MessageReassembler`] buffers the raw bytes, cuts
//! them into frames with the codec and hands back one [`Message`] per
//! terminal frame.

use crate::error::{Error, FrameError, Result};
use crate::frame::{Frame, FrameHeader};
use crate::protocol::{constants::DEFAULT_READ_BUFFER_SIZE, Opcode};
use crate::transport::TransportRead;
use bytes::{Bytes, BytesMut};

/// A complete, unmasked message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    opcode: Opcode,
    fragments: Vec<Bytes>,
}

impl Message {
    /// Build a message from its fragments, in arrival order
    pub fn new(opcode: Opcode, fragments: Vec<Bytes>) -> Self {
        Self { opcode, fragments }
    }

    /// Opcode of the first frame
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// One payload span per frame consumed
    pub fn fragments(&self) -> &[Bytes] {
        &self.fragments
    }

    /// Concatenated payload
    pub fn payload(&self) -> Bytes {
        match self.fragments.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            fragments => {
                let mut buf = BytesMut::with_capacity(self.len());
                for fragment in fragments {
                    buf.extend_from_slice(fragment);
                }
                buf.freeze()
            }
        }
    }

    /// Total payload length
    pub fn len(&self) -> usize {
        self.fragments.iter().map(Bytes::len).sum()
    }

    /// Check if the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if this is a text message
    pub fn is_text(&self) -> bool {
        self.opcode == Opcode::Text
    }

    /// Check if this is a binary message
    pub fn is_binary(&self) -> bool {
        self.opcode == Opcode::Binary
    }

    /// Decode the payload as UTF-8
    pub fn to_text(&self) -> Result<String> {
        String::from_utf8(self.payload().to_vec()).map_err(|_| Error::InvalidUtf8)
    }
}

/// Where the reassembler is within the current message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyState {
    /// Nothing buffered
    AwaitingFirstFrame,
    /// Part of a frame is buffered
    AccumulatingFrame,
    /// One or more non-terminal fragments are held, the next frame has not started
    AwaitingContinuationFrame,
}

/// Turns a byte stream into messages.
///
/// Bytes are fed in whatever chunks the transport produces. The expected
/// frame length is learned from the header as soon as it is complete, and
/// bytes past the end of one frame are kept as the start of the next.
#[derive(Debug)]
pub struct MessageReassembler {
    buffer: BytesMut,
    expected: Option<usize>,
    fragments: Vec<Frame>,
    read_buffer_size: usize,
}

impl Default for MessageReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageReassembler {
    /// Create a reassembler reading [`DEFAULT_READ_BUFFER_SIZE`] bytes at a time
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_READ_BUFFER_SIZE)
    }

    /// Create a reassembler with a custom read size
    pub fn with_buffer_size(read_buffer_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(read_buffer_size),
            expected: None,
            fragments: Vec::new(),
            read_buffer_size: read_buffer_size.max(1),
        }
    }

    /// Current position in the state machine
    pub fn state(&self) -> ReassemblyState {
        if self.expected.is_some() || !self.buffer.is_empty() {
            ReassemblyState::AccumulatingFrame
        } else if !self.fragments.is_empty() {
            ReassemblyState::AwaitingContinuationFrame
        } else {
            ReassemblyState::AwaitingFirstFrame
        }
    }

    /// Buffer a chunk of raw bytes
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pull the next complete message out of the buffered bytes.
    ///
    /// Returns `Ok(None)` when more bytes are needed. An
    /// [`FrameError::Overflow`] discards everything buffered.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            let expected = match self.expected {
                Some(expected) => expected,
                None => match FrameHeader::parse(&self.buffer) {
                    Ok(header) => {
                        let expected = header.frame_len();
                        self.expected = Some(expected);
                        expected
                    }
                    Err(FrameError::Truncated { .. }) => return Ok(None),
                    Err(e) => {
                        self.reset();
                        return Err(e.into());
                    }
                },
            };

            if self.buffer.len() < expected {
                return Ok(None);
            }

            let raw = self.buffer.split_to(expected);
            self.expected = None;
            let frame = Frame::parse(&raw)?;
            let fin = frame.fin();
            self.fragments.push(frame);

            if fin {
                return Ok(Some(self.deliver()));
            }
        }
    }

    /// Read from `stream` until a message completes.
    ///
    /// Reads are issued one at a time, each for at most the configured
    /// buffer size. `Ok(None)` means the peer closed the stream; a partially
    /// received message is dropped in that case.
    pub async fn read_message<S>(&mut self, stream: &mut S) -> Result<Option<Message>>
    where
        S: TransportRead + ?Sized,
    {
        let mut chunk = vec![0u8; self.read_buffer_size];
        loop {
            if let Some(message) = self.next_message()? {
                return Ok(Some(message));
            }

            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                tracing::trace!(state = ?self.state(), "stream closed while reading");
                self.reset();
                return Ok(None);
            }
            self.feed(&chunk[..n]);
        }
    }

    fn deliver(&mut self) -> Message {
        let frames = std::mem::take(&mut self.fragments);
        let opcode = frames
            .first()
            .map(Frame::opcode)
            .unwrap_or(Opcode::Continuation);

        let fragments = frames
            .into_iter()
            .map(|mut frame| {
                frame.unmask();
                frame.into_payload()
            })
            .collect();

        Message::new(opcode, fragments)
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.expected = None;
        self.fragments.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameHead;

    fn encoded(payload: &[u8], head: FrameHead, opcode: Opcode, mask: bool) -> Vec<u8> {
        Frame::encode(payload, head, opcode, mask)
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    #[test]
    fn test_single_frame_message() {
        let mut reassembler = MessageReassembler::new();
        reassembler.feed(&encoded(b"hello", FrameHead::FINAL, Opcode::Text, true));

        let message = reassembler.next_message().unwrap().unwrap();
        assert!(message.is_text());
        assert_eq!(message.to_text().unwrap(), "hello");
        assert_eq!(reassembler.state(), ReassemblyState::AwaitingFirstFrame);
        assert!(reassembler.next_message().unwrap().is_none());
    }

    #[test]
    fn test_byte_at_a_time() {
        let wire = encoded(&[9u8; 300], FrameHead::FINAL, Opcode::Binary, true);
        let mut reassembler = MessageReassembler::new();

        for (i, byte) in wire.iter().enumerate() {
            assert!(reassembler.next_message().unwrap().is_none());
            reassembler.feed(std::slice::from_ref(byte));
            if i + 1 < wire.len() {
                assert_eq!(reassembler.state(), ReassemblyState::AccumulatingFrame);
            }
        }

        let message = reassembler.next_message().unwrap().unwrap();
        assert!(message.is_binary());
        assert_eq!(message.payload().as_ref(), &[9u8; 300][..]);
    }

    #[test]
    fn test_continuation_frames() {
        let mut reassembler = MessageReassembler::new();
        reassembler.feed(&encoded(b"Hel", FrameHead::CONTINUED, Opcode::Text, true));
        assert!(reassembler.next_message().unwrap().is_none());
        assert_eq!(
            reassembler.state(),
            ReassemblyState::AwaitingContinuationFrame
        );

        reassembler.feed(&encoded(b"lo, ", FrameHead::CONTINUED, Opcode::Continuation, true));
        reassembler.feed(&encoded(b"world", FrameHead::FINAL, Opcode::Continuation, false));

        let message = reassembler.next_message().unwrap().unwrap();
        assert_eq!(message.opcode(), Opcode::Text);
        assert_eq!(message.fragments().len(), 3);
        assert_eq!(message.to_text().unwrap(), "Hello, world");
    }

    #[test]
    fn test_trailing_bytes_start_next_message() {
        let mut wire = encoded(b"first", FrameHead::FINAL, Opcode::Text, true);
        wire.extend(encoded(b"second", FrameHead::FINAL, Opcode::Text, true));

        let mut reassembler = MessageReassembler::new();
        reassembler.feed(&wire);

        let first = reassembler.next_message().unwrap().unwrap();
        let second = reassembler.next_message().unwrap().unwrap();
        assert_eq!(first.to_text().unwrap(), "first");
        assert_eq!(second.to_text().unwrap(), "second");
    }

    #[test]
    fn test_zero_length_payload() {
        let mut reassembler = MessageReassembler::new();
        reassembler.feed(&[0x81, 0x00]);

        let message = reassembler.next_message().unwrap().unwrap();
        assert!(message.is_empty());
        assert_eq!(message.fragments().len(), 1);
    }

    #[test]
    fn test_overflow_discards_buffer() {
        let mut reassembler = MessageReassembler::new();
        let mut wire = vec![0x82, 127];
        wire.extend_from_slice(&u64::MAX.to_be_bytes());
        reassembler.feed(&wire);

        let err = reassembler.next_message().unwrap_err();
        assert!(matches!(err, Error::Frame(FrameError::Overflow { .. })));
        assert_eq!(reassembler.state(), ReassemblyState::AwaitingFirstFrame);
    }

    #[test]
    fn test_invalid_utf8() {
        let message = Message::new(Opcode::Text, vec![Bytes::from_static(&[0xff, 0xfe])]);
        assert!(matches!(message.to_text(), Err(Error::InvalidUtf8)));
    }

    #[cfg(feature = "tokio-runtime")]
    mod stream_tests {
        use super::*;
        use crate::transport::IoStream;
        use tokio_test::io::Builder;

        #[tokio::test]
        async fn test_read_message_across_partial_reads() {
            let wire = encoded(b"split me", FrameHead::FINAL, Opcode::Text, true);
            let mock = Builder::new()
                .read(&wire[..1])
                .read(&wire[1..4])
                .read(&wire[4..9])
                .read(&wire[9..])
                .build();
            let mut stream = IoStream::new(mock);

            let mut reassembler = MessageReassembler::new();
            let message = reassembler.read_message(&mut stream).await.unwrap().unwrap();
            assert_eq!(message.to_text().unwrap(), "split me");

            assert!(reassembler.read_message(&mut stream).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_read_message_respects_buffer_size() {
            let first = encoded(b"abc", FrameHead::CONTINUED, Opcode::Binary, true);
            let second = encoded(b"def", FrameHead::FINAL, Opcode::Continuation, true);
            let mut wire = first.clone();
            wire.extend_from_slice(&second);

            // a 4 byte read size turns one transport chunk into several reads
            let mock = Builder::new()
                .read(&wire[..4])
                .read(&wire[4..8])
                .read(&wire[8..12])
                .read(&wire[12..16])
                .read(&wire[16..])
                .build();
            let mut stream = IoStream::new(mock);

            let mut reassembler = MessageReassembler::with_buffer_size(4);
            let message = reassembler.read_message(&mut stream).await.unwrap().unwrap();
            assert_eq!(message.payload().as_ref(), b"abcdef");
        }

        #[tokio::test]
        async fn test_closed_mid_frame_yields_none() {
            let wire = encoded(b"never finished", FrameHead::FINAL, Opcode::Text, true);
            let mock = Builder::new().read(&wire[..6]).build();
            let mut stream = IoStream::new(mock);

            let mut reassembler = MessageReassembler::new();
            assert!(reassembler.read_message(&mut stream).await.unwrap().is_none());
            assert_eq!(reassembler.state(), ReassemblyState::AwaitingFirstFrame);
        }
    }
}
