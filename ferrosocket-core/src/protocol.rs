//! WebSocket protocol constants
//!
//! Opcodes, frame header bits and the handshake constants from RFC 6455.

/// WebSocket opcodes as defined in RFC 6455 Section 5.2
///
/// Reserved values are kept as distinct variants so that a frame carrying one
/// round-trips unchanged; nothing in ferrosocket assigns them behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Reserved for future use
    Reserved3 = 0x3,
    /// Reserved for future use
    Reserved4 = 0x4,
    /// Reserved for future use
    Reserved5 = 0x5,
    /// Reserved for future use
    Reserved6 = 0x6,
    /// Reserved for future use
    Reserved7 = 0x7,
    /// Close frame
    Close = 0x8,
    /// Ping frame
    Ping = 0x9,
    /// Pong frame
    Pong = 0xA,
    /// Reserved for future use
    ReservedB = 0xB,
    /// Reserved for future use
    ReservedC = 0xC,
    /// Reserved for future use
    ReservedD = 0xD,
    /// Reserved for future use
    ReservedE = 0xE,
    /// Reserved for future use
    ReservedF = 0xF,
}

impl Opcode {
    /// Decode the low nibble of a frame's first byte
    pub fn from_bits(value: u8) -> Self {
        match value & frame::OPCODE_MASK {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x3 => Opcode::Reserved3,
            0x4 => Opcode::Reserved4,
            0x5 => Opcode::Reserved5,
            0x6 => Opcode::Reserved6,
            0x7 => Opcode::Reserved7,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            0xB => Opcode::ReservedB,
            0xC => Opcode::ReservedC,
            0xD => Opcode::ReservedD,
            0xE => Opcode::ReservedE,
            _ => Opcode::ReservedF,
        }
    }

    /// Get the numeric value of the opcode
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Check if this is a control opcode
    pub fn is_control(&self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }

    /// Check if this is a data opcode
    pub fn is_data(&self) -> bool {
        matches!(self, Opcode::Text | Opcode::Binary | Opcode::Continuation)
    }

    /// Check if this is a reserved opcode
    pub fn is_reserved(&self) -> bool {
        !self.is_control() && !self.is_data()
    }
}

/// WebSocket protocol constants
pub mod constants {
    /// The only protocol version this server speaks
    pub const WEBSOCKET_VERSION: &str = "13";

    /// GUID appended to the client key when computing the accept token
    pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

    /// Scheme prefix of a server location
    pub const WS_SCHEME_PREFIX: &str = "ws://";

    /// Largest payload length a frame may declare
    pub const MAX_PAYLOAD_LEN: u64 = i32::MAX as u64;

    /// Bytes requested from the transport per frame read
    pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

    /// Largest opening handshake request accepted
    pub const DEFAULT_MAX_HANDSHAKE_SIZE: usize = 8192;

    /// The fixed response status line of a successful upgrade
    pub const SWITCHING_PROTOCOLS_LINE: &str = "HTTP/1.1 101 Switching Protocols";
}

/// Frame header bit positions and masks
pub mod frame {
    /// FIN bit position
    pub const FIN_BIT: u8 = 0x80;

    /// RSV1 bit position
    pub const RSV1_BIT: u8 = 0x40;

    /// RSV2 bit position
    pub const RSV2_BIT: u8 = 0x20;

    /// RSV3 bit position
    pub const RSV3_BIT: u8 = 0x10;

    /// Opcode mask
    pub const OPCODE_MASK: u8 = 0x0F;

    /// MASK bit position
    pub const MASK_BIT: u8 = 0x80;

    /// Payload length mask for 7-bit length
    pub const PAYLOAD_LEN_MASK: u8 = 0x7F;

    /// Extended payload length (16-bit) marker
    pub const PAYLOAD_LEN_16: u8 = 126;

    /// Extended payload length (64-bit) marker
    pub const PAYLOAD_LEN_64: u8 = 127;

    /// Masking key length
    pub const MASKING_KEY_LEN: usize = 4;
}

/// Handshake header names in their canonical spelling
pub mod http_header {
    /// Host header
    pub const HOST: &str = "Host";

    /// Origin header
    pub const ORIGIN: &str = "Origin";

    /// Upgrade header
    pub const UPGRADE: &str = "Upgrade";

    /// Connection header
    pub const CONNECTION: &str = "Connection";

    /// Cookie header
    pub const COOKIE: &str = "Cookie";

    /// Sec-WebSocket-Key header
    pub const SEC_WEBSOCKET_KEY: &str = "Sec-WebSocket-Key";

    /// Sec-WebSocket-Version header
    pub const SEC_WEBSOCKET_VERSION: &str = "Sec-WebSocket-Version";

    /// Sec-WebSocket-Protocol header
    pub const SEC_WEBSOCKET_PROTOCOL: &str = "Sec-WebSocket-Protocol";

    /// Sec-WebSocket-Extensions header
    pub const SEC_WEBSOCKET_EXTENSIONS: &str = "Sec-WebSocket-Extensions";

    /// Sec-WebSocket-Accept header
    pub const SEC_WEBSOCKET_ACCEPT: &str = "Sec-WebSocket-Accept";
}

/// Handshake header values
pub mod http_value {
    /// Required value of the Upgrade header
    pub const WEBSOCKET: &str = "websocket";

    /// Token the Connection header must contain
    pub const UPGRADE: &str = "Upgrade";
}
