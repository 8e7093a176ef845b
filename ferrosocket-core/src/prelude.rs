//! Prelude module for ferrosocket core
//!
//! Re-exports the types and traits most users of the crate need.

pub use crate::error::{Error, FrameError, HandshakeError, Result};
pub use crate::frame::{toggle_masking, Frame, FrameHead, FrameHeader};
pub use crate::handshake::{compute_accept_token, ClientHandshake, HandshakeHandler, ServerHandshake};
pub use crate::message::{Message, MessageReassembler, ReassemblyState};
pub use crate::protocol::Opcode;
pub use crate::transport::{Transport, TransportRead, TransportStream, TransportWrite};

#[cfg(feature = "tokio-runtime")]
pub use crate::transport::IoStream;

// Re-export commonly used external dependencies
pub use bytes::{Bytes, BytesMut};
