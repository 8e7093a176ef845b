//! # ferrosocket core
//!
//! Sans-io building blocks of the ferrosocket WebSocket server:
//!
//! - Error types shared by every ferrosocket crate
//! - The RFC 6455 frame codec, including XOR masking
//! - Reassembly of messages split across reads and continuation frames
//! - The opening handshake: request parsing, validation, accept token
//! - Transport traits the server runs on
//!
//! Nothing in this crate opens a socket. See `ferrosocket-transport-tcp` and
//! `ferrosocket-server`.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/ferrosocket-core/")]

// Core modules
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod protocol;
pub mod transport;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use error::{Error, Result};
pub use frame::{Frame, FrameHead, FrameHeader};
pub use handshake::{ClientHandshake, HandshakeHandler, ServerHandshake};
pub use message::{Message, MessageReassembler};
pub use protocol::Opcode;
pub use transport::{Transport, TransportRead, TransportStream, TransportWrite};
