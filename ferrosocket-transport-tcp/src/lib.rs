//! TCP Transport for ferrosocket
//!
//! Plain TCP listener and stream implementing the ferrosocket transport
//! traits on top of tokio.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/ferrosocket-transport-tcp/")]

#[cfg(feature = "tokio-runtime")]
pub mod tcp;

// Re-export TCP transport types
#[cfg(feature = "tokio-runtime")]
pub use tcp::{TcpReadHalf, TcpStream, TcpTransport, TcpWriteHalf};

/// Prelude module
pub mod prelude {
    #[cfg(feature = "tokio-runtime")]
    pub use crate::tcp::{TcpStream, TcpTransport};
    pub use ferrosocket_core::transport::{Transport, TransportRead, TransportStream, TransportWrite};
}
