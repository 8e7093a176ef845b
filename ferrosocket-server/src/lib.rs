//! ferrosocket server
//!
//! Event-driven WebSocket server. Clients are accepted on a listener, go
//! through the opening handshake and are then handed to the registered
//! [`Handler`]s as [`Connection`]s.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ferrosocket_server::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> ferrosocket_core::Result<()> {
//!     let mut server = Server::builder()
//!         .location("ws://localhost:8181")
//!         .origin("null")
//!         .handler(EchoHandler::new())
//!         .build()?;
//!
//!     server.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.dispose().await;
//!
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![doc(html_root_url = "https://docs.rs/ferrosocket-server/")]

// Public modules
pub mod config;
pub mod connection;
pub mod handler;
pub mod logging;
pub mod server;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use config::{ConnectionConfig, ServerConfig};
pub use connection::Connection;
pub use handler::{EchoHandler, Handler, SharedHandler};
pub use logging::init_logging;
pub use server::{Server, ServerBuilder};
