//! Prelude module with common imports
//!
//! This module re-exports the most commonly used types and traits
//! from the ferrosocket-server crate for ergonomic imports.

// Server types
pub use crate::config::{ConnectionConfig, ServerConfig};
pub use crate::connection::Connection;
pub use crate::handler::{on_connect, on_disconnect, on_receive, EchoHandler, Handler, SharedHandler};
pub use crate::logging::init_logging;
pub use crate::server::{Server, ServerBuilder};

// Re-export core types
pub use ferrosocket_core::prelude::*;
