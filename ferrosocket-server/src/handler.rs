//! Connection event handlers
//!
//! A [`Handler`] observes the lifecycle of connections: it is told when a
//! connection completes its handshake, when a message arrives and when the
//! connection goes away. Any number of handlers can be registered on a
//! server or on a single connection; each event reaches all of them in
//! registration order.
//!
//! Callbacks run on the connection's receive task and must not block. Work
//! that needs to await, such as replying, belongs in a spawned task:
//!
//! ```rust,no_run
//! use ferrosocket_server::prelude::*;
//! use std::sync::Arc;
//!
//! struct Shout;
//!
//! impl Handler for Shout {
//!     fn on_receive(&self, connection: &Arc<Connection>, message: &Message) {
//!         let connection = Arc::clone(connection);
//!         let reply = message.to_text().unwrap_or_default().to_uppercase();
//!         tokio::spawn(async move {
//!             let _ = connection.send(&reply).await;
//!         });
//!     }
//! }
//! ```

use crate::connection::Connection;
use ferrosocket_core::Message;
use std::fmt;
use std::sync::Arc;

/// Observer of connection events. Every method defaults to doing nothing.
pub trait Handler: Send + Sync + 'static {
    /// A client completed the opening handshake
    fn on_connect(&self, _connection: &Arc<Connection>) {}

    /// A complete message arrived
    fn on_receive(&self, _connection: &Arc<Connection>, _message: &Message) {}

    /// The connection closed. Called once per connection.
    fn on_disconnect(&self, _connection: &Arc<Connection>) {}
}

/// Shared handler type
pub type SharedHandler = Arc<dyn Handler>;

/// Replies to every text message with the same text
#[derive(Debug, Clone, Default)]
pub struct EchoHandler;

impl EchoHandler {
    /// Create a new echo handler
    pub fn new() -> Self {
        Self
    }
}

impl Handler for EchoHandler {
    fn on_receive(&self, connection: &Arc<Connection>, message: &Message) {
        let Ok(text) = message.to_text() else {
            return;
        };
        let connection = Arc::clone(connection);
        tokio::spawn(async move {
            if let Err(e) = connection.send(&text).await {
                tracing::debug!(connection = connection.id(), error = %e, "echo failed");
            }
        });
    }
}

macro_rules! closure_handler {
    ($(#[$doc:meta])* $name:ident, $method:ident, ($($arg:ident: $ty:ty),*)) => {
        $(#[$doc])*
        #[derive(Clone)]
        pub struct $name<F> {
            f: F,
        }

        impl<F> Handler for $name<F>
        where
            F: Fn($($ty),*) + Send + Sync + 'static,
        {
            fn $method(&self, $($arg: $ty),*) {
                (self.f)($($arg),*)
            }
        }

        impl<F> fmt::Debug for $name<F> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("f", &"<function>")
                    .finish()
            }
        }
    };
}

closure_handler!(
    /// Handler running a closure on connect
    ConnectFn,
    on_connect,
    (connection: &Arc<Connection>)
);

closure_handler!(
    /// Handler running a closure for every message
    ReceiveFn,
    on_receive,
    (connection: &Arc<Connection>, message: &Message)
);

closure_handler!(
    /// Handler running a closure on disconnect
    DisconnectFn,
    on_disconnect,
    (connection: &Arc<Connection>)
);

/// Create a handler from an `on_connect` closure
pub fn on_connect<F>(f: F) -> ConnectFn<F>
where
    F: Fn(&Arc<Connection>) + Send + Sync + 'static,
{
    ConnectFn { f }
}

/// Create a handler from an `on_receive` closure
pub fn on_receive<F>(f: F) -> ReceiveFn<F>
where
    F: Fn(&Arc<Connection>, &Message) + Send + Sync + 'static,
{
    ReceiveFn { f }
}

/// Create a handler from an `on_disconnect` closure
pub fn on_disconnect<F>(f: F) -> DisconnectFn<F>
where
    F: Fn(&Arc<Connection>) + Send + Sync + 'static,
{
    DisconnectFn { f }
}
