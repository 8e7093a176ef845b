//! Server configuration
//!
//! This module provides configuration options for the WebSocket server.

use ferrosocket_core::error::{ConfigError, Error};
use ferrosocket_core::handshake::HandshakeHandler;
use ferrosocket_core::protocol::constants::{
    DEFAULT_MAX_HANDSHAKE_SIZE, DEFAULT_READ_BUFFER_SIZE, WS_SCHEME_PREFIX,
};
use std::net::SocketAddr;
use std::time::Duration;

/// Port used when the location does not name one
pub const DEFAULT_PORT: u16 = 80;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Location clients must connect to, `ws://host[:port]`. The handshake
    /// `Host` header has to match it exactly.
    pub location: String,
    /// The only origin allowed to connect
    pub origin: String,
    /// Listen address; defaults to all interfaces on the location's port
    pub bind_address: Option<SocketAddr>,
    /// Bytes requested per read while receiving frames
    pub read_buffer_size: usize,
    /// Largest accepted handshake request
    pub max_handshake_size: usize,
    /// Deadline for the client's handshake request. `None` waits forever.
    pub handshake_timeout: Option<Duration>,
    /// Mask frames sent to clients
    pub mask_outbound: bool,
    /// `tracing` filter used when `RUST_LOG` is not set
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            location: "ws://localhost:8181".to_string(),
            origin: "null".to_string(),
            bind_address: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_handshake_size: DEFAULT_MAX_HANDSHAKE_SIZE,
            handshake_timeout: None,
            mask_outbound: false,
            log_filter: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Configuration for a location and allowed origin, defaults elsewhere
    pub fn new(location: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            origin: origin.into(),
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ferrosocket_core::Result<()> {
        self.location_uri()?;

        if self.read_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Validation(
                "read_buffer_size must be greater than 0".to_string(),
            )));
        }

        if self.max_handshake_size == 0 {
            return Err(Error::Config(ConfigError::Validation(
                "max_handshake_size must be greater than 0".to_string(),
            )));
        }

        if self.handshake_timeout == Some(Duration::ZERO) {
            return Err(Error::Config(ConfigError::Validation(
                "handshake_timeout must be greater than 0".to_string(),
            )));
        }

        Ok(())
    }

    /// Parse the location. Only `ws://host[:port]` without a path is accepted.
    pub fn location_uri(&self) -> ferrosocket_core::Result<http::Uri> {
        let invalid = || {
            Error::Config(ConfigError::InvalidValue {
                field: "location".to_string(),
                value: self.location.clone(),
            })
        };

        if !self.location.starts_with(WS_SCHEME_PREFIX) {
            return Err(invalid());
        }

        let uri: http::Uri = self.location.parse().map_err(|_| invalid())?;
        match uri.host() {
            Some(host) if !host.is_empty() => {}
            _ => return Err(invalid()),
        }
        if !matches!(uri.path(), "" | "/") || uri.query().is_some() {
            return Err(invalid());
        }

        Ok(uri)
    }

    /// Port named by the location
    pub fn port(&self) -> ferrosocket_core::Result<u16> {
        Ok(self.location_uri()?.port_u16().unwrap_or(DEFAULT_PORT))
    }

    /// Address the listener binds to
    pub fn resolved_bind_address(&self) -> ferrosocket_core::Result<SocketAddr> {
        match self.bind_address {
            Some(addr) => Ok(addr),
            None => Ok(SocketAddr::from(([0, 0, 0, 0], self.port()?))),
        }
    }

    /// Handshake engine for this location and origin
    pub fn handshake_handler(&self) -> HandshakeHandler {
        HandshakeHandler::new(self.location.trim_end_matches('/'), self.origin.clone())
            .with_max_request_size(self.max_handshake_size)
    }

    /// Per-connection settings
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            read_buffer_size: self.read_buffer_size,
            mask_outbound: self.mask_outbound,
        }
    }
}

/// Settings each connection is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Bytes requested per read
    pub read_buffer_size: usize,
    /// Mask outgoing frames
    pub mask_outbound: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            mask_outbound: false,
        }
    }
}
