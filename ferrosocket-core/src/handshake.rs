//! WebSocket opening handshake
//!
//! Parsing and validation of the client's upgrade request, the accept token
//! computation from RFC 6455 Section 4.2.2, and [`HandshakeHandler`] which
//! runs the whole exchange over a transport stream.

use crate::error::{Error, HandshakeError, Result};
use crate::protocol::constants::*;
use crate::protocol::{http_header, http_value};
use crate::transport::TransportStream;
use base64::{engine::general_purpose, Engine as _};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// A parsed client upgrade request
#[derive(Debug, Clone, Default)]
pub struct ClientHandshake {
    method: String,
    resource_path: Option<http::Uri>,
    host: Option<String>,
    origin: Option<String>,
    version: Option<String>,
    key: Option<String>,
    sub_protocol: Option<String>,
    extensions: Option<String>,
    cookies: HashMap<String, String>,
    additional_fields: HashMap<String, String>,
}

impl ClientHandshake {
    /// Parse the raw request text.
    ///
    /// The request line must be `<method> <path> HTTP/1.1` followed by at
    /// least one `Name: Value` line. Header lines are consumed until the
    /// first one that does not have that shape, normally the blank line.
    pub fn parse(request: &str) -> std::result::Result<Self, HandshakeError> {
        let (request_line, mut rest) = request
            .split_once("\r\n")
            .ok_or_else(|| HandshakeError::Malformed("missing request line".to_string()))?;
        let (method, path) = parse_request_line(request_line)?;

        let mut handshake = Self {
            method: method.to_string(),
            resource_path: path.parse::<http::Uri>().ok(),
            ..Default::default()
        };

        let mut field_count = 0;
        while let Some((line, next)) = rest.split_once("\r\n") {
            let Some((name, value)) = parse_field(line) else {
                break;
            };
            handshake.record(name, value);
            field_count += 1;
            rest = next;
        }

        if field_count == 0 {
            return Err(HandshakeError::Malformed(
                "request has no header fields".to_string(),
            ));
        }

        Ok(handshake)
    }

    fn record(&mut self, name: &str, value: &str) {
        if value.is_empty() {
            return;
        }

        if name.eq_ignore_ascii_case(http_header::SEC_WEBSOCKET_KEY) {
            self.key = Some(value.to_string());
        } else if name.eq_ignore_ascii_case(http_header::SEC_WEBSOCKET_VERSION) {
            self.version = Some(value.to_string());
        } else if name.eq_ignore_ascii_case(http_header::SEC_WEBSOCKET_PROTOCOL) {
            self.sub_protocol = Some(value.to_string());
        } else if name.eq_ignore_ascii_case(http_header::ORIGIN) {
            self.origin = Some(value.to_lowercase());
        } else if name.eq_ignore_ascii_case(http_header::HOST) {
            self.host = Some(value.to_string());
        } else if name.eq_ignore_ascii_case(http_header::SEC_WEBSOCKET_EXTENSIONS) {
            // kept for inspection only, never negotiated
            self.extensions = Some(value.to_string());
        } else if name.eq_ignore_ascii_case(http_header::COOKIE) {
            for item in value.split(';') {
                if let Some((cookie, cookie_value)) = item.split_once('=') {
                    self.cookies
                        .insert(cookie.trim().to_string(), cookie_value.trim().to_string());
                }
            }
        } else {
            self.additional_fields
                .insert(name.to_string(), value.to_string());
        }
    }

    /// Check the request is a well-formed version 13 upgrade.
    ///
    /// Missing fields are reported as errors, never as panics.
    pub fn validate(&self) -> std::result::Result<(), HandshakeError> {
        if self.resource_path.is_none() {
            return Err(HandshakeError::Malformed(
                "resource path is not a valid URI".to_string(),
            ));
        }

        match self.host.as_deref() {
            Some(host) if !host.is_empty() => {}
            _ => return Err(HandshakeError::MissingField(http_header::HOST)),
        }

        match self.field(http_header::UPGRADE) {
            Some(http_value::WEBSOCKET) => {}
            Some(other) => {
                return Err(HandshakeError::InvalidField {
                    field: http_header::UPGRADE,
                    value: other.to_string(),
                })
            }
            None => return Err(HandshakeError::MissingField(http_header::UPGRADE)),
        }

        match self.field(http_header::CONNECTION) {
            Some(connection) if connection.contains(http_value::UPGRADE) => {}
            Some(other) => {
                return Err(HandshakeError::InvalidField {
                    field: http_header::CONNECTION,
                    value: other.to_string(),
                })
            }
            None => return Err(HandshakeError::MissingField(http_header::CONNECTION)),
        }

        match self.version.as_deref() {
            Some(WEBSOCKET_VERSION) => Ok(()),
            Some(other) => Err(HandshakeError::UnsupportedVersion(other.to_string())),
            None => Err(HandshakeError::MissingField(
                http_header::SEC_WEBSOCKET_VERSION,
            )),
        }
    }

    /// Shorthand for `validate().is_ok()`
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Request method
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Requested resource, if the path parsed as a URI
    pub fn resource_path(&self) -> Option<&http::Uri> {
        self.resource_path.as_ref()
    }

    /// Host header
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Origin header, lower-cased
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Sec-WebSocket-Version header
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Sec-WebSocket-Key header
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Sec-WebSocket-Protocol header
    pub fn sub_protocol(&self) -> Option<&str> {
        self.sub_protocol.as_deref()
    }

    /// Sec-WebSocket-Extensions header, verbatim
    pub fn extensions(&self) -> Option<&str> {
        self.extensions.as_deref()
    }

    /// Cookies sent with the request
    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    /// Look up one cookie
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Header fields not otherwise recognised, names as sent
    pub fn additional_fields(&self) -> &HashMap<String, String> {
        &self.additional_fields
    }

    /// Case-insensitive lookup in the additional fields
    pub fn field(&self, name: &str) -> Option<&str> {
        self.additional_fields
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

fn parse_request_line(line: &str) -> std::result::Result<(&str, &str), HandshakeError> {
    let mut parts = line.split(|c: char| c.is_ascii_whitespace());
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(path), Some(version), None)
            if !method.is_empty() && !path.is_empty() && version.eq_ignore_ascii_case("HTTP/1.1") =>
        {
            Ok((method, path))
        }
        _ => Err(HandshakeError::Malformed(format!(
            "invalid request line: {line}"
        ))),
    }
}

/// `Name:` followed by exactly one whitespace character, then the value
fn parse_field(line: &str) -> Option<(&str, &str)> {
    let (name, rest) = line.split_once(':')?;
    if name.is_empty() {
        return None;
    }
    let mut chars = rest.chars();
    if !chars.next()?.is_whitespace() {
        return None;
    }
    Some((name, chars.as_str()))
}

/// Compute the Sec-WebSocket-Accept value for a client key
pub fn compute_accept_token(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    general_purpose::STANDARD.encode(hasher.finalize())
}

/// The server's answer to an accepted upgrade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandshake {
    /// Sec-WebSocket-Accept token
    pub accept: String,
    /// `ws://` + host + resource path
    pub location: String,
    /// Echoed origin
    pub origin: Option<String>,
    /// Echoed sub-protocol
    pub sub_protocol: Option<String>,
}

impl ServerHandshake {
    /// Build the response to a validated client handshake
    pub fn from_client(client: &ClientHandshake) -> std::result::Result<Self, HandshakeError> {
        let key = client
            .key()
            .ok_or(HandshakeError::MissingField(http_header::SEC_WEBSOCKET_KEY))?;
        let path = client
            .resource_path()
            .map(ToString::to_string)
            .unwrap_or_default();

        Ok(Self {
            accept: compute_accept_token(key),
            location: format!(
                "{}{}{}",
                WS_SCHEME_PREFIX,
                client.host().unwrap_or_default(),
                path
            ),
            origin: client.origin().map(str::to_string),
            sub_protocol: client.sub_protocol().map(str::to_string),
        })
    }

    /// Render the `101 Switching Protocols` response
    pub fn to_response(&self) -> String {
        let mut response = format!(
            "{SWITCHING_PROTOCOLS_LINE}\r\n{}: {}\r\n{}: {}\r\n{}: {}\r\n",
            http_header::UPGRADE,
            http_value::WEBSOCKET,
            http_header::CONNECTION,
            http_value::UPGRADE,
            http_header::SEC_WEBSOCKET_ACCEPT,
            self.accept,
        );

        if let Some(protocol) = self.sub_protocol.as_deref().filter(|p| !p.is_empty()) {
            response.push_str(http_header::SEC_WEBSOCKET_PROTOCOL);
            response.push_str(": ");
            response.push_str(protocol);
            response.push_str("\r\n");
        }

        response.push_str("\r\n");
        response
    }
}

/// Runs the server side of the opening handshake against a configured
/// location and allowed origin
#[derive(Debug, Clone)]
pub struct HandshakeHandler {
    location: String,
    origin: String,
    max_request_size: usize,
}

impl HandshakeHandler {
    /// Create a handler accepting requests for `location` from `origin`
    pub fn new(location: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            origin: origin.into(),
            max_request_size: DEFAULT_MAX_HANDSHAKE_SIZE,
        }
    }

    /// Limit the size of the request read from the client
    pub fn with_max_request_size(mut self, max_request_size: usize) -> Self {
        self.max_request_size = max_request_size;
        self
    }

    /// Configured location, e.g. `ws://localhost:8181`
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Configured allowed origin
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Validate a parsed request against this server.
    ///
    /// Stricter than [`ClientHandshake::validate`]: a missing or empty
    /// `Sec-WebSocket-Key` is rejected, since no accept token can be derived.
    pub fn check(&self, client: &ClientHandshake) -> std::result::Result<(), HandshakeError> {
        client.validate()?;

        let host = client.host().unwrap_or_default();
        let requested = format!("{WS_SCHEME_PREFIX}{host}");
        if requested != self.location {
            return Err(HandshakeError::LocationMismatch {
                expected: self.location.clone(),
                received: requested,
            });
        }

        let origin = client.origin().unwrap_or_default();
        if origin != self.origin {
            return Err(HandshakeError::OriginMismatch {
                expected: self.origin.clone(),
                received: origin.to_string(),
            });
        }

        if client.key().map_or(true, str::is_empty) {
            return Err(HandshakeError::MissingField(http_header::SEC_WEBSOCKET_KEY));
        }

        Ok(())
    }

    /// Read the client's request, validate it and answer with the 101
    /// response.
    ///
    /// On any failure the stream is closed without a response.
    pub async fn shake<S>(&self, stream: &mut S) -> Result<ClientHandshake>
    where
        S: TransportStream,
    {
        match self.negotiate(stream).await {
            Ok(client) => Ok(client),
            Err(e) => {
                match &e {
                    Error::Handshake(reason) => tracing::debug!(
                        peer = ?stream.remote_addr().ok(),
                        %reason,
                        "invalid handshake received"
                    ),
                    other => tracing::debug!(
                        peer = ?stream.remote_addr().ok(),
                        error = %other,
                        "handshake aborted"
                    ),
                }
                if let Err(close_err) = stream.close().await {
                    tracing::trace!(error = %close_err, "closing rejected stream failed");
                }
                Err(e)
            }
        }
    }

    async fn negotiate<S>(&self, stream: &mut S) -> Result<ClientHandshake>
    where
        S: TransportStream,
    {
        let request = self.read_request(stream).await?;
        let client = ClientHandshake::parse(&request)?;
        self.check(&client)?;

        let response = ServerHandshake::from_client(&client)?;
        stream.write_all(response.to_response().as_bytes()).await?;
        stream.flush().await?;

        Ok(client)
    }

    async fn read_request<S>(&self, stream: &mut S) -> Result<String>
    where
        S: TransportStream,
    {
        let mut request = Vec::with_capacity(DEFAULT_READ_BUFFER_SIZE);
        let mut chunk = [0u8; DEFAULT_READ_BUFFER_SIZE];

        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..n]);

            if request
                .windows(HEADER_TERMINATOR.len())
                .any(|window| window == HEADER_TERMINATOR)
            {
                break;
            }
            if request.len() >= self.max_request_size {
                return Err(HandshakeError::TooLarge {
                    limit: self.max_request_size,
                }
                .into());
            }
        }

        if request.is_empty() {
            return Err(Error::TransportClosed);
        }

        Ok(String::from_utf8_lossy(&request).into_owned())
    }
}
