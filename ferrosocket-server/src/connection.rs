//! WebSocket connection handling
//!
//! A [`Connection`] is created once the opening handshake succeeded. It owns
//! both halves of the transport: the write half sits behind an async mutex so
//! any task can send, the read half is handed to the receive task started by
//! [`Connection::start_receiving`]. Sending and receiving never wait on each
//! other.

use crate::config::ConnectionConfig;
use crate::handler::{self, Handler, SharedHandler};
use ferrosocket_core::frame::{Frame, FrameHead};
use ferrosocket_core::handshake::ClientHandshake;
use ferrosocket_core::message::MessageReassembler;
use ferrosocket_core::protocol::Opcode;
use ferrosocket_core::transport::{TransportRead, TransportStream, TransportWrite};
use ferrosocket_core::{Error, Message, Result};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::task::JoinHandle;

/// One connected client
pub struct Connection {
    id: u64,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    handshake: ClientHandshake,
    config: ConnectionConfig,
    writer: tokio::sync::Mutex<Box<dyn TransportWrite>>,
    reader: Mutex<Option<Box<dyn TransportRead>>>,
    handlers: RwLock<Vec<SharedHandler>>,
    connected: AtomicBool,
    disconnect_fired: AtomicBool,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("local_addr", &self.local_addr)
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .field("stream", &"<stream>")
            .finish()
    }
}

impl Connection {
    /// Wrap a stream that has completed the handshake
    pub fn new<S>(
        id: u64,
        stream: S,
        handshake: ClientHandshake,
        config: ConnectionConfig,
    ) -> Result<Arc<Self>>
    where
        S: TransportStream,
    {
        let remote_addr = stream.remote_addr()?;
        let local_addr = stream.local_addr()?;
        let (reader, writer) = stream.into_split();

        Ok(Arc::new(Self {
            id,
            remote_addr,
            local_addr,
            handshake,
            config,
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            reader: Mutex::new(Some(Box::new(reader))),
            handlers: RwLock::new(Vec::new()),
            connected: AtomicBool::new(true),
            disconnect_fired: AtomicBool::new(false),
        }))
    }

    /// Server-assigned identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The client's opening handshake
    pub fn handshake(&self) -> &ClientHandshake {
        &self.handshake
    }

    /// False once the connection closed, a send failed or the peer went away
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Register a handler for this connection's events
    pub fn subscribe(&self, handler: impl Handler) {
        self.add_handler(Arc::new(handler));
    }

    /// Register an already shared handler
    pub fn add_handler(&self, handler: SharedHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Run `f` for every message received
    pub fn on_receive<F>(&self, f: F)
    where
        F: Fn(&Arc<Connection>, &Message) + Send + Sync + 'static,
    {
        self.subscribe(handler::on_receive(f));
    }

    /// Run `f` once when the connection goes away
    pub fn on_disconnect<F>(&self, f: F)
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        self.subscribe(handler::on_disconnect(f));
    }

    /// Send a text message as one final frame
    pub async fn send(self: &Arc<Self>, text: &str) -> Result<()> {
        self.send_frame(Opcode::Text, text.as_bytes()).await
    }

    /// Send a binary message as one final frame
    pub async fn send_binary(self: &Arc<Self>, data: &[u8]) -> Result<()> {
        self.send_frame(Opcode::Binary, data).await
    }

    /// Send one final frame with the given opcode.
    ///
    /// If the connection is already down, or the write fails, the connection
    /// is closed, disconnect handlers run and [`Error::TransportClosed`] is
    /// returned.
    pub async fn send_frame(self: &Arc<Self>, opcode: Opcode, payload: &[u8]) -> Result<()> {
        if !self.is_connected() {
            self.close_quietly().await;
            return Err(Error::TransportClosed);
        }

        let frame = Frame::encode(payload, FrameHead::FINAL, opcode, self.config.mask_outbound)?;
        let bytes = frame.to_bytes();

        let written = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(&bytes).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };

        match written {
            Ok(()) => {
                tracing::debug!(connection = self.id, bytes = bytes.len(), "sent frame");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(connection = self.id, error = %e, "send failed");
                self.close_quietly().await;
                if e.is_transport_closed() {
                    Err(Error::TransportClosed)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Start the receive task.
    ///
    /// Returns `None` if receiving was already started.
    pub fn start_receiving(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        let connection = Arc::clone(self);
        Some(tokio::spawn(async move {
            connection.receive_loop(reader).await;
        }))
    }

    async fn receive_loop(self: Arc<Self>, mut reader: Box<dyn TransportRead>) {
        let mut reassembler = MessageReassembler::with_buffer_size(self.config.read_buffer_size);

        loop {
            match reassembler.read_message(reader.as_mut()).await {
                Ok(Some(message)) => {
                    tracing::trace!(
                        connection = self.id,
                        opcode = ?message.opcode(),
                        len = message.len(),
                        "message received"
                    );
                    for handler in self.handlers() {
                        handler.on_receive(&self, &message);
                    }
                }
                Ok(None) => {
                    tracing::debug!(connection = self.id, "peer closed the stream");
                    break;
                }
                Err(e) if e.is_transport_closed() => {
                    tracing::debug!(connection = self.id, error = %e, "stream closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(connection = self.id, error = %e, "receive failed, closing");
                    break;
                }
            }
        }

        self.close_quietly().await;
    }

    /// Shut the write half down and run disconnect handlers
    pub async fn close(self: &Arc<Self>) -> Result<()> {
        let result = if self.connected.swap(false, Ordering::AcqRel) {
            self.writer.lock().await.close().await
        } else {
            Ok(())
        };

        self.fire_disconnect();
        result
    }

    async fn close_quietly(self: &Arc<Self>) {
        if let Err(e) = self.close().await {
            tracing::trace!(connection = self.id, error = %e, "close failed");
        }
    }

    fn fire_disconnect(self: &Arc<Self>) {
        if self.disconnect_fired.swap(true, Ordering::AcqRel) {
            return;
        }
        self.connected.store(false, Ordering::Release);

        tracing::debug!(connection = self.id, peer = %self.remote_addr, "connection closed");
        for handler in self.handlers() {
            handler.on_disconnect(self);
        }
    }

    fn handlers(&self) -> Vec<SharedHandler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrosocket_core::transport::IoStream;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::mpsc;

    fn handshake() -> ClientHandshake {
        ClientHandshake::parse(
            "GET / HTTP/1.1\r\nHost: localhost:8181\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n",
        )
        .unwrap()
    }

    fn connection(config: ConnectionConfig) -> (Arc<Connection>, DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let connection = Connection::new(7, IoStream::new(server), handshake(), config).unwrap();
        (connection, client)
    }

    fn client_frame(payload: &[u8], head: FrameHead, opcode: Opcode) -> Vec<u8> {
        Frame::encode(payload, head, opcode, true)
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    #[tokio::test]
    async fn test_send_writes_unmasked_text_frame() {
        let (connection, mut client) = connection(ConnectionConfig::default());

        connection.send("hi").await.unwrap();

        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x81, 0x02, b'h', b'i']);
    }

    #[tokio::test]
    async fn test_send_binary_with_masking() {
        let config = ConnectionConfig {
            mask_outbound: true,
            ..ConnectionConfig::default()
        };
        let (connection, mut client) = connection(config);

        connection.send_binary(&[1, 2, 3]).await.unwrap();

        let mut buf = [0u8; 9];
        client.read_exact(&mut buf).await.unwrap();
        let mut frame = Frame::parse(&buf).unwrap();
        assert_eq!(frame.opcode(), Opcode::Binary);
        assert!(frame.is_masked());
        frame.unmask();
        assert_eq!(frame.payload(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn test_exact_bytes_with_mock_writer() {
        let mock = tokio_test::io::Builder::new()
            .write(&[0x81, 0x03, b'a', b'b', b'c'])
            .build();
        let connection = Connection::new(
            1,
            IoStream::new(mock),
            handshake(),
            ConnectionConfig::default(),
        )
        .unwrap();

        connection.send("abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_dispatches_to_every_handler() {
        let (connection, mut client) = connection(ConnectionConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        for tag in ["first", "second"] {
            let tx = tx.clone();
            connection.on_receive(move |_, message| {
                let _ = tx.send((tag, message.to_text().unwrap()));
            });
        }
        connection.start_receiving().unwrap();
        assert!(connection.start_receiving().is_none());

        let mut wire = client_frame(b"Hel", FrameHead::CONTINUED, Opcode::Text);
        wire.extend(client_frame(b"lo", FrameHead::FINAL, Opcode::Continuation));
        client.write_all(&wire).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), ("first", "Hello".to_string()));
        assert_eq!(rx.recv().await.unwrap(), ("second", "Hello".to_string()));
    }

    #[tokio::test]
    async fn test_disconnect_fires_once_after_peer_close_mid_frame() {
        let (connection, mut client) = connection(ConnectionConfig::default());
        let disconnects = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&disconnects);
        connection.on_disconnect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&received);
        connection.on_receive(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let task = connection.start_receiving().unwrap();
        let wire = client_frame(b"incomplete", FrameHead::FINAL, Opcode::Text);
        client.write_all(&wire[..5]).await.unwrap();
        drop(client);

        task.await.unwrap();
        assert!(!connection.is_connected());
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(received.load(Ordering::SeqCst), 0);

        // a later send and close must not fire again
        assert!(matches!(
            connection.send("late").await,
            Err(Error::TransportClosed)
        ));
        connection.close().await.unwrap();
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_overflow_closes_connection() {
        let (connection, mut client) = connection(ConnectionConfig::default());
        let disconnects = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&disconnects);
        connection.on_disconnect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let task = connection.start_receiving().unwrap();
        let mut wire = vec![0x82, 0xff];
        wire.extend_from_slice(&u64::MAX.to_be_bytes());
        wire.extend_from_slice(&[0, 0, 0, 0]);
        client.write_all(&wire).await.unwrap();

        task.await.unwrap();
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_shuts_the_stream() {
        let (connection, mut client) = connection(ConnectionConfig::default());
        connection.close().await.unwrap();
        assert!(!connection.is_connected());

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }
}
