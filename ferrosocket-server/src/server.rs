//! WebSocket server implementation
//!
//! The [`Server`] owns the listener and a single accept task. Every accepted
//! stream gets its own task that runs the opening handshake, builds the
//! [`Connection`], notifies the registered handlers and starts receiving.
//! Tracking live connections is left to the application.

use crate::{
    config::{ConnectionConfig, ServerConfig},
    connection::Connection,
    handler::{self, Handler, SharedHandler},
};
use ferrosocket_core::error::{ConfigError, TimeoutError};
use ferrosocket_core::handshake::HandshakeHandler;
use ferrosocket_core::transport::{Transport, TransportStream};
use ferrosocket_core::{Error, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// WebSocket server
pub struct Server {
    config: ServerConfig,
    handlers: Arc<RwLock<Vec<SharedHandler>>>,
    local_addr: Option<SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
    accept_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("handlers", &"<handlers>")
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Server {
    /// Create a server; nothing is bound until [`Server::start`]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            handlers: Arc::new(RwLock::new(Vec::new())),
            local_addr: None,
            shutdown: None,
            accept_task: None,
        }
    }

    /// Create a server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Register a handler. It is attached to every connection established
    /// from now on.
    pub fn add_handler(&self, handler: impl Handler) {
        self.add_shared_handler(Arc::new(handler));
    }

    /// Register an already shared handler
    pub fn add_shared_handler(&self, handler: SharedHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Run `f` for every new connection
    pub fn on_connect<F>(&self, f: F)
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        self.add_handler(handler::on_connect(f));
    }

    /// Bind a TCP listener for the configured location and start accepting.
    ///
    /// Returns the bound address.
    #[cfg(feature = "tcp-transport")]
    pub async fn start(&mut self) -> Result<SocketAddr> {
        self.ensure_stopped()?;
        self.config.validate()?;

        let bind_address = self.config.resolved_bind_address()?;
        let transport = ferrosocket_transport_tcp::TcpTransport::bind(bind_address).await?;
        self.start_with_transport(transport)
    }

    /// Start accepting from any transport. Must be called within a tokio
    /// runtime.
    pub fn start_with_transport<T>(&mut self, transport: T) -> Result<SocketAddr>
    where
        T: Transport,
    {
        self.ensure_stopped()?;
        self.config.validate()?;

        let local_addr = transport.local_addr()?;
        let context = Arc::new(AcceptContext {
            handshake: self.config.handshake_handler(),
            handshake_timeout: self.config.handshake_timeout,
            connection_config: self.config.connection_config(),
            handlers: Arc::clone(&self.handlers),
            next_id: AtomicU64::new(1),
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.accept_task = Some(tokio::spawn(accept_loop(transport, context, shutdown_rx)));
        self.shutdown = Some(shutdown_tx);
        self.local_addr = Some(local_addr);

        tracing::info!(location = %self.config.location, %local_addr, "server started");
        Ok(local_addr)
    }

    /// Address the listener is bound to, while started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// True while the accept loop runs
    pub fn is_running(&self) -> bool {
        self.accept_task
            .as_ref()
            .map_or(false, |task| !task.is_finished())
    }

    /// Stop accepting and release the listener.
    ///
    /// Established connections are not touched.
    pub async fn dispose(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "accept task did not stop cleanly");
            }
        }
        if self.local_addr.take().is_some() {
            tracing::info!(location = %self.config.location, "server disposed");
        }
    }

    fn ensure_stopped(&self) -> Result<()> {
        if self.is_running() {
            return Err(Error::Config(ConfigError::Validation(
                "server is already running".to_string(),
            )));
        }
        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

/// Everything a connection task needs, shared by all of them
struct AcceptContext {
    handshake: HandshakeHandler,
    handshake_timeout: Option<Duration>,
    connection_config: ConnectionConfig,
    handlers: Arc<RwLock<Vec<SharedHandler>>>,
    next_id: AtomicU64,
}

async fn accept_loop<T>(transport: T, context: Arc<AcceptContext>, mut shutdown: oneshot::Receiver<()>)
where
    T: Transport,
{
    let mut connection_counter = 0u64;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::debug!("accept loop stopped");
                break;
            }
            result = transport.accept() => {
                match result {
                    Ok(stream) => {
                        connection_counter += 1;
                        tracing::debug!(
                            accepted = connection_counter,
                            peer = ?stream.remote_addr().ok(),
                            "accepted connection"
                        );
                        let context = Arc::clone(&context);
                        tokio::spawn(async move {
                            context.establish(stream).await;
                        });
                    }
                    Err(e) => {
                        let failure = Error::ListenerFailure(e.to_string());
                        tracing::error!(error = %failure, "listener socket is closed");
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = transport.close().await {
        tracing::trace!(error = %e, "closing listener failed");
    }
}

impl AcceptContext {
    async fn establish<S>(&self, mut stream: S)
    where
        S: TransportStream,
    {
        let peer = stream.remote_addr().ok();

        let shaken = match self.handshake_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.handshake.shake(&mut stream)).await {
                    Ok(result) => result,
                    Err(_) => {
                        if let Err(e) = stream.close().await {
                            tracing::trace!(error = %e, "closing timed out stream failed");
                        }
                        Err(TimeoutError::Handshake { timeout: limit }.into())
                    }
                }
            }
            None => self.handshake.shake(&mut stream).await,
        };

        let client = match shaken {
            Ok(client) => client,
            Err(e) if e.is_transport_closed() => {
                tracing::debug!(?peer, "peer left before completing the handshake");
                return;
            }
            Err(e) => {
                tracing::warn!(?peer, error = %e, "invalid handshake, connection dropped");
                return;
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = match Connection::new(id, stream, client, self.connection_config) {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(?peer, error = %e, "failed to set up connection");
                return;
            }
        };

        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in &handlers {
            connection.add_handler(Arc::clone(handler));
        }

        tracing::debug!(connection = id, ?peer, "handshake complete");
        for handler in &handlers {
            handler.on_connect(&connection);
        }

        connection.start_receiving();
    }
}

/// Server builder
pub struct ServerBuilder {
    config: ServerConfig,
    handlers: Vec<SharedHandler>,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl ServerBuilder {
    /// Create a new server builder
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            handlers: Vec::new(),
        }
    }

    /// Set the location clients connect to, `ws://host[:port]`
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.config.location = location.into();
        self
    }

    /// Set the allowed origin
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.config.origin = origin.into();
        self
    }

    /// Bind to the given address instead of all interfaces on the
    /// location's port
    pub fn bind<A: std::net::ToSocketAddrs>(mut self, addr: A) -> Result<Self> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            Error::Config(ConfigError::Validation("Invalid bind address".to_string()))
        })?;
        self.config.bind_address = Some(addr);
        Ok(self)
    }

    /// Set the per-read buffer size
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the largest accepted handshake request
    pub fn max_handshake_size(mut self, size: usize) -> Self {
        self.config.max_handshake_size = size;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = Some(timeout);
        self
    }

    /// Mask frames sent to clients
    pub fn mask_outbound(mut self, enabled: bool) -> Self {
        self.config.mask_outbound = enabled;
        self
    }

    /// Set the default log filter
    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.config.log_filter = filter.into();
        self
    }

    /// Register a handler
    pub fn handler(mut self, handler: impl Handler) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Build the server
    pub fn build(self) -> Result<Server> {
        self.config.validate()?;

        let server = Server::new(self.config);
        for handler in self.handlers {
            server.add_shared_handler(handler);
        }
        Ok(server)
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
