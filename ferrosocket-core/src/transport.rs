//! Transport layer abstraction
//!
//! The handshake engine and the reassembler only see these traits, so any
//! byte stream can carry a connection. A stream is used whole for the opening
//! handshake and then split so reads and writes can proceed independently.

use crate::error::Result;
use std::net::SocketAddr;

/// Listener producing connected streams
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The stream type produced by this transport
    type Stream: TransportStream;

    /// Accept an incoming connection
    async fn accept(&self) -> Result<Self::Stream>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Close the transport
    async fn close(self) -> Result<()>;
}

/// Read side of a stream
#[async_trait::async_trait]
pub trait TransportRead: Send {
    /// Read up to `buf.len()` bytes. `Ok(0)` means the peer closed.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Write side of a stream
#[async_trait::async_trait]
pub trait TransportWrite: Send {
    /// Write data to the stream
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Write all data to the stream
    async fn write_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Flush the stream
    async fn flush(&mut self) -> Result<()>;

    /// Shut the stream down
    async fn close(&mut self) -> Result<()>;
}

/// A connected, bidirectional stream
pub trait TransportStream: TransportRead + TransportWrite + 'static {
    /// Owned read half
    type ReadHalf: TransportRead + 'static;

    /// Owned write half
    type WriteHalf: TransportWrite + 'static;

    /// Split into independently owned halves
    fn into_split(self) -> (Self::ReadHalf, Self::WriteHalf)
    where
        Self: Sized;

    /// Get the remote address
    fn remote_addr(&self) -> Result<SocketAddr>;

    /// Get the local address
    fn local_addr(&self) -> Result<SocketAddr>;
}

#[cfg(feature = "tokio-runtime")]
pub use self::io::IoStream;

/// Adapter for any tokio byte stream
#[cfg(feature = "tokio-runtime")]
mod io {
    use super::*;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

    /// Wraps an `AsyncRead + AsyncWrite` so it can be driven as a
    /// [`TransportStream`]. Useful for in-memory pipes and for streams that
    /// already went through some other upgrade.
    #[derive(Debug)]
    pub struct IoStream<S> {
        inner: S,
        remote_addr: SocketAddr,
        local_addr: SocketAddr,
    }

    impl<S> IoStream<S> {
        /// Wrap a stream that has no meaningful socket addresses
        pub fn new(inner: S) -> Self {
            let unspecified = SocketAddr::from(([0, 0, 0, 0], 0));
            Self::with_addrs(inner, unspecified, unspecified)
        }

        /// Wrap a stream and record its endpoints
        pub fn with_addrs(inner: S, remote_addr: SocketAddr, local_addr: SocketAddr) -> Self {
            Self {
                inner,
                remote_addr,
                local_addr,
            }
        }

        /// Unwrap the underlying stream
        pub fn into_inner(self) -> S {
            self.inner
        }
    }

    #[async_trait::async_trait]
    impl<S> TransportRead for IoStream<S>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            Ok(AsyncReadExt::read(&mut self.inner, buf).await?)
        }
    }

    #[async_trait::async_trait]
    impl<S> TransportWrite for IoStream<S>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        async fn write(&mut self, buf: &[u8]) -> Result<usize> {
            Ok(AsyncWriteExt::write(&mut self.inner, buf).await?)
        }

        async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
            Ok(AsyncWriteExt::write_all(&mut self.inner, buf).await?)
        }

        async fn flush(&mut self) -> Result<()> {
            Ok(AsyncWriteExt::flush(&mut self.inner).await?)
        }

        async fn close(&mut self) -> Result<()> {
            Ok(AsyncWriteExt::shutdown(&mut self.inner).await?)
        }
    }

    impl<S> TransportStream for IoStream<S>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        type ReadHalf = ReadHalf<S>;
        type WriteHalf = WriteHalf<S>;

        fn into_split(self) -> (Self::ReadHalf, Self::WriteHalf) {
            tokio::io::split(self.inner)
        }

        fn remote_addr(&self) -> Result<SocketAddr> {
            Ok(self.remote_addr)
        }

        fn local_addr(&self) -> Result<SocketAddr> {
            Ok(self.local_addr)
        }
    }

    #[async_trait::async_trait]
    impl<S> TransportRead for ReadHalf<S>
    where
        S: AsyncRead + Send + 'static,
    {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
            Ok(AsyncReadExt::read(self, buf).await?)
        }
    }

    #[async_trait::async_trait]
    impl<S> TransportWrite for WriteHalf<S>
    where
        S: AsyncWrite + Send + 'static,
    {
        async fn write(&mut self, buf: &[u8]) -> Result<usize> {
            Ok(AsyncWriteExt::write(self, buf).await?)
        }

        async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
            Ok(AsyncWriteExt::write_all(self, buf).await?)
        }

        async fn flush(&mut self) -> Result<()> {
            Ok(AsyncWriteExt::flush(self).await?)
        }

        async fn close(&mut self) -> Result<()> {
            Ok(AsyncWriteExt::shutdown(self).await?)
        }
    }
}

#[cfg(all(test, feature = "tokio-runtime"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_io_stream_round_trip() {
        let (client, server) = tokio::io::duplex(64);
        let mut client = IoStream::new(client);
        let mut server = IoStream::new(server);

        client.write_all(b"hello").await.unwrap();
        client.flush().await.unwrap();

        let mut buf = [0u8; 16];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn test_split_halves_and_close() {
        let (client, server) = tokio::io::duplex(64);
        let remote: SocketAddr = "127.0.0.1:12345".parse().unwrap();
        let local: SocketAddr = "127.0.0.1:8181".parse().unwrap();
        let server = IoStream::with_addrs(server, remote, local);
        assert_eq!(server.remote_addr().unwrap(), remote);
        assert_eq!(server.local_addr().unwrap(), local);

        let (mut reader, mut writer) = server.into_split();
        let mut client = IoStream::new(client);

        writer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 16];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        client.write_all(b"pong").await.unwrap();
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");

        writer.close().await.unwrap();
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }
}
