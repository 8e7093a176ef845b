//! TCP transport implementation for ferrosocket

use async_trait::async_trait;
use ferrosocket_core::{
    transport::{Transport, TransportRead, TransportStream, TransportWrite},
    Error, Result,
};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream as TokioTcpStream};

/// TCP listener
#[derive(Debug)]
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpTransport {
    /// Bind a listener to the given address
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Stream = TcpStream;

    async fn accept(&self) -> Result<Self::Stream> {
        let (stream, _addr) = self.listener.accept().await?;
        TcpStream::from_tokio(stream)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }

    async fn close(self) -> Result<()> {
        // the socket is released when the listener drops
        drop(self.listener);
        Ok(())
    }
}

/// Connected TCP stream
#[derive(Debug)]
pub struct TcpStream {
    stream: TokioTcpStream,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    closed: bool,
}

impl TcpStream {
    /// Wrap a connected tokio TCP stream
    pub fn from_tokio(stream: TokioTcpStream) -> Result<Self> {
        let remote_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;

        Ok(Self {
            stream,
            remote_addr,
            local_addr,
            closed: false,
        })
    }

    /// Connect to a remote address
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TokioTcpStream::connect(addr).await?;
        Self::from_tokio(stream)
    }
}

#[async_trait]
impl TransportRead for TcpStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.stream.read(buf).await?)
    }
}

#[async_trait]
impl TransportWrite for TcpStream {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::TransportClosed);
        }
        Ok(self.stream.write(buf).await?)
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::TransportClosed);
        }
        Ok(self.stream.write_all(buf).await?)
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(self.stream.flush().await?)
    }

    async fn close(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        Ok(self.stream.shutdown().await?)
    }
}

impl TransportStream for TcpStream {
    type ReadHalf = TcpReadHalf;
    type WriteHalf = TcpWriteHalf;

    fn into_split(self) -> (Self::ReadHalf, Self::WriteHalf) {
        let (read, write) = self.stream.into_split();
        (
            TcpReadHalf { inner: read },
            TcpWriteHalf {
                inner: write,
                closed: self.closed,
            },
        )
    }

    fn remote_addr(&self) -> Result<SocketAddr> {
        Ok(self.remote_addr)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local_addr)
    }
}

/// Read half of a split [`TcpStream`]
#[derive(Debug)]
pub struct TcpReadHalf {
    inner: OwnedReadHalf,
}

#[async_trait]
impl TransportRead for TcpReadHalf {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.inner.read(buf).await?)
    }
}

/// Write half of a split [`TcpStream`]
#[derive(Debug)]
pub struct TcpWriteHalf {
    inner: OwnedWriteHalf,
    closed: bool,
}

#[async_trait]
impl TransportWrite for TcpWriteHalf {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.closed {
            return Err(Error::TransportClosed);
        }
        Ok(self.inner.write(buf).await?)
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::TransportClosed);
        }
        Ok(self.inner.write_all(buf).await?)
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(self.inner.flush().await?)
    }

    async fn close(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        Ok(self.inner.shutdown().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let transport = TcpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = transport.local_addr().unwrap();

        let (client, server) = tokio::join!(TcpStream::connect(addr), transport.accept());
        (client.unwrap(), server.unwrap())
    }

    #[tokio::test]
    async fn test_bind_reports_ephemeral_port() {
        let transport = TcpTransport::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        assert_ne!(transport.local_addr().unwrap().port(), 0);
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_accept_and_exchange() {
        let (mut client, mut server) = connected_pair().await;
        assert_eq!(server.remote_addr().unwrap(), client.local_addr().unwrap());

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn test_split_halves() {
        let (mut client, server) = connected_pair().await;
        let (mut reader, mut writer) = server.into_split();

        writer.write_all(b"from server").await.unwrap();
        let mut buf = [0u8; 32];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"from server");

        client.write_all(b"from client").await.unwrap();
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"from client");
    }

    #[tokio::test]
    async fn test_close_signals_eof_and_rejects_writes() {
        let (mut client, server) = connected_pair().await;
        let (_reader, mut writer) = server.into_split();

        writer.close().await.unwrap();
        writer.close().await.unwrap();
        assert!(matches!(
            writer.write_all(b"late").await,
            Err(Error::TransportClosed)
        ));

        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }
}
