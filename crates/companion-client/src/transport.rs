//! Byte-stream transport abstraction.
//!
//! Companion runs plaintext on the wire; all encryption is applied above
//! this layer by the session once pair-verify completes.

use companion_core::error::{Error, Result, SessionError};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Read half of a transport.
#[async_trait]
pub trait TransportReader: Send {
    /// Receive the next chunk of bytes. A peer close surfaces as
    /// `SessionError::TransportClosed`.
    async fn recv(&mut self) -> Result<Vec<u8>>;
}

/// Write half of a transport.
#[async_trait]
pub trait TransportWriter: Send {
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

/// A connected byte-stream transport, split into halves for the reader task
/// and the request path.
pub trait Transport: Send {
    fn into_split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>);
}

/// Dials a transport; the session uses this for the initial connection and
/// the single reconnect attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>>;
}

/// TCP transport over tokio.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect with a timeout.
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout)??;
        stream.set_nodelay(true)?;
        debug!("Connected to {}", addr);
        Ok(Self { stream })
    }
}

impl Transport for TcpTransport {
    fn into_split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        let (read, write) = self.stream.into_split();
        (Box::new(TcpReader { read }), Box::new(TcpWriter { write }))
    }
}

struct TcpReader {
    read: OwnedReadHalf,
}

#[async_trait]
impl TransportReader for TcpReader {
    async fn recv(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; 8 * 1024];
        let n = self.read.read(&mut buf).await?;
        if n == 0 {
            return Err(SessionError::TransportClosed.into());
        }
        buf.truncate(n);
        Ok(buf)
    }
}

struct TcpWriter {
    write: OwnedWriteHalf,
}

#[async_trait]
impl TransportWriter for TcpWriter {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.write.write_all(bytes).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.write.shutdown().await?;
        Ok(())
    }
}

/// Connector for a fixed TCP endpoint.
pub struct TcpConnector {
    addr: SocketAddr,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let transport = TcpTransport::connect(self.addr, self.timeout).await?;
        Ok(Box::new(transport))
    }
}
