//! Transport layer for DM connections
//!
//! A session talks to the server over a [`DmStream`]: plain TCP until the
//! capability exchange asks for SSL, TLS afterwards. Servers that encrypt
//! frames themselves only keep TLS for the login exchange.

pub mod tls;

pub use tls::{connect_tls, connect_tls_as, TlsConfig};

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;

use crate::error::{Error, Result};

/// Byte stream to the server
pub enum DmStream {
    /// Plain TCP connection
    Plain(TcpStream),
    /// TLS-encrypted connection
    Tls(Box<TlsStream<TcpStream>>),
}

impl std::fmt::Debug for DmStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DmStream::Plain(_) => f.write_str("DmStream::Plain"),
            DmStream::Tls(_) => f.write_str("DmStream::Tls"),
        }
    }
}

impl DmStream {
    /// Dial `host:port` with a connect timeout
    pub async fn connect(host: &str, port: u16, connect_timeout: Duration) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::ConnectionTimeout(connect_timeout))?
            .map_err(|e| Error::communication(format!("connect {addr}: {e}")))?;
        stream.set_nodelay(true)?;
        tracing::debug!(addr = %addr, "tcp connected");
        Ok(DmStream::Plain(stream))
    }

    /// Check if the stream is TLS-wrapped
    pub fn is_tls(&self) -> bool {
        matches!(self, DmStream::Tls(_))
    }

    /// Wrap a plain stream in TLS; a TLS stream is returned unchanged
    pub async fn upgrade(self, server_name: &str, user: &str, config: &TlsConfig) -> Result<Self> {
        match self {
            DmStream::Plain(tcp) => Ok(DmStream::Tls(Box::new(
                connect_tls_as(tcp, server_name, user, config).await?,
            ))),
            tls @ DmStream::Tls(_) => Ok(tls),
        }
    }

    /// Unwrap TLS and continue on the raw socket; a plain stream is returned unchanged
    pub fn downgrade(self) -> Self {
        match self {
            DmStream::Tls(stream) => {
                let (tcp, _) = (*stream).into_inner();
                DmStream::Plain(tcp)
            }
            plain @ DmStream::Plain(_) => plain,
        }
    }

    /// Read exactly `buf.len()` bytes
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            DmStream::Plain(stream) => {
                AsyncReadExt::read_exact(stream, buf).await?;
            }
            DmStream::Tls(stream) => {
                AsyncReadExt::read_exact(stream.as_mut(), buf).await?;
            }
        }
        Ok(())
    }

    /// Write all of `buf`
    pub async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            DmStream::Plain(stream) => stream.write_all(buf).await,
            DmStream::Tls(stream) => stream.write_all(buf).await,
        }
    }

    /// Flush buffered output
    pub async fn flush(&mut self) -> std::io::Result<()> {
        match self {
            DmStream::Plain(stream) => stream.flush().await,
            DmStream::Tls(stream) => stream.flush().await,
        }
    }

    /// Shut down the write half
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            DmStream::Plain(stream) => stream.shutdown().await,
            DmStream::Tls(stream) => stream.shutdown().await,
        }
    }
}
