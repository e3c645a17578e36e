//! The byte-stream seam between the connection engine and the network.
//!
//! The engine only needs an ordered reliable duplex stream; deadlines are
//! applied per operation by the workers (`tokio::time::timeout`) and graceful
//! shutdown is the write half's `close()`. TLS or any other wrapping layer
//! plugs in here by yielding a different [`Transport`] implementation.

use futures::future::BoxFuture;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Any ordered reliable duplex byte stream.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Transport for T {}

/// The stream type the connection engine drives.
pub type BoxedTransport = Box<dyn Transport>;

/// Opens a fresh transport for the session manager, both for the initial
/// link and for every reconnect attempt.
pub trait Connector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, io::Result<BoxedTransport>>;
}

/// Reconnects by dialing a TCP address. [`Conn::dial`](crate::Conn::dial)
/// installs one automatically.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> BoxFuture<'_, io::Result<BoxedTransport>> {
        Box::pin(async move {
            let stream = TcpStream::connect(&self.addr).await?;
            Ok(Box::new(stream) as BoxedTransport)
        })
    }
}
