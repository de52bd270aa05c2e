//! Transport seam between the progress engine and the byte-stream layer.
//!
//! The engine asks very little of a transport: ordered byte streams it
//! can split into reader/writer halves, and a bound socket that yields
//! accepted streams. [`TokioTransport`] is the production implementation
//! over TCP; a shared-memory or RDMA-style transport plugs in by
//! implementing the same two traits. None of the types are `Send` by
//! requirement, matching the engine's single-threaded model.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::instrument;

/// Factory for outbound connections and bound listeners.
///
/// Cheap handle: a worker clones it once per connection attempt.
#[async_trait(?Send)]
pub trait TransportProvider: Clone {
    /// Ordered byte stream carrying one connection.
    type Stream: AsyncRead + AsyncWrite + Unpin + 'static;
    /// Bound socket yielding accepted streams of the same type.
    type Listener: ListenerSocket<Stream = Self::Stream> + 'static;

    /// Bind a listener on `addr`.
    async fn bind(&self, addr: &str) -> io::Result<Self::Listener>;

    /// Open a connection to `addr`.
    async fn connect(&self, addr: &str) -> io::Result<Self::Stream>;
}

/// A bound socket the accept loop pulls inbound connections from.
#[async_trait(?Send)]
pub trait ListenerSocket {
    /// Ordered byte stream carrying one accepted connection.
    type Stream: AsyncRead + AsyncWrite + Unpin + 'static;

    /// Wait for the next inbound connection, returning the stream and
    /// the peer's address.
    async fn accept(&self) -> io::Result<(Self::Stream, String)>;

    /// The address this socket is bound to.
    fn local_addr(&self) -> io::Result<String>;
}

/// TCP transport over the Tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioTransport;

impl TokioTransport {
    /// New TCP transport handle.
    pub fn new() -> Self {
        Self
    }
}

impl Default for TokioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl TransportProvider for TokioTransport {
    type Stream = tokio::net::TcpStream;
    type Listener = TokioListenerSocket;

    #[instrument(skip(self))]
    async fn bind(&self, addr: &str) -> io::Result<Self::Listener> {
        let inner = tokio::net::TcpListener::bind(addr).await?;
        Ok(TokioListenerSocket { inner })
    }

    #[instrument(skip(self))]
    async fn connect(&self, addr: &str) -> io::Result<Self::Stream> {
        tokio::net::TcpStream::connect(addr).await
    }
}

/// Bound TCP socket backing [`TokioTransport`] listeners.
#[derive(Debug)]
pub struct TokioListenerSocket {
    inner: tokio::net::TcpListener,
}

#[async_trait(?Send)]
impl ListenerSocket for TokioListenerSocket {
    type Stream = tokio::net::TcpStream;

    #[instrument(skip(self))]
    async fn accept(&self) -> io::Result<(Self::Stream, String)> {
        let (stream, peer) = self.inner.accept().await?;
        Ok((stream, peer.to_string()))
    }

    fn local_addr(&self) -> io::Result<String> {
        Ok(self.inner.local_addr()?.to_string())
    }
}
