//! Endpoints: bidirectional tagged-message channels.
//!
//! An endpoint wraps one established connection plus the tag pair
//! assigned at establishment. Sends stamp the endpoint's send tag (or an
//! explicit tag); receives post an exact-length expectation under the
//! endpoint's recv tag (or an explicit tag) and complete only when a
//! matching message arrives in full.

use std::cell::Cell;
use std::rc::Rc;

use tokio::io::AsyncReadExt;

use crate::error::{TagError, TagResult};
use crate::net::TransportProvider;
use crate::providers::Providers;
use crate::wire::{FRAME_HEADER_SIZE, HANDSHAKE_SIZE, Handshake};
use crate::worker::operation::OpKind;
use crate::worker::tags::{Tag, TagPair};
use crate::worker::{Completion, ConnectionId, Worker};

struct EndpointInner<P: Providers> {
    worker: Worker<P>,
    conn: ConnectionId,
    tags: TagPair,
    peer_addr: String,
    closed: Cell<bool>,
}

impl<P: Providers> EndpointInner<P> {
    /// Cancel in-flight operations, drop the connection, and return the
    /// tag pair. Idempotent; also runs on drop of the last handle.
    fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        tracing::debug!(conn = self.conn, peer = %self.peer_addr, "endpoint closing");
        self.worker.cancel_connection(self.conn);
        self.worker.release_tags(self.tags);
    }
}

impl<P: Providers> Drop for EndpointInner<P> {
    fn drop(&mut self) {
        self.close();
    }
}

/// One side of an established connection.
///
/// Cheap to clone; all clones share the connection and close together.
/// Closing is synchronous: once `close()` returns, every in-flight
/// operation on this endpoint has completed with
/// [`TagError::Cancelled`] and the tag pair is released.
pub struct Endpoint<P: Providers> {
    inner: Rc<EndpointInner<P>>,
}

impl<P: Providers> Clone for Endpoint<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Providers> Endpoint<P> {
    pub(crate) fn new(
        worker: Worker<P>,
        conn: ConnectionId,
        tags: TagPair,
        peer_addr: String,
    ) -> Self {
        Self {
            inner: Rc::new(EndpointInner {
                worker,
                conn,
                tags,
                peer_addr,
                closed: Cell::new(false),
            }),
        }
    }

    /// Send the whole buffer as one message under the endpoint's send tag.
    ///
    /// Suspends only the calling task; resolves once the transport has
    /// accepted the full message.
    ///
    /// # Errors
    ///
    /// [`TagError::ConnectionClosed`] if the connection is gone,
    /// [`TagError::Cancelled`] if the endpoint closes mid-flight.
    pub async fn send(&self, data: &[u8]) -> TagResult<()> {
        self.send_tagged(data, self.inner.tags.send).await
    }

    /// Send the whole buffer as one message under an explicit tag.
    pub async fn send_tagged(&self, data: &[u8], tag: Tag) -> TagResult<()> {
        if self.inner.closed.get() {
            return Err(TagError::ConnectionClosed);
        }
        let limit = self.inner.worker.config().max_frame_len;
        let frame_len = (data.len() as u64).saturating_add(FRAME_HEADER_SIZE as u64);
        if frame_len > limit {
            return Err(TagError::InvalidArgument {
                message: format!(
                    "{}-byte message exceeds the {limit}-byte frame limit",
                    data.len()
                ),
            });
        }
        let (op, handle) = self.inner.worker.new_operation(
            self.inner.conn,
            tag,
            OpKind::Send {
                payload: data.to_vec(),
            },
        );
        self.inner.worker.submit(op)?;
        match handle.wait().await? {
            Completion::Sent => Ok(()),
            Completion::Received(_) => Err(TagError::transport("completion kind mismatch")),
        }
    }

    /// Receive exactly `buf.len()` bytes under the endpoint's recv tag.
    ///
    /// Completes only when a message of exactly that length arrives with
    /// a matching tag; a size mismatch fails the operation rather than
    /// truncating or partially filling.
    pub async fn recv(&self, buf: &mut [u8]) -> TagResult<()> {
        self.recv_tagged(buf, self.inner.tags.recv).await
    }

    /// Receive exactly `buf.len()` bytes under an explicit tag.
    pub async fn recv_tagged(&self, buf: &mut [u8], tag: Tag) -> TagResult<()> {
        if self.inner.closed.get() {
            return Err(TagError::ConnectionClosed);
        }
        let (op, handle) = self.inner.worker.new_operation(
            self.inner.conn,
            tag,
            OpKind::Recv {
                expected_len: buf.len(),
            },
        );
        self.inner.worker.submit(op)?;
        match handle.wait().await? {
            Completion::Received(payload) => {
                buf.copy_from_slice(&payload);
                Ok(())
            }
            Completion::Sent => Err(TagError::transport("completion kind mismatch")),
        }
    }

    /// Close the endpoint. In-flight operations complete with
    /// [`TagError::Cancelled`] before this returns; the tag pair returns
    /// to the worker's pool. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Whether `close()` has run (explicitly or via connection failure
    /// observed by a later call).
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// The tag pair assigned at establishment.
    pub fn tag_pair(&self) -> TagPair {
        self.inner.tags
    }

    /// Address of the remote side.
    pub fn peer_addr(&self) -> &str {
        &self.inner.peer_addr
    }

    /// The worker this endpoint submits to.
    pub fn worker(&self) -> &Worker<P> {
        &self.inner.worker
    }
}

impl<P: Providers> Worker<P> {
    /// Connect to a listener at `addr` ("host:port") and establish an
    /// endpoint.
    ///
    /// The listener side assigns the tag pair; it arrives in the
    /// connection handshake and is reserved in this worker's allocator so
    /// tag disjointness holds across outbound and accepted endpoints.
    ///
    /// # Errors
    ///
    /// [`TagError::TransportError`] if the connection or handshake fails,
    /// [`TagError::Exhausted`] if the assigned pair collides with tags
    /// already held locally.
    pub async fn create_endpoint(&self, addr: &str) -> TagResult<Endpoint<P>> {
        self.shared.check_usable()?;

        let mut stream = self
            .shared
            .providers
            .transport()
            .connect(addr)
            .await
            .map_err(|error| TagError::transport(format!("connect {addr}: {error}")))?;

        let mut buf = [0u8; HANDSHAKE_SIZE];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(|error| TagError::transport(format!("handshake from {addr}: {error}")))?;
        let handshake = Handshake::deserialize(&buf).map_err(TagError::transport)?;

        self.reserve_tags(handshake.tags)?;
        let conn = self.register_connection(stream, addr.to_string());
        tracing::info!(
            conn,
            peer = addr,
            send_tag = handshake.tags.send,
            recv_tag = handshake.tags.recv,
            "endpoint established"
        );
        Ok(Endpoint::new(
            self.clone(),
            conn,
            handshake.tags,
            addr.to_string(),
        ))
    }
}
