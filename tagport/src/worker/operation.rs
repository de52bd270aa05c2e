//! Operations and their completion handles.
//!
//! An operation describes one submitted send or receive request. It is
//! owned by the worker's pending set from submission until completion or
//! cancellation; the caller suspends on the [`OpHandle`] until the
//! transport reports the operation done.

use tokio::sync::oneshot;

use crate::error::{TagError, TagResult};
use crate::worker::tags::Tag;
use crate::worker::ConnectionId;

/// Identifier of one in-flight operation within a worker.
pub(crate) type OpId = u64;

/// Completion payload delivered to a suspended caller.
#[derive(Debug)]
pub enum Completion {
    /// A send operation: the whole buffer was handed to the transport.
    Sent,
    /// A receive operation: the matched message payload.
    Received(Vec<u8>),
}

/// What an operation does, plus its direction-specific state.
#[derive(Debug)]
pub(crate) enum OpKind {
    /// Outbound message with its captured payload.
    Send {
        /// Payload captured at submission time.
        payload: Vec<u8>,
    },
    /// Inbound expectation for an exact-length message.
    Recv {
        /// Exact number of bytes the caller's buffer holds.
        expected_len: usize,
    },
}

/// One submitted send or receive request, tracked until completion or
/// cancellation.
#[derive(Debug)]
pub struct Operation {
    pub(crate) id: OpId,
    pub(crate) conn: ConnectionId,
    pub(crate) tag: Tag,
    pub(crate) kind: OpKind,
    pub(crate) done: oneshot::Sender<TagResult<Completion>>,
}

impl Operation {
    pub(crate) fn new(
        id: OpId,
        conn: ConnectionId,
        tag: Tag,
        kind: OpKind,
    ) -> (Self, OpHandle) {
        let (done, rx) = oneshot::channel();
        (
            Self {
                id,
                conn,
                tag,
                kind,
                done,
            },
            OpHandle { rx },
        )
    }

    /// Resolve the suspended caller with the given result.
    ///
    /// A dropped handle (caller gave up waiting) is not an error.
    pub(crate) fn complete(self, result: TagResult<Completion>) {
        let _ = self.done.send(result);
    }
}

/// Handle returned by `Worker::submit`; resolves once the transport
/// reports the operation done, cancelled, or failed.
#[derive(Debug)]
pub struct OpHandle {
    rx: oneshot::Receiver<TagResult<Completion>>,
}

impl OpHandle {
    /// Suspend until the operation completes.
    ///
    /// If the worker is torn down before dispatching a result, the
    /// operation reports [`TagError::Cancelled`].
    pub async fn wait(self) -> TagResult<Completion> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(TagError::Cancelled),
        }
    }
}

/// Events reported by the transport actors, drained by `progress()` in
/// arrival order so completion delivery is never reordered.
#[derive(Debug)]
pub(crate) enum TransportEvent {
    /// A complete inbound frame arrived on a connection.
    Delivered {
        /// Connection the frame arrived on.
        conn: ConnectionId,
        /// Tag carried by the frame.
        tag: Tag,
        /// Frame payload.
        payload: Vec<u8>,
    },
    /// The writer finished pushing an outbound frame to the socket.
    SendComplete {
        /// The operation whose frame was written.
        op: OpId,
    },
    /// A connection was closed by the peer or failed.
    ConnClosed {
        /// The closed connection.
        conn: ConnectionId,
        /// Failure detail, if the closure was not a clean EOF.
        message: Option<String>,
    },
    /// The transport reported a worker-fatal error.
    Fatal {
        /// Details about the fatal condition.
        message: String,
    },
}
