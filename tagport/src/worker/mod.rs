//! Worker progress engine.
//!
//! A worker owns the progress state for every endpoint and listener
//! created from it: the FIFO submission queue, the transport event queue,
//! the pending-receive tables, the tag allocator, and the wakeup
//! primitive the blocking progress driver suspends on.
//!
//! Per connection, two background actors move raw bytes: a reader that
//! parses inbound frames and a writer that pushes outbound frames to the
//! socket. The actors never complete operations themselves; they report
//! [`TransportEvent`]s which `progress()` drains in arrival order, so
//! completion delivery is never reordered by the engine.
//!
//! The worker is single-threaded by construction (`Rc`/`RefCell`, local
//! tasks). Sharing one worker across threads is unsupported.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::rc::{Rc, Weak};

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Notify, mpsc};

use crate::config::WorkerConfig;
use crate::error::{TagError, TagResult};
use crate::net::TransportProvider;
use crate::providers::Providers;
use crate::task::TaskProvider;
use crate::wire::{FRAME_HEADER_SIZE, FrameHeader, frame_checksum};

pub mod operation;
mod progress;
pub mod tags;

pub use operation::{Completion, OpHandle, Operation};

use operation::{OpId, OpKind, TransportEvent};
use tags::{Tag, TagAllocator, TagPair};

/// Identifier of one connection (and its endpoint) within a worker.
pub(crate) type ConnectionId = u64;

/// The byte-stream type produced by a provider bundle's transport.
pub(crate) type StreamOf<P> = <<P as Providers>::Transport as TransportProvider>::Stream;

/// One outbound frame handed to a connection writer, with the operation
/// to complete once the socket write finishes.
#[derive(Debug)]
pub(crate) struct WriteJob {
    pub(crate) op: OpId,
    pub(crate) frame: Vec<u8>,
}

/// Per-connection bookkeeping held by the worker.
pub(crate) struct ConnectionHandle {
    /// Channel feeding the connection's writer actor.
    pub(crate) write_tx: mpsc::UnboundedSender<WriteJob>,
    /// Peer address for logging.
    pub(crate) peer_addr: String,
}

/// Mutable worker state, only ever touched from the single cooperative
/// thread inside `submit()`, `progress()`, and close paths.
pub(crate) struct WorkerState {
    /// FIFO queue of submitted, not-yet-processed operations.
    submissions: VecDeque<Operation>,
    /// Transport events in arrival order.
    events: VecDeque<TransportEvent>,
    /// Send operations whose frames are with a writer actor.
    sends: HashMap<OpId, Operation>,
    /// Posted receives keyed by (connection, tag), FIFO per key.
    recvs: HashMap<(ConnectionId, Tag), VecDeque<Operation>>,
    /// Inbound frames that arrived before a matching receive was posted.
    unexpected: HashMap<(ConnectionId, Tag), VecDeque<Vec<u8>>>,
    /// Active connections.
    connections: HashMap<ConnectionId, ConnectionHandle>,
}

/// State shared between worker handles, the progress driver, and the
/// per-connection actors.
pub(crate) struct WorkerShared<P: Providers> {
    pub(crate) providers: P,
    pub(crate) config: WorkerConfig,
    pub(crate) state: RefCell<WorkerState>,
    pub(crate) tags: RefCell<TagAllocator>,
    /// Signaled whenever `progress()` would have useful work to do.
    pub(crate) wakeup: Rc<Notify>,
    /// Number of `progress()` invocations so far.
    progress_calls: Cell<u64>,
    /// Set when the transport reported a worker-fatal error.
    fatal: RefCell<Option<String>>,
    /// Set by `shutdown()`; the worker stays usable for cleanup only.
    closed: Cell<bool>,
    next_conn_id: Cell<ConnectionId>,
    next_op_id: Cell<OpId>,
}

impl<P: Providers> Drop for WorkerShared<P> {
    fn drop(&mut self) {
        // Wake a driver suspended in blocking mode so it can observe the
        // dead weak reference and exit.
        self.wakeup.notify_one();
    }
}

/// Handle to a worker progress engine.
///
/// Cheap to clone; all clones drive the same engine. Must be created and
/// used inside a `tokio::task::LocalSet` (the progress driver and the
/// connection actors are local tasks).
pub struct Worker<P: Providers> {
    pub(crate) shared: Rc<WorkerShared<P>>,
}

impl<P: Providers> Clone for Worker<P> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<P: Providers> Worker<P> {
    /// Create a worker and start its progress driver under the configured
    /// strategy.
    pub fn new(providers: P, config: WorkerConfig) -> Self {
        let tag_space = config.tag_space;
        let shared = Rc::new(WorkerShared {
            providers,
            config,
            state: RefCell::new(WorkerState {
                submissions: VecDeque::new(),
                events: VecDeque::new(),
                sends: HashMap::new(),
                recvs: HashMap::new(),
                unexpected: HashMap::new(),
                connections: HashMap::new(),
            }),
            tags: RefCell::new(TagAllocator::new(tag_space)),
            wakeup: Rc::new(Notify::new()),
            progress_calls: Cell::new(0),
            fatal: RefCell::new(None),
            closed: Cell::new(false),
            next_conn_id: Cell::new(0),
            next_op_id: Cell::new(0),
        });

        progress::start_driver(&shared);
        Self { shared }
    }

    /// Enqueue a submitted operation. Non-blocking; never touches the
    /// network itself. The [`OpHandle`] created with the operation
    /// resolves once the transport reports it done.
    ///
    /// # Errors
    ///
    /// Surfaces submission-level errors synchronously: the worker was
    /// shut down, a fatal transport error occurred, or the operation
    /// targets a closed connection.
    pub fn submit(&self, operation: Operation) -> TagResult<()> {
        self.shared.check_usable()?;
        if !self
            .shared
            .state
            .borrow()
            .connections
            .contains_key(&operation.conn)
        {
            return Err(TagError::ConnectionClosed);
        }

        tracing::trace!(
            op = operation.id,
            conn = operation.conn,
            tag = operation.tag,
            "operation submitted"
        );
        self.shared.state.borrow_mut().submissions.push_back(operation);
        self.shared.wakeup.notify_one();
        Ok(())
    }

    /// Drive the engine one step: process new submissions and dispatch
    /// transport events in arrival order.
    ///
    /// Safe to call repeatedly and cheap when there is nothing to do.
    /// Returns the number of completions dispatched. The progress driver
    /// calls this automatically; manual calls are also allowed.
    pub fn progress(&self) -> usize {
        self.shared.progress()
    }

    /// Number of `progress()` invocations so far (driver and manual).
    pub fn progress_calls(&self) -> u64 {
        self.shared.progress_calls.get()
    }

    /// The waitable wakeup primitive: it becomes ready only when
    /// `progress()` would have useful work to do.
    ///
    /// # Errors
    ///
    /// Reserved for transports without event-driven wakeup support; the
    /// built-in transports always succeed.
    pub fn wakeup_handle(&self) -> TagResult<Rc<Notify>> {
        Ok(self.shared.wakeup.clone())
    }

    /// Number of tag values currently held by open endpoints.
    pub fn active_tag_count(&self) -> usize {
        self.shared.tags.borrow().active_count()
    }

    /// This worker's configuration.
    pub fn config(&self) -> &WorkerConfig {
        &self.shared.config
    }

    /// Whether `shutdown()` was called.
    pub fn is_shutdown(&self) -> bool {
        self.shared.closed.get()
    }

    /// Stop the worker: cancel every pending operation, drop all
    /// connections, and stop the progress driver. Idempotent.
    ///
    /// Dropping the last worker handle (including those held by live
    /// endpoints and listeners) has the same effect.
    pub fn shutdown(&self) {
        if self.shared.closed.replace(true) {
            return;
        }
        tracing::info!("worker shutting down");

        let conns: Vec<ConnectionId> = self
            .shared
            .state
            .borrow()
            .connections
            .keys()
            .copied()
            .collect();
        for conn in conns {
            self.shared.fail_connection(conn, TagError::Cancelled);
        }
        self.shared.fail_all_pending(TagError::Cancelled);
        self.shared.wakeup.notify_one();
    }
}

// Crate-internal surface used by endpoint and listener modules.
impl<P: Providers> Worker<P> {
    pub(crate) fn allocate_tags(&self) -> TagResult<TagPair> {
        self.shared.tags.borrow_mut().allocate()
    }

    pub(crate) fn reserve_tags(&self, pair: TagPair) -> TagResult<()> {
        self.shared.tags.borrow_mut().reserve(pair)
    }

    pub(crate) fn release_tags(&self, pair: TagPair) {
        self.shared.tags.borrow_mut().release(pair);
    }

    pub(crate) fn new_operation(
        &self,
        conn: ConnectionId,
        tag: Tag,
        kind: OpKind,
    ) -> (Operation, OpHandle) {
        let id = self.shared.next_op_id.get();
        self.shared.next_op_id.set(id.wrapping_add(1));
        Operation::new(id, conn, tag, kind)
    }

    /// Synchronously cancel every in-flight operation on a connection and
    /// drop it. Unrelated operations on the worker are untouched.
    pub(crate) fn cancel_connection(&self, conn: ConnectionId) {
        self.shared.fail_connection(conn, TagError::Cancelled);
    }

    /// Adopt an established stream: store its handle and spawn the
    /// reader/writer actors.
    pub(crate) fn register_connection(
        &self,
        stream: StreamOf<P>,
        peer_addr: String,
    ) -> ConnectionId {
        let conn = self.shared.next_conn_id.get();
        self.shared.next_conn_id.set(conn + 1);

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        self.shared.state.borrow_mut().connections.insert(
            conn,
            ConnectionHandle {
                write_tx,
                peer_addr: peer_addr.clone(),
            },
        );

        let (read_half, write_half) = tokio::io::split(stream);
        let task = self.shared.providers.task().clone();
        task.spawn_task(
            &format!("conn_{}_reader", conn),
            connection_reader::<P>(Rc::downgrade(&self.shared), conn, read_half),
        );
        task.spawn_task(
            &format!("conn_{}_writer", conn),
            connection_writer::<P>(Rc::downgrade(&self.shared), conn, write_half, write_rx),
        );

        tracing::debug!(conn, peer = %peer_addr, "connection registered");
        conn
    }
}

impl<P: Providers> WorkerShared<P> {
    /// Reject new work after shutdown or a fatal transport error.
    pub(crate) fn check_usable(&self) -> TagResult<()> {
        if let Some(message) = self.fatal.borrow().as_ref() {
            return Err(TagError::TransportError {
                message: message.clone(),
            });
        }
        if self.closed.get() {
            return Err(TagError::Cancelled);
        }
        Ok(())
    }

    /// Queue a transport event and wake the progress driver.
    pub(crate) fn push_event(&self, event: TransportEvent) {
        self.state.borrow_mut().events.push_back(event);
        self.wakeup.notify_one();
    }

    /// One progress step: drain submissions, then dispatch events in
    /// arrival order. Returns the number of completions dispatched.
    pub(crate) fn progress(&self) -> usize {
        self.progress_calls.set(self.progress_calls.get() + 1);
        let mut dispatched = 0;

        loop {
            let next = self.state.borrow_mut().submissions.pop_front();
            let Some(op) = next else { break };
            dispatched += self.process_submission(op);
        }

        loop {
            let next = self.state.borrow_mut().events.pop_front();
            let Some(event) = next else { break };
            dispatched += self.process_event(event);
        }

        dispatched
    }

    fn process_submission(&self, mut op: Operation) -> usize {
        match &mut op.kind {
            OpKind::Send { payload } => {
                let data = std::mem::take(payload);
                let write_tx = self
                    .state
                    .borrow()
                    .connections
                    .get(&op.conn)
                    .map(|handle| handle.write_tx.clone());

                let Some(write_tx) = write_tx else {
                    op.complete(Err(TagError::ConnectionClosed));
                    return 1;
                };

                let frame = crate::wire::encode_frame(op.tag, &data);
                let job = WriteJob { op: op.id, frame };
                if write_tx.send(job).is_err() {
                    op.complete(Err(TagError::ConnectionClosed));
                    return 1;
                }
                self.state.borrow_mut().sends.insert(op.id, op);
                0
            }
            OpKind::Recv { expected_len } => {
                let expected_len = *expected_len;
                let buffered = self
                    .state
                    .borrow_mut()
                    .unexpected
                    .get_mut(&(op.conn, op.tag))
                    .and_then(|queue| queue.pop_front());

                match buffered {
                    Some(payload) => {
                        op.complete(match_recv(payload, expected_len));
                        1
                    }
                    None => {
                        self.state
                            .borrow_mut()
                            .recvs
                            .entry((op.conn, op.tag))
                            .or_default()
                            .push_back(op);
                        0
                    }
                }
            }
        }
    }

    fn process_event(&self, event: TransportEvent) -> usize {
        match event {
            TransportEvent::Delivered { conn, tag, payload } => {
                let op = self
                    .state
                    .borrow_mut()
                    .recvs
                    .get_mut(&(conn, tag))
                    .and_then(|queue| queue.pop_front());

                match op {
                    Some(op) => {
                        let expected_len = match &op.kind {
                            OpKind::Recv { expected_len } => *expected_len,
                            OpKind::Send { .. } => 0,
                        };
                        op.complete(match_recv(payload, expected_len));
                        1
                    }
                    None => {
                        self.state
                            .borrow_mut()
                            .unexpected
                            .entry((conn, tag))
                            .or_default()
                            .push_back(payload);
                        0
                    }
                }
            }
            TransportEvent::SendComplete { op } => {
                let op = self.state.borrow_mut().sends.remove(&op);
                match op {
                    Some(op) => {
                        op.complete(Ok(Completion::Sent));
                        1
                    }
                    // Already cancelled or failed; the writer's report is stale.
                    None => 0,
                }
            }
            TransportEvent::ConnClosed { conn, message } => {
                if let Some(message) = &message {
                    tracing::warn!(conn, %message, "connection failed");
                } else {
                    tracing::debug!(conn, "connection closed by peer");
                }
                self.fail_connection(conn, TagError::ConnectionClosed)
            }
            TransportEvent::Fatal { message } => {
                tracing::error!(%message, "transport reported fatal error");
                *self.fatal.borrow_mut() = Some(message.clone());
                let mut dispatched = 0;
                let conns: Vec<ConnectionId> = self
                    .state
                    .borrow()
                    .connections
                    .keys()
                    .copied()
                    .collect();
                for conn in conns {
                    dispatched +=
                        self.fail_connection(conn, TagError::transport(message.clone()));
                }
                dispatched + self.fail_all_pending(TagError::transport(message))
            }
        }
    }

    /// Complete every in-flight operation on one connection with `error`
    /// and drop the connection. Synchronously visible to suspended
    /// callers. Operations on other connections are untouched.
    pub(crate) fn fail_connection(&self, conn: ConnectionId, error: TagError) -> usize {
        let mut doomed: Vec<Operation> = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            let removed = state.connections.remove(&conn);
            if removed.is_none()
                && !state.submissions.iter().any(|op| op.conn == conn)
                && !state.sends.values().any(|op| op.conn == conn)
                && !state.recvs.keys().any(|(c, _)| *c == conn)
            {
                return 0;
            }
            if let Some(handle) = &removed {
                tracing::debug!(conn, peer = %handle.peer_addr, "connection dropped");
            }

            let mut kept = VecDeque::new();
            while let Some(op) = state.submissions.pop_front() {
                if op.conn == conn {
                    doomed.push(op);
                } else {
                    kept.push_back(op);
                }
            }
            state.submissions = kept;

            let send_ids: Vec<OpId> = state
                .sends
                .iter()
                .filter(|(_, op)| op.conn == conn)
                .map(|(id, _)| *id)
                .collect();
            for id in send_ids {
                if let Some(op) = state.sends.remove(&id) {
                    doomed.push(op);
                }
            }

            let recv_keys: Vec<(ConnectionId, Tag)> = state
                .recvs
                .keys()
                .filter(|(c, _)| *c == conn)
                .copied()
                .collect();
            for key in recv_keys {
                if let Some(queue) = state.recvs.remove(&key) {
                    doomed.extend(queue);
                }
            }

            state.unexpected.retain(|(c, _), _| *c != conn);
        }

        let dispatched = doomed.len();
        for op in doomed {
            op.complete(Err(error.clone()));
        }
        dispatched
    }

    /// Complete everything still pending on any connection with `error`.
    /// Used by shutdown and the worker-fatal path.
    fn fail_all_pending(&self, error: TagError) -> usize {
        let mut doomed: Vec<Operation> = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            doomed.extend(state.submissions.drain(..));
            doomed.extend(state.sends.drain().map(|(_, op)| op));
            for (_, queue) in state.recvs.drain() {
                doomed.extend(queue);
            }
            state.unexpected.clear();
            state.connections.clear();
        }

        let dispatched = doomed.len();
        for op in doomed {
            op.complete(Err(error.clone()));
        }
        dispatched
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

/// Validate a matched message against the posted buffer length.
///
/// A receive either fully fills the requested length or fails; a size
/// mismatch never surfaces as a truncated success.
fn match_recv(payload: Vec<u8>, expected_len: usize) -> TagResult<Completion> {
    if payload.len() != expected_len {
        return Err(TagError::TransportError {
            message: format!(
                "message of {} bytes does not match posted buffer of {} bytes",
                payload.len(),
                expected_len
            ),
        });
    }
    Ok(Completion::Received(payload))
}

/// Queue an event on the worker if it is still alive.
///
/// Returns false when the worker is gone and the actor should exit.
fn report<P: Providers>(shared: &Weak<WorkerShared<P>>, event: TransportEvent) -> bool {
    match shared.upgrade() {
        Some(shared) => {
            shared.push_event(event);
            true
        }
        None => false,
    }
}

/// Reader actor: parses inbound frames and reports them as events.
async fn connection_reader<P: Providers>(
    shared: Weak<WorkerShared<P>>,
    conn: ConnectionId,
    mut reader: ReadHalf<StreamOf<P>>,
) {
    let mut header_buf = [0u8; FRAME_HEADER_SIZE];

    loop {
        if let Err(error) = reader.read_exact(&mut header_buf).await {
            let message =
                (error.kind() != io::ErrorKind::UnexpectedEof).then(|| error.to_string());
            report(&shared, TransportEvent::ConnClosed { conn, message });
            return;
        }

        let header = match FrameHeader::deserialize(&header_buf) {
            Ok(header) => header,
            Err(error) => {
                report(
                    &shared,
                    TransportEvent::ConnClosed {
                        conn,
                        message: Some(error.to_string()),
                    },
                );
                return;
            }
        };

        // Validate the announced length before allocating for it; the
        // header is peer-controlled.
        let limit = match shared.upgrade() {
            Some(shared) => shared.config.max_frame_len,
            None => return,
        };
        if header.length > limit {
            report(
                &shared,
                TransportEvent::ConnClosed {
                    conn,
                    message: Some(format!(
                        "frame length {} exceeds the {limit}-byte limit",
                        header.length
                    )),
                },
            );
            return;
        }

        let mut payload = vec![0u8; header.payload_len()];
        if let Err(error) = reader.read_exact(&mut payload).await {
            report(
                &shared,
                TransportEvent::ConnClosed {
                    conn,
                    message: Some(error.to_string()),
                },
            );
            return;
        }

        let computed = frame_checksum(header.tag, &payload);
        if computed != header.checksum {
            report(
                &shared,
                TransportEvent::ConnClosed {
                    conn,
                    message: Some(format!(
                        "checksum mismatch on tag {}: expected {:#010x}, got {:#010x}",
                        header.tag, header.checksum, computed
                    )),
                },
            );
            return;
        }

        tracing::trace!(conn, tag = header.tag, bytes = payload.len(), "frame received");
        if !report(
            &shared,
            TransportEvent::Delivered {
                conn,
                tag: header.tag,
                payload,
            },
        ) {
            return;
        }
    }
}

/// Writer actor: pushes outbound frames to the socket and reports each
/// completed write.
async fn connection_writer<P: Providers>(
    shared: Weak<WorkerShared<P>>,
    conn: ConnectionId,
    mut writer: WriteHalf<StreamOf<P>>,
    mut jobs: mpsc::UnboundedReceiver<WriteJob>,
) {
    while let Some(job) = jobs.recv().await {
        if let Err(error) = writer.write_all(&job.frame).await {
            report(
                &shared,
                TransportEvent::ConnClosed {
                    conn,
                    message: Some(error.to_string()),
                },
            );
            return;
        }
        tracing::trace!(conn, bytes = job.frame.len(), "frame written");
        if !report(&shared, TransportEvent::SendComplete { op: job.op }) {
            return;
        }
    }

    // Job channel closed: the connection was dropped locally.
    let _ = writer.shutdown().await;
}
