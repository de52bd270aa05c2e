//! # tagport
//!
//! An asynchronous tagged-message endpoint/worker progress engine.
//!
//! `tagport` provides the minimal subsystem needed to exchange tagged
//! messages between peers over a byte-stream transport:
//!
//! - A [`Context`] binds a provider bundle and creates Workers
//! - A [`Worker`] owns the pending-operation set, the tag table, and the
//!   transport event queue for all connections derived from it
//! - A progress driver schedules [`Worker::progress`] under one of two
//!   strategies: blocking on a wakeup primitive (zero CPU while idle) or
//!   busy-polling every scheduler iteration (lower latency)
//! - An [`Endpoint`] is one established bidirectional connection with a
//!   (send-tag, recv-tag) pair assigned at connection establishment
//! - A [`Listener`] accepts connections, performs the tag handshake, and
//!   runs a caller-supplied handler per connection as an independent task
//!
//! ## Concurrency model
//!
//! Single-threaded cooperative scheduling: all tasks are spawned with
//! `spawn_local`, shared state lives in `Rc<RefCell<_>>`, and the types
//! are `!Send` by construction. One progress loop drives all operations
//! of a given Worker; concurrent endpoints and listeners are multiplexed
//! onto it. Multi-threaded access to one Worker is unsupported.
//!
//! ## Progress strategies
//!
//! The strategy is an explicit configuration value
//! ([`ProgressMode`]) passed into [`WorkerConfig`]. Callers that want the
//! conventional environment toggle read it once at startup via
//! [`ProgressMode::from_env`] and pass the result explicitly.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Progress strategy and worker configuration.
pub mod config;
/// Process-wide context owning the provider bundle.
pub mod context;
/// Connected endpoint handles with tagged send/recv.
pub mod endpoint;
/// Error types for worker, endpoint, and listener operations.
pub mod error;
/// Listener accept loop and per-connection handler tasks.
pub mod listener;
/// Transport provider traits and the Tokio implementation.
pub mod net;
/// Provider bundle trait for simplified type parameters.
pub mod providers;
/// Task spawning abstraction for the single-threaded runtime.
pub mod task;
/// Wire framing for tagged messages and the connection handshake.
pub mod wire;
/// Worker progress engine: operations, tags, and the progress driver.
pub mod worker;

pub use config::{DEFAULT_MAX_FRAME_LEN, PROGRESS_MODE_ENV, ProgressMode, WorkerConfig};
pub use context::Context;
pub use endpoint::Endpoint;
pub use error::{TagError, TagResult};
pub use listener::Listener;
pub use net::{ListenerSocket, TokioTransport, TransportProvider};
pub use providers::{Providers, TokioProviders};
pub use task::{TaskProvider, TokioTaskProvider};
pub use worker::tags::{Tag, TagPair};
pub use worker::{Completion, OpHandle, Operation, Worker};
