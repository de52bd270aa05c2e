//! Provider bundle trait for simplified type parameters.
//!
//! Without bundling, code must carry a type parameter per provider:
//!
//! ```text
//! struct MyStruct<N, TP>
//! where
//!     N: TransportProvider + Clone + 'static,
//!     TP: TaskProvider + Clone + 'static,
//! ```
//!
//! With bundling, this simplifies to `struct MyStruct<P: Providers>`.

use crate::net::{TokioTransport, TransportProvider};
use crate::task::{TaskProvider, TokioTaskProvider};

/// Bundle of the provider types a worker needs.
///
/// Associated types preserve type information at compile time without
/// runtime dispatch; accessor methods give convenient access to the
/// individual providers.
pub trait Providers: Clone + 'static {
    /// Transport provider type for connections and listeners.
    type Transport: TransportProvider + Clone + 'static;

    /// Task provider type for spawning local tasks.
    type Task: TaskProvider + Clone + 'static;

    /// Get the transport provider instance.
    fn transport(&self) -> &Self::Transport;

    /// Get the task provider instance.
    fn task(&self) -> &Self::Task;
}

/// Production providers using the Tokio runtime and real TCP.
#[derive(Clone, Debug)]
pub struct TokioProviders {
    transport: TokioTransport,
    task: TokioTaskProvider,
}

impl TokioProviders {
    /// Create a new production providers bundle.
    pub fn new() -> Self {
        Self {
            transport: TokioTransport::new(),
            task: TokioTaskProvider,
        }
    }
}

impl Default for TokioProviders {
    fn default() -> Self {
        Self::new()
    }
}

impl Providers for TokioProviders {
    type Transport = TokioTransport;
    type Task = TokioTaskProvider;

    fn transport(&self) -> &Self::Transport {
        &self.transport
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }
}
