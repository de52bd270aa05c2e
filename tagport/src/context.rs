//! Context: the root object workers are created from.

use crate::config::WorkerConfig;
use crate::providers::{Providers, TokioProviders};
use crate::worker::Worker;

/// Root object tying a provider bundle to the workers created from it.
///
/// A context is cheap and carries no engine state of its own; workers
/// are independent of each other and of the context after creation.
/// Everything must run inside a `tokio::task::LocalSet` on a
/// current-thread runtime.
#[derive(Clone, Debug)]
pub struct Context<P: Providers> {
    providers: P,
}

impl Context<TokioProviders> {
    /// Context over the production Tokio providers (real TCP, local tasks).
    pub fn tokio() -> Self {
        Self::new(TokioProviders::new())
    }
}

impl<P: Providers> Context<P> {
    /// Create a context over an explicit provider bundle.
    pub fn new(providers: P) -> Self {
        Self { providers }
    }

    /// Create a worker with its progress driver running under the
    /// configured strategy.
    pub fn create_worker(&self, config: WorkerConfig) -> Worker<P> {
        Worker::new(self.providers.clone(), config)
    }

    /// The provider bundle this context was created over.
    pub fn providers(&self) -> &P {
        &self.providers
    }
}
