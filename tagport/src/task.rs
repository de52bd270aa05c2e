//! Task spawning abstraction for the single-threaded runtime.

use std::future::Future;
use tracing::Instrument;

/// Provider for spawning local tasks in single-threaded context.
///
/// Tasks are spawned with `spawn_local` to maintain the single-threaded
/// execution guarantees the progress engine relies on. Callers must be
/// inside a `tokio::task::LocalSet` (or local runtime).
pub trait TaskProvider: Clone {
    /// Spawn a named task that runs on the current thread.
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + 'static;
}

/// Tokio-based task provider using `spawn_local`.
///
/// The task name is attached as a tracing span so per-task log lines are
/// attributable without unstable task-builder APIs.
#[derive(Clone, Debug)]
pub struct TokioTaskProvider;

impl TaskProvider for TokioTaskProvider {
    fn spawn_task<F>(&self, name: &str, future: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + 'static,
    {
        let span = tracing::trace_span!("task", name = %name);
        tokio::task::spawn_local(
            async move {
                tracing::trace!("task starting");
                future.await;
                tracing::trace!("task completed");
            }
            .instrument(span),
        )
    }
}
