//! Listeners: the accept loop and per-connection callback dispatch.
//!
//! A listener binds a port and runs an accept loop as a local task. For
//! every accepted connection it allocates a tag pair, sends the handshake,
//! registers the connection with the worker, and invokes the
//! user-supplied handler with a fresh [`Endpoint`]. Returning from the
//! handler closes that endpoint; closing the listener only stops the
//! accept loop and never touches endpoints already handed out.

use std::cell::Cell;
use std::future::Future;

use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;

use crate::endpoint::Endpoint;
use crate::error::{TagError, TagResult};
use crate::net::{ListenerSocket, TransportProvider};
use crate::providers::Providers;
use crate::task::TaskProvider;
use crate::wire::Handshake;
use crate::worker::Worker;

/// Handle to a running accept loop.
///
/// Closing (or dropping) the listener stops the accept loop; endpoints
/// already accepted keep running until closed individually.
pub struct Listener {
    shutdown: Cell<Option<oneshot::Sender<()>>>,
    local_addr: String,
}

impl Listener {
    /// Stop accepting new connections. Idempotent.
    pub fn close(&self) {
        if let Some(tx) = self.shutdown.take() {
            tracing::debug!(addr = %self.local_addr, "listener closing");
            let _ = tx.send(());
        }
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// The bound port, useful after binding port 0.
    pub fn local_port(&self) -> u16 {
        self.local_addr
            .rsplit(':')
            .next()
            .and_then(|port| port.parse().ok())
            .unwrap_or(0)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}

impl<P: Providers> Worker<P> {
    /// Bind `port` and start accepting connections, invoking `handler`
    /// for each accepted endpoint. Port 0 binds an ephemeral port;
    /// query it with [`Listener::local_port`].
    ///
    /// The handler runs as its own local task per connection, so slow
    /// handlers never stall the accept loop. When the handler returns,
    /// its endpoint is closed; a handler error is logged and treated the
    /// same way.
    ///
    /// # Errors
    ///
    /// [`TagError::BindFailure`] if the port cannot be bound.
    pub async fn create_listener<F, Fut>(&self, port: u16, handler: F) -> TagResult<Listener>
    where
        F: Fn(Endpoint<P>) -> Fut + 'static,
        Fut: Future<Output = TagResult<()>> + 'static,
    {
        self.shared.check_usable()?;

        let addr = format!("0.0.0.0:{port}");
        let socket = self
            .shared
            .providers
            .transport()
            .bind(&addr)
            .await
            .map_err(|error| TagError::BindFailure {
                addr: addr.clone(),
                message: error.to_string(),
            })?;
        let local_addr = socket.local_addr().map_err(|error| TagError::BindFailure {
            addr: addr.clone(),
            message: error.to_string(),
        })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shared.providers.task().spawn_task(
            &format!("listener_{local_addr}"),
            accept_loop(self.clone(), socket, handler, shutdown_rx),
        );

        tracing::info!(%local_addr, "listener started");
        Ok(Listener {
            shutdown: Cell::new(Some(shutdown_tx)),
            local_addr,
        })
    }
}

async fn accept_loop<P, F, Fut>(
    worker: Worker<P>,
    socket: <P::Transport as TransportProvider>::Listener,
    handler: F,
    mut shutdown: oneshot::Receiver<()>,
) where
    P: Providers,
    F: Fn(Endpoint<P>) -> Fut + 'static,
    Fut: Future<Output = TagResult<()>> + 'static,
{
    loop {
        let accepted = tokio::select! {
            _ = &mut shutdown => break,
            accepted = socket.accept() => accepted,
        };

        let (mut stream, peer_addr) = match accepted {
            Ok(pair) => pair,
            Err(error) => {
                tracing::warn!(%error, "accept failed");
                continue;
            }
        };

        let pair = match worker.allocate_tags() {
            Ok(pair) => pair,
            Err(error) => {
                // Dropping the stream before the handshake rejects the peer.
                tracing::warn!(%error, peer = %peer_addr, "rejecting connection");
                continue;
            }
        };

        // The handshake carries the pair in the connecting side's
        // perspective; this side keeps the unflipped pair.
        let handshake = Handshake {
            tags: pair.flipped(),
        };
        if let Err(error) = stream.write_all(&handshake.serialize()).await {
            tracing::warn!(%error, peer = %peer_addr, "handshake write failed");
            worker.release_tags(pair);
            continue;
        }

        let conn = worker.register_connection(stream, peer_addr.clone());
        let endpoint = Endpoint::new(worker.clone(), conn, pair, peer_addr.clone());
        tracing::info!(
            conn,
            peer = %peer_addr,
            send_tag = pair.send,
            recv_tag = pair.recv,
            "connection accepted"
        );

        let fut = handler(endpoint.clone());
        worker.shared.providers.task().spawn_task(
            &format!("conn_{conn}_handler"),
            async move {
                if let Err(error) = fut.await {
                    tracing::warn!(conn, %error, "connection handler failed");
                }
                endpoint.close();
            },
        );
    }
    tracing::debug!("accept loop exiting");
}
