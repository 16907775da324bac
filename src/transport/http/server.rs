//! Plaintext HTTP listener.
//!
//! Accepts connections, serves each on its own task, and tracks the live
//! set so shutdown can drain in-flight work with a bounded wait. The
//! listener owns the canonical set of live connections; each connection
//! holds only a deregistration guard back into it, so nothing keeps a
//! closed socket alive.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::super::ServeContext;
use super::connection::serve_connection;

/// Outcome of draining live connections at shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainResult {
    Complete,
    Timeout { remaining: usize },
}

/// Live-connection set shared between the listener and its connections.
pub(crate) struct ConnectionSet {
    live: Mutex<HashSet<u64>>,
    changed: Notify,
}

impl ConnectionSet {
    pub(crate) fn new() -> Self {
        Self {
            live: Mutex::new(HashSet::new()),
            changed: Notify::new(),
        }
    }

    pub(crate) fn register(self: &Arc<Self>, id: u64) -> ConnGuard {
        self.live.lock().insert(id);
        ConnGuard {
            id,
            set: Arc::clone(self),
        }
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Wait until the live set is empty, up to `timeout`.
    pub(crate) async fn wait_idle(&self, timeout: Duration) -> DrainResult {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = self.live_count();
            if remaining == 0 {
                return DrainResult::Complete;
            }

            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            if left.is_zero() {
                return DrainResult::Timeout { remaining };
            }

            tokio::select! {
                _ = self.changed.notified() => continue,
                _ = tokio::time::sleep(left) => {
                    let remaining = self.live_count();
                    if remaining == 0 {
                        return DrainResult::Complete;
                    }
                    return DrainResult::Timeout { remaining };
                }
            }
        }
    }
}

/// Non-owning back-reference a connection uses to deregister itself.
pub(crate) struct ConnGuard {
    id: u64,
    set: Arc<ConnectionSet>,
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.set.live.lock().remove(&self.id);
        self.set.changed.notify_waiters();
    }
}

pub struct HttpServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
    connections: Arc<ConnectionSet>,
    shutdown_timeout: Duration,
}

impl HttpServer {
    /// Bind and start accepting. Port 0 binds an ephemeral port; use
    /// [`HttpServer::local_addr`] to discover it.
    pub async fn bind(
        addr: SocketAddr,
        ctx: Arc<ServeContext>,
        shutdown_timeout: Duration,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let connections = Arc::new(ConnectionSet::new());
        let shutdown = CancellationToken::new();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            ctx,
            Arc::clone(&connections),
            shutdown.clone(),
        ));

        tracing::info!(addr = %local_addr, "http listener started");

        Ok(Self {
            local_addr,
            shutdown,
            accept_task,
            connections,
            shutdown_timeout,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn live_connections(&self) -> usize {
        self.connections.live_count()
    }

    /// Stop accepting, signal every connection, and wait for the live set
    /// to drain within the configured timeout.
    pub async fn shutdown(self) -> DrainResult {
        self.shutdown.cancel();
        let _ = self.accept_task.await;

        let result = self.connections.wait_idle(self.shutdown_timeout).await;
        match &result {
            DrainResult::Complete => tracing::info!("http listener stopped"),
            DrainResult::Timeout { remaining } => {
                tracing::warn!(remaining, "http listener stopped with connections still open");
            }
        }
        result
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ServeContext>,
    connections: Arc<ConnectionSet>,
    shutdown: CancellationToken,
) {
    let mut next_id: u64 = 0;

    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                next_id += 1;
                let guard = connections.register(next_id);
                let ctx = Arc::clone(&ctx);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    serve_connection(stream, ctx, peer.to_string(), shutdown).await;
                });
            }
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_deregisters_on_drop() {
        let set = Arc::new(ConnectionSet::new());
        let g1 = set.register(1);
        let g2 = set.register(2);
        assert_eq!(set.live_count(), 2);

        drop(g1);
        assert_eq!(set.live_count(), 1);
        drop(g2);
        assert_eq!(set.live_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_completes_when_empty() {
        let set = Arc::new(ConnectionSet::new());
        let result = set.wait_idle(Duration::from_millis(10)).await;
        assert_eq!(result, DrainResult::Complete);
    }

    #[tokio::test]
    async fn test_wait_idle_times_out_with_live_connections() {
        let set = Arc::new(ConnectionSet::new());
        let _guard = set.register(7);
        let result = set.wait_idle(Duration::from_millis(10)).await;
        assert_eq!(result, DrainResult::Timeout { remaining: 1 });
    }

    #[tokio::test]
    async fn test_wait_idle_wakes_on_deregistration() {
        let set = Arc::new(ConnectionSet::new());
        let guard = set.register(7);

        let waiter = Arc::clone(&set);
        let handle = tokio::spawn(async move { waiter.wait_idle(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(guard);

        let result = handle.await.unwrap();
        assert_eq!(result, DrainResult::Complete);
    }
}
