//! Encrypted transport.
//!
//! Differs from plaintext only in the handshake inserted before the first
//! read; afterwards the same connection state machine runs over the TLS
//! stream. Handshake failures close the socket without a response.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::rustls::ServerConfig as RustlsConfig;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::config::TlsSettings;

use super::http::connection::serve_connection;
use super::http::server::ConnectionSet;
use super::http::DrainResult;
use super::ServeContext;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("Failed to read TLS material: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS material: {0}")]
    InvalidMaterial(String),

    #[error("TLS configuration rejected: {0}")]
    Config(#[from] tokio_rustls::rustls::Error),
}

/// Build an acceptor from PEM-encoded certificate chain and private key.
pub fn build_acceptor(settings: &TlsSettings) -> Result<TlsAcceptor, TlsError> {
    let mut cert_reader = BufReader::new(File::open(&settings.cert_path)?);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::InvalidMaterial(format!(
            "no certificates in {}",
            settings.cert_path.display()
        )));
    }

    let mut key_reader = BufReader::new(File::open(&settings.key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)?.ok_or_else(|| {
        TlsError::InvalidMaterial(format!("no private key in {}", settings.key_path.display()))
    })?;

    let config = RustlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

pub struct HttpsServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
    connections: Arc<ConnectionSet>,
    shutdown_timeout: Duration,
}

impl HttpsServer {
    pub async fn bind(
        addr: SocketAddr,
        ctx: Arc<ServeContext>,
        settings: &TlsSettings,
        shutdown_timeout: Duration,
    ) -> Result<Self, TlsError> {
        let acceptor = build_acceptor(settings)?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let connections = Arc::new(ConnectionSet::new());
        let shutdown = CancellationToken::new();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            acceptor,
            ctx,
            Arc::clone(&connections),
            shutdown.clone(),
        ));

        tracing::info!(addr = %local_addr, "https listener started");

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

    pub async fn shutdown(self) -> DrainResult {
        self.shutdown.cancel();
        let _ = self.accept_task.await;

        let result = self.connections.wait_idle(self.shutdown_timeout).await;
        match &result {
            DrainResult::Complete => tracing::info!("https listener stopped"),
            DrainResult::Timeout { remaining } => {
                tracing::warn!(remaining, "https listener stopped with connections still open");
            }
        }
        result
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
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
                let acceptor = acceptor.clone();
                let ctx = Arc::clone(&ctx);
                let shutdown = shutdown.clone();
                let handshake_timeout = ctx.idle_timeout;

                tokio::spawn(async move {
                    let _guard = guard;
                    let handshake =
                        tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await;
                    match handshake {
                        Ok(Ok(tls_stream)) => {
                            serve_connection(tls_stream, ctx, peer.to_string(), shutdown).await;
                        }
                        Ok(Err(err)) => {
                            tracing::warn!(%peer, error = %err, "tls handshake failed");
                        }
                        Err(_) => {
                            tracing::warn!(%peer, "tls handshake timed out");
                        }
                    }
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
    use std::path::PathBuf;

    #[test]
    fn test_missing_cert_file_is_io_error() {
        let settings = TlsSettings {
            port: 8443,
            cert_path: PathBuf::from("/nonexistent/cert.pem"),
            key_path: PathBuf::from("/nonexistent/key.pem"),
        };
        assert!(matches!(build_acceptor(&settings), Err(TlsError::Io(_))));
    }

    #[test]
    fn test_pem_without_certificates_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, "not a certificate").unwrap();
        std::fs::write(&key, "not a key").unwrap();

        let settings = TlsSettings {
            port: 8443,
            cert_path: cert,
            key_path: key,
        };
        assert!(matches!(
            build_acceptor(&settings),
            Err(TlsError::InvalidMaterial(_))
        ));
    }
}
