//! Network transports.
//!
//! Plaintext HTTP and (optionally) TLS share one connection state machine;
//! the TLS variant differs only in the handshake performed before the first
//! read.

use std::sync::Arc;
use std::time::Duration;

use crate::scheduler::WorkerPool;
use crate::session::SessionRegistry;

pub mod http;
#[cfg(feature = "tls")]
pub mod tls;

/// Shared state handed to every connection.
pub struct ServeContext {
    pub registry: Arc<SessionRegistry>,
    pub pool: Arc<WorkerPool>,
    pub payload_limit: usize,
    pub idle_timeout: Duration,
}
