//! tensorgate: a model-serving front end.
//!
//! Accepts HTTP/HTTPS requests that create, inspect, invoke, and destroy
//! named model sessions, and dispatches inference to a bounded worker pool
//! so network I/O never blocks on compute.
//!
//! # Architecture
//!
//! - [`session`]: thread-safe registry mapping `(model, version)` keys to
//!   live sessions, with exactly-once creation.
//! - [`task`]: the closed set of typed client intents, validated at
//!   construction.
//! - [`scheduler`]: fixed-size worker pool with FIFO start order.
//! - [`transport`]: shared connection state machine behind plaintext and
//!   TLS listeners.
//! - [`engine`] / [`models`]: narrow collaborator interfaces for inference
//!   and model-binary retrieval.
//!
//! Components are constructed explicitly and passed by handle. There are
//! no process-wide singletons, so several independent server instances can
//! coexist in one process (the test suite relies on this).

use std::sync::Arc;

pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod session;
pub mod task;
pub mod telemetry;
pub mod transport;

pub use config::ServerConfig;
pub use error::ServeError;

use engine::Backend;
use models::ModelBinGetter;
use scheduler::WorkerPool;
use session::SessionRegistry;
use transport::ServeContext;

/// One assembled serving core: registry + worker pool + configuration.
pub struct Runtime {
    pub registry: Arc<SessionRegistry>,
    pub worker_pool: Arc<WorkerPool>,
    pub config: ServerConfig,
}

impl Runtime {
    pub fn new(config: ServerConfig, backend: Arc<dyn Backend>, bin_getter: ModelBinGetter) -> Self {
        let registry = Arc::new(SessionRegistry::new(backend, bin_getter));
        let worker_pool = Arc::new(WorkerPool::new(config.worker_threads));
        Self {
            registry,
            worker_pool,
            config,
        }
    }

    /// Shared state handed to the transport listeners.
    pub fn serve_context(&self) -> Arc<ServeContext> {
        Arc::new(ServeContext {
            registry: Arc::clone(&self.registry),
            pool: Arc::clone(&self.worker_pool),
            payload_limit: self.config.payload_limit,
            idle_timeout: self.config.read_timeout,
        })
    }
}
