//! Compute offload for inference work.

mod pool;

pub use pool::{Job, PoolError, WorkerPool};
