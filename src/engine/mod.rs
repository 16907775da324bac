//! Inference engine collaborator interface.
//!
//! The serving core never performs tensor math itself. A [`Backend`] turns
//! raw model bytes (or a filesystem path) into a [`ModelRunner`], and a
//! runner executes inference over JSON-shaped tensor payloads. The built-in
//! [`linear`] backend provides a small reference implementation used by the
//! default binary and the test suite.

use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

use crate::session::SessionKey;

pub mod linear;

pub use linear::LinearBackend;

/// Failures raised by the inference collaborator.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The input payload does not match what the model expects.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The model binary could not be loaded or parsed.
    #[error("Model load failed: {0}")]
    Load(String),

    /// Execution failed after the model was loaded.
    #[error("Execution failed: {0}")]
    Execution(String),
}

/// Where a model binary comes from at session creation.
#[derive(Debug)]
pub enum ModelSource<'a> {
    /// Bytes supplied inline or resolved by the model-binary getter.
    Bytes(&'a [u8]),
    /// An explicit filesystem path from the creation options.
    Path(PathBuf),
}

/// A loaded model capable of executing inference.
///
/// Runners are invoked concurrently from multiple worker threads; the
/// registry layers no per-session lock on top, so implementations must
/// tolerate concurrent `run` calls.
pub trait ModelRunner: Send + Sync {
    /// Execute inference. `input` is the request's tensor payload; the
    /// returned value is the output tensor JSON.
    fn run(&self, input: &Value) -> Result<Value, EngineError>;

    /// Engine-specific metadata merged into session descriptors.
    fn metadata(&self) -> Value {
        Value::Object(Default::default())
    }
}

impl std::fmt::Debug for dyn ModelRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ModelRunner")
    }
}

/// Factory that loads model binaries into runners.
pub trait Backend: Send + Sync {
    fn load(
        &self,
        key: &SessionKey,
        source: ModelSource<'_>,
        options: &Value,
    ) -> Result<Box<dyn ModelRunner>, EngineError>;
}
