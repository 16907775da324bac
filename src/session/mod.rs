//! Session identity and lifetime.
//!
//! A session is one loaded, named, versioned model instance. The registry
//! owns sessions while they are present in its map; handles handed out are
//! `Arc`-shared, so in-flight executions keep a removed session alive until
//! they finish, while no new lookup can find it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::engine::{EngineError, ModelRunner};
use crate::error::ServeError;

pub mod registry;

pub use registry::SessionRegistry;

/// Identity of a session: model name and model version, both non-empty.
/// Equality and ordering are structural and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionKey {
    model: String,
    version: String,
}

impl SessionKey {
    pub fn new(model: impl Into<String>, version: impl Into<String>) -> Result<Self, ServeError> {
        let model = model.into();
        let version = version.into();
        if model.is_empty() || version.is_empty() {
            return Err(ServeError::BadRequest(
                "model and version must be non-empty strings".into(),
            ));
        }
        Ok(Self { model, version })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model, self.version)
    }
}

/// A live session wrapping one loaded model.
#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    created_at: DateTime<Utc>,
    runner: Box<dyn ModelRunner>,
    executions: AtomicU64,
}

impl Session {
    pub(crate) fn new(key: SessionKey, runner: Box<dyn ModelRunner>) -> Self {
        Self {
            key,
            created_at: Utc::now(),
            runner,
            executions: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Execute inference against the loaded model.
    pub fn run(&self, input: &Value) -> Result<Value, EngineError> {
        self.executions.fetch_add(1, Ordering::Relaxed);
        self.runner.run(input)
    }

    /// Serializable view of this session.
    pub fn descriptor(&self) -> SessionDescriptor {
        let extra = match self.runner.metadata() {
            Value::Object(map) => map,
            _ => Default::default(),
        };
        SessionDescriptor {
            model: self.key.model.clone(),
            version: self.key.version.clone(),
            created_at: self.created_at,
            executions: self.executions.load(Ordering::Relaxed),
            extra,
        }
    }
}

/// Descriptor returned by create/get/list.
#[derive(Debug, Clone, Serialize)]
pub struct SessionDescriptor {
    pub model: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub executions: u64,
    /// Engine-specific metadata, flattened into the descriptor object.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}
