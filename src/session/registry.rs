//! Thread-safe session registry.
//!
//! One coarse mutex guards the whole map: get/create/remove/list fully
//! serialize with each other. Sessions are created and destroyed rarely
//! relative to execution traffic, so the lock is correctness-first rather
//! than throughput-optimized. Construction and insertion both happen while
//! the lock is held, so two concurrent creates for the same key can never
//! both observe "not found".

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::engine::{Backend, ModelRunner, ModelSource};
use crate::error::ServeError;
use crate::models::ModelBinGetter;

use super::{Session, SessionDescriptor, SessionKey};

pub struct SessionRegistry {
    sessions: Mutex<BTreeMap<SessionKey, Arc<Session>>>,
    backend: Arc<dyn Backend>,
    bin_getter: ModelBinGetter,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    pub fn new(backend: Arc<dyn Backend>, bin_getter: ModelBinGetter) -> Self {
        Self {
            sessions: Mutex::new(BTreeMap::new()),
            backend,
            bin_getter,
        }
    }

    /// Look up a session. Absence is not an error.
    pub fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.lock().get(key).cloned()
    }

    /// Create a session for `(model, version)`.
    ///
    /// Model bytes are resolved in priority order: inline `bytes` with
    /// positive length, then a string `path` in `options`, then the
    /// model-binary getter. Fails with `Conflict` if the key already exists.
    pub fn create(
        &self,
        model: &str,
        version: &str,
        options: &Value,
        bytes: Option<&[u8]>,
    ) -> Result<Arc<Session>, ServeError> {
        let key = SessionKey::new(model, version)?;

        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&key) {
            return Err(ServeError::Conflict("session already exists".into()));
        }

        let runner = self.load_runner(&key, options, bytes)?;
        let session = Arc::new(Session::new(key.clone(), runner));
        sessions.insert(key, Arc::clone(&session));
        Ok(session)
    }

    /// Remove a session. In-flight executions against outstanding handles
    /// are unaffected; the entry simply becomes unreachable.
    pub fn remove(&self, key: &SessionKey) -> Result<(), ServeError> {
        match self.sessions.lock().remove(key) {
            Some(_) => Ok(()),
            None => Err(ServeError::NotFound("session not found".into())),
        }
    }

    /// Descriptors for all live sessions, in key order.
    pub fn list(&self) -> Vec<SessionDescriptor> {
        self.sessions
            .lock()
            .values()
            .map(|session| session.descriptor())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().len()
    }

    // Called with the map lock held; keeping it a plain helper (rather than
    // re-entering a public operation) avoids any need for a reentrant lock.
    fn load_runner(
        &self,
        key: &SessionKey,
        options: &Value,
        bytes: Option<&[u8]>,
    ) -> Result<Box<dyn ModelRunner>, ServeError> {
        if let Some(bytes) = bytes {
            if !bytes.is_empty() {
                return Ok(self.backend.load(key, ModelSource::Bytes(bytes), options)?);
            }
        }

        if let Some(path) = options.get("path").and_then(Value::as_str) {
            return Ok(self
                .backend
                .load(key, ModelSource::Path(path.into()), options)?);
        }

        let bin = (self.bin_getter)(key.model(), key.version())?;
        Ok(self.backend.load(key, ModelSource::Bytes(&bin), options)?)
    }
}
