//! Typed client intents.
//!
//! Every request body is validated here, at construction time; a task that
//! fails to build never reaches the worker queue. Each constructed task runs
//! exactly one registry operation (or one inference call) and yields a
//! JSON-serializable result.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::ServeError;
use crate::session::{SessionKey, SessionRegistry};

/// The closed set of task selectors, derived from HTTP method + route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    CreateSession,
    GetSession,
    ListSession,
    ExecuteSession,
    DestroySession,
}

/// One validated client intent.
#[derive(Debug)]
pub enum Task {
    Create {
        registry: Arc<SessionRegistry>,
        key: SessionKey,
        data: Value,
    },
    Get {
        registry: Arc<SessionRegistry>,
        key: SessionKey,
    },
    List {
        registry: Arc<SessionRegistry>,
    },
    Execute {
        registry: Arc<SessionRegistry>,
        key: SessionKey,
        input: Value,
    },
    Destroy {
        registry: Arc<SessionRegistry>,
        key: SessionKey,
    },
}

/// Body schema shared by create/get/destroy: a JSON object with string
/// `model` and `version` fields and an optional `data` object.
struct SessionRequest {
    key: SessionKey,
    data: Value,
}

fn parse_session_request(body: &[u8]) -> Result<SessionRequest, ServeError> {
    let invalid = || {
        ServeError::BadRequest(
            "Invalid session task. Must be a JSON object with model(string) and version(string) fields"
                .into(),
        )
    };

    let raw: Value = serde_json::from_slice(body).map_err(|_| invalid())?;
    let obj = raw.as_object().ok_or_else(invalid)?;

    let model = obj.get("model").and_then(Value::as_str).ok_or_else(invalid)?;
    let version = obj.get("version").and_then(Value::as_str).ok_or_else(invalid)?;
    let key = SessionKey::new(model, version).map_err(|_| invalid())?;

    let data = match obj.get("data") {
        Some(data) => data.clone(),
        None => json!({}),
    };

    Ok(SessionRequest { key, data })
}

fn parse_execute_input(body: &[u8]) -> Result<Value, ServeError> {
    let input: Value = serde_json::from_slice(body).map_err(|_| {
        ServeError::BadRequest("Invalid execution input. Must be a JSON object of input tensors".into())
    })?;
    if !input.is_object() {
        return Err(ServeError::BadRequest(
            "Invalid execution input. Must be a JSON object of input tensors".into(),
        ));
    }
    Ok(input)
}

impl Task {
    /// Build a task whose key (if any) is carried in the body. This mirrors
    /// clients that address sessions entirely through the payload.
    pub fn build(
        registry: Arc<SessionRegistry>,
        kind: TaskKind,
        body: &[u8],
    ) -> Result<Self, ServeError> {
        match kind {
            TaskKind::CreateSession => {
                let req = parse_session_request(body)?;
                Ok(Task::Create {
                    registry,
                    key: req.key,
                    data: req.data,
                })
            }
            TaskKind::GetSession => {
                let req = parse_session_request(body)?;
                Ok(Task::Get {
                    registry,
                    key: req.key,
                })
            }
            TaskKind::DestroySession => {
                let req = parse_session_request(body)?;
                Ok(Task::Destroy {
                    registry,
                    key: req.key,
                })
            }
            TaskKind::ExecuteSession => {
                let req = parse_session_request(body)?;
                Ok(Task::Execute {
                    registry,
                    input: req.data,
                    key: req.key,
                })
            }
            TaskKind::ListSession => Ok(Task::List { registry }),
        }
    }

    /// Build a task addressed by a path key (`/api/sessions/{model}/{version}`).
    /// Only kinds that carry their key in the path are valid here.
    pub fn build_keyed(
        registry: Arc<SessionRegistry>,
        kind: TaskKind,
        model: &str,
        version: &str,
        body: &[u8],
    ) -> Result<Self, ServeError> {
        let key = SessionKey::new(model, version)?;
        match kind {
            TaskKind::GetSession => Ok(Task::Get { registry, key }),
            TaskKind::DestroySession => Ok(Task::Destroy { registry, key }),
            TaskKind::ExecuteSession => Ok(Task::Execute {
                registry,
                key,
                input: parse_execute_input(body)?,
            }),
            TaskKind::CreateSession | TaskKind::ListSession => {
                Err(ServeError::BadRequest("Invalid task type".into()))
            }
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Task::Create { .. } => TaskKind::CreateSession,
            Task::Get { .. } => TaskKind::GetSession,
            Task::List { .. } => TaskKind::ListSession,
            Task::Execute { .. } => TaskKind::ExecuteSession,
            Task::Destroy { .. } => TaskKind::DestroySession,
        }
    }

    /// Execute this task against the registry.
    pub fn run(self) -> Result<Value, ServeError> {
        match self {
            Task::Create { registry, key, data } => {
                let session = registry.create(key.model(), key.version(), &data, None)?;
                Ok(serde_json::to_value(session.descriptor())
                    .map_err(|e| ServeError::Internal(e.to_string()))?)
            }
            Task::Get { registry, key } => {
                let session = registry
                    .get(&key)
                    .ok_or_else(|| ServeError::NotFound("session not found".into()))?;
                Ok(serde_json::to_value(session.descriptor())
                    .map_err(|e| ServeError::Internal(e.to_string()))?)
            }
            Task::List { registry } => Ok(serde_json::to_value(registry.list())
                .map_err(|e| ServeError::Internal(e.to_string()))?),
            Task::Execute { registry, key, input } => {
                let session = registry
                    .get(&key)
                    .ok_or_else(|| ServeError::NotFound("session not found".into()))?;
                let output = session.run(&input)?;
                Ok(json!({ "output": output }))
            }
            Task::Destroy { registry, key } => {
                registry.remove(&key)?;
                Ok(Value::Bool(true))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LinearBackend;
    use crate::models::ModelBinGetter;

    const MANIFEST: &[u8] = br#"{"inputs":["x","y","z"]}"#;

    fn registry() -> Arc<SessionRegistry> {
        let getter: ModelBinGetter = Arc::new(|_, _| Ok(MANIFEST.to_vec()));
        Arc::new(SessionRegistry::new(Arc::new(LinearBackend), getter))
    }

    #[test]
    fn test_create_task_roundtrip() {
        let registry = registry();
        let task = Task::build(
            Arc::clone(&registry),
            TaskKind::CreateSession,
            br#"{"model":"sample","version":"1"}"#,
        )
        .unwrap();
        assert_eq!(task.kind(), TaskKind::CreateSession);

        let result = task.run().unwrap();
        assert_eq!(result["model"], "sample");
        assert_eq!(result["version"], "1");
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_create_rejects_malformed_bodies() {
        let registry = registry();
        for body in [
            &b"not json"[..],
            br#"[1,2,3]"#,
            br#"{"model":"sample"}"#,
            br#"{"model":"sample","version":2}"#,
            br#"{"model":"","version":"1"}"#,
        ] {
            let err = Task::build(Arc::clone(&registry), TaskKind::CreateSession, body).unwrap_err();
            assert!(matches!(err, ServeError::BadRequest(_)), "body: {:?}", body);
        }
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_data_defaults_to_empty_object() {
        let registry = registry();
        let task = Task::build(
            Arc::clone(&registry),
            TaskKind::CreateSession,
            br#"{"model":"sample","version":"1"}"#,
        )
        .unwrap();
        match &task {
            Task::Create { data, .. } => assert_eq!(data, &json!({})),
            _ => panic!("expected create task"),
        }
        task.run().unwrap();
    }

    #[test]
    fn test_get_task_not_found() {
        let task = Task::build_keyed(registry(), TaskKind::GetSession, "missing", "1", b"").unwrap();
        let err = task.run().unwrap_err();
        assert!(matches!(err, ServeError::NotFound(_)));
    }

    #[test]
    fn test_list_task_needs_no_body() {
        let registry = registry();
        let task = Task::build(Arc::clone(&registry), TaskKind::ListSession, b"").unwrap();
        let result = task.run().unwrap();
        assert_eq!(result, json!([]));
    }

    #[test]
    fn test_execute_task_wraps_output() {
        let registry = registry();
        registry.create("sample", "1", &json!({}), None).unwrap();

        let task = Task::build_keyed(
            Arc::clone(&registry),
            TaskKind::ExecuteSession,
            "sample",
            "1",
            br#"{"x":[[1]],"y":[[2]],"z":[[3]]}"#,
        )
        .unwrap();
        let result = task.run().unwrap();
        let output = result["output"].as_array().unwrap();
        assert_eq!(output.len(), 1);
        assert!(output[0].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_execute_rejects_non_object_input() {
        let registry = registry();
        let err = Task::build_keyed(registry, TaskKind::ExecuteSession, "sample", "1", b"[1]")
            .unwrap_err();
        assert!(matches!(err, ServeError::BadRequest(_)));
    }

    #[test]
    fn test_execute_from_body_uses_data_field() {
        let registry = registry();
        registry.create("sample", "1", &json!({}), None).unwrap();

        let body = br#"{"model":"sample","version":"1","data":{"x":[[1]],"y":[[2]],"z":[[3]]}}"#;
        let task = Task::build(registry, TaskKind::ExecuteSession, body).unwrap();
        let result = task.run().unwrap();
        assert_eq!(result["output"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_destroy_task_returns_true() {
        let registry = registry();
        registry.create("sample", "1", &json!({}), None).unwrap();

        let task =
            Task::build_keyed(Arc::clone(&registry), TaskKind::DestroySession, "sample", "1", b"")
                .unwrap();
        assert_eq!(task.run().unwrap(), Value::Bool(true));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_keyed_factory_rejects_bodyless_kinds() {
        let registry = registry();
        for kind in [TaskKind::CreateSession, TaskKind::ListSession] {
            let err = Task::build_keyed(Arc::clone(&registry), kind, "sample", "1", b"").unwrap_err();
            assert!(matches!(err, ServeError::BadRequest(_)));
            assert_eq!(err.to_string(), "Invalid task type");
        }
    }

    #[test]
    fn test_duplicate_create_maps_to_conflict() {
        let registry = registry();
        registry.create("sample", "1", &json!({}), None).unwrap();

        let task = Task::build(
            registry,
            TaskKind::CreateSession,
            br#"{"model":"sample","version":"1"}"#,
        )
        .unwrap();
        let err = task.run().unwrap_err();
        assert!(matches!(err, ServeError::Conflict(_)));
    }
}
