//! Model binary retrieval.
//!
//! The registry resolves model bytes through a narrow callback so the core
//! stays independent of where binaries live. The directory-backed getter
//! below covers the common layout `base/{model}/{version}/model.*`.

use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::EngineError;

/// Callback resolving `(model name, model version)` to raw model bytes.
/// Invoked only when a create request supplies neither inline bytes nor an
/// explicit path.
pub type ModelBinGetter = Arc<dyn Fn(&str, &str) -> Result<Vec<u8>, EngineError> + Send + Sync>;

/// File names probed inside a model's version directory, in order.
const MODEL_FILE_CANDIDATES: &[&str] = &["model.json", "model.onnx", "model.bin"];

/// Getter reading binaries from `base/{model}/{version}/`.
///
/// Model names and versions arrive from clients, so components containing
/// path separators or `..` are rejected before touching the filesystem.
pub fn dir_bin_getter(base: PathBuf) -> ModelBinGetter {
    Arc::new(move |model, version| {
        if !sane_component(model) || !sane_component(version) {
            return Err(EngineError::Load(format!(
                "invalid model identifier: {}/{}",
                model, version
            )));
        }

        let dir = base.join(model).join(version);
        for candidate in MODEL_FILE_CANDIDATES {
            let path = dir.join(candidate);
            if path.is_file() {
                return std::fs::read(&path)
                    .map_err(|e| EngineError::Load(format!("{}: {}", path.display(), e)));
            }
        }
        Err(EngineError::Load(format!(
            "no model binary for {}/{} under {}",
            model,
            version,
            base.display()
        )))
    })
}

fn sane_component(component: &str) -> bool {
    !component.is_empty()
        && component != ".."
        && !component.contains('/')
        && !component.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_model_json() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("sample").join("1");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join("model.json"), br#"{"inputs":["x"]}"#).unwrap();

        let getter = dir_bin_getter(dir.path().to_path_buf());
        let bytes = getter("sample", "1").unwrap();
        assert_eq!(bytes, br#"{"inputs":["x"]}"#);
    }

    #[test]
    fn test_missing_model_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let getter = dir_bin_getter(dir.path().to_path_buf());
        let err = getter("sample", "1").unwrap_err();
        assert!(matches!(err, EngineError::Load(_)));
    }

    #[test]
    fn test_candidate_order() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("sample").join("1");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join("model.bin"), b"binary").unwrap();
        std::fs::write(model_dir.join("model.json"), b"json").unwrap();

        let getter = dir_bin_getter(dir.path().to_path_buf());
        assert_eq!(getter("sample", "1").unwrap(), b"json");
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let getter = dir_bin_getter(dir.path().to_path_buf());
        assert!(getter("..", "1").is_err());
        assert!(getter("a/b", "1").is_err());
        assert!(getter("sample", "..\\2").is_err());
    }
}
