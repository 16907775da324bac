//! Built-in reference backend.
//!
//! Models are JSON manifests describing a weighted sum over named input
//! tensors. Each input is an array of rows; the runner produces one score
//! per row. This stands in for a real numeric engine in the default binary
//! and gives the test suite a deterministic fixture.

use std::fs;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::SessionKey;

use super::{Backend, EngineError, ModelRunner, ModelSource};

/// Manifest format accepted as "model bytes".
#[derive(Debug, Deserialize)]
struct Manifest {
    inputs: Vec<String>,
    #[serde(default)]
    weights: Vec<f64>,
    #[serde(default)]
    bias: f64,
}

/// Backend that loads [`Manifest`] models.
#[derive(Debug, Default)]
pub struct LinearBackend;

impl Backend for LinearBackend {
    fn load(
        &self,
        key: &SessionKey,
        source: ModelSource<'_>,
        _options: &Value,
    ) -> Result<Box<dyn ModelRunner>, EngineError> {
        let bytes = match source {
            ModelSource::Bytes(bytes) => bytes.to_vec(),
            ModelSource::Path(path) => fs::read(&path)
                .map_err(|e| EngineError::Load(format!("{}: {}", path.display(), e)))?,
        };

        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Load(format!("{}: invalid manifest: {}", key, e)))?;

        if manifest.inputs.is_empty() {
            return Err(EngineError::Load(format!("{}: manifest declares no inputs", key)));
        }
        if !manifest.weights.is_empty() && manifest.weights.len() != manifest.inputs.len() {
            return Err(EngineError::Load(format!(
                "{}: {} weights for {} inputs",
                key,
                manifest.weights.len(),
                manifest.inputs.len()
            )));
        }

        Ok(Box::new(LinearModel { manifest }))
    }
}

struct LinearModel {
    manifest: Manifest,
}

impl LinearModel {
    fn weight(&self, index: usize) -> f64 {
        self.manifest.weights.get(index).copied().unwrap_or(1.0)
    }
}

impl ModelRunner for LinearModel {
    fn run(&self, input: &Value) -> Result<Value, EngineError> {
        let obj = input
            .as_object()
            .ok_or_else(|| EngineError::InvalidInput("input must be a JSON object".into()))?;

        let mut rows: Option<usize> = None;
        let mut columns: Vec<Vec<f64>> = Vec::with_capacity(self.manifest.inputs.len());

        for name in &self.manifest.inputs {
            let tensor = obj
                .get(name)
                .ok_or_else(|| EngineError::InvalidInput(format!("missing input tensor: {}", name)))?;
            let column = tensor_rows(name, tensor)?;

            match rows {
                None => rows = Some(column.len()),
                Some(expected) if expected != column.len() => {
                    return Err(EngineError::InvalidInput(format!(
                        "input {} has {} rows, expected {}",
                        name,
                        column.len(),
                        expected
                    )));
                }
                Some(_) => {}
            }
            columns.push(column);
        }

        let rows = rows.unwrap_or(0);
        let mut output = Vec::with_capacity(rows);
        for row in 0..rows {
            let mut score = self.manifest.bias;
            for (index, column) in columns.iter().enumerate() {
                score += self.weight(index) * column[row];
            }
            output.push(score);
        }

        Ok(json!(output))
    }

    fn metadata(&self) -> Value {
        json!({
            "backend": "linear",
            "inputs": self.manifest.inputs,
        })
    }
}

/// Collapse one named tensor (array of rows) into a per-row sum.
fn tensor_rows(name: &str, tensor: &Value) -> Result<Vec<f64>, EngineError> {
    let rows = tensor
        .as_array()
        .ok_or_else(|| EngineError::InvalidInput(format!("input {} must be an array of rows", name)))?;

    let mut sums = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let cells = row.as_array().ok_or_else(|| {
            EngineError::InvalidInput(format!("input {} row {} must be an array", name, index))
        })?;
        let mut sum = 0.0;
        for cell in cells {
            sum += cell.as_f64().ok_or_else(|| {
                EngineError::InvalidInput(format!("input {} row {} has a non-numeric value", name, index))
            })?;
        }
        sums.push(sum);
    }
    Ok(sums)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_runner() -> Box<dyn ModelRunner> {
        let key = SessionKey::new("sample", "1").unwrap();
        let manifest = br#"{"inputs":["x","y","z"]}"#;
        LinearBackend
            .load(&key, ModelSource::Bytes(manifest), &json!({}))
            .unwrap()
    }

    #[test]
    fn test_single_row_score() {
        let runner = sample_runner();
        let output = runner
            .run(&json!({"x": [[1]], "y": [[2]], "z": [[3]]}))
            .unwrap();
        let output = output.as_array().unwrap();
        assert_eq!(output.len(), 1);
        assert!(output[0].as_f64().unwrap() > 0.0);
        assert_eq!(output[0].as_f64().unwrap(), 6.0);
    }

    #[test]
    fn test_output_length_matches_row_count() {
        let runner = sample_runner();
        let output = runner
            .run(&json!({
                "x": [[1], [4]],
                "y": [[2], [5]],
                "z": [[3], [6]],
            }))
            .unwrap();
        let output = output.as_array().unwrap();
        assert_eq!(output.len(), 2);
        assert_eq!(output[1].as_f64().unwrap(), 15.0);
    }

    #[test]
    fn test_weights_and_bias() {
        let key = SessionKey::new("weighted", "1").unwrap();
        let manifest = br#"{"inputs":["a","b"],"weights":[2.0,0.5],"bias":1.0}"#;
        let runner = LinearBackend
            .load(&key, ModelSource::Bytes(manifest), &json!({}))
            .unwrap();
        let output = runner.run(&json!({"a": [[3]], "b": [[4]]})).unwrap();
        assert_eq!(output[0].as_f64().unwrap(), 1.0 + 2.0 * 3.0 + 0.5 * 4.0);
    }

    #[test]
    fn test_missing_input_rejected() {
        let runner = sample_runner();
        let err = runner.run(&json!({"x": [[1]], "y": [[2]]})).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
        assert!(err.to_string().contains("z"));
    }

    #[test]
    fn test_row_count_mismatch_rejected() {
        let runner = sample_runner();
        let err = runner
            .run(&json!({"x": [[1], [1]], "y": [[2]], "z": [[3]]}))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_non_numeric_cell_rejected() {
        let runner = sample_runner();
        let err = runner
            .run(&json!({"x": [["a"]], "y": [[2]], "z": [[3]]}))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_non_object_input_rejected() {
        let runner = sample_runner();
        let err = runner.run(&json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn test_invalid_manifest_rejected() {
        let key = SessionKey::new("bad", "1").unwrap();
        let err = LinearBackend
            .load(&key, ModelSource::Bytes(b"not json"), &json!({}))
            .unwrap_err();
        assert!(matches!(err, EngineError::Load(_)));
    }

    #[test]
    fn test_weight_count_mismatch_rejected() {
        let key = SessionKey::new("bad", "1").unwrap();
        let manifest = br#"{"inputs":["a","b"],"weights":[1.0]}"#;
        let err = LinearBackend
            .load(&key, ModelSource::Bytes(manifest), &json!({}))
            .unwrap_err();
        assert!(matches!(err, EngineError::Load(_)));
    }

    #[test]
    fn test_metadata_lists_inputs() {
        let runner = sample_runner();
        let meta = runner.metadata();
        assert_eq!(meta["backend"], "linear");
        assert_eq!(meta["inputs"], json!(["x", "y", "z"]));
    }
}
