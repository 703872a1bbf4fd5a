//! ONNX model artifact loading.
//!
//! The training pipeline exports three classifiers and an isolation
//! forest as ONNX, together with a `feature_schema.json` sidecar carrying
//! the expected feature ordering and the direction label-encoder classes.

use anyhow::{Context, Result};
use ort::memory::Allocator;
use ort::session::{builder::GraphOptimizationLevel, Session, SessionOutputs};
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, Tensor};
use serde::Deserialize;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::models::ensemble::{ModelEnsemble, Scorer};

/// Schema sidecar written at training time.
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureSchema {
    /// Feature names in the order the models expect.
    pub feature_names: Vec<String>,
    /// Label-encoder classes for the `direction` feature; index = class id.
    #[serde(default)]
    pub direction_classes: Vec<String>,
}

const SCHEMA_FILE: &str = "feature_schema.json";

const CLASSIFIER_FILES: [(&str, &str); 3] = [
    ("catboost", "catboost.onnx"),
    ("xgboost", "xgboost.onnx"),
    ("lightgbm", "lightgbm.onnx"),
];

const ANOMALY_DETECTOR_FILE: (&str, &str) = ("isolation_forest", "isolation_forest.onnx");

enum OutputKind {
    /// Binary classifier: extract the fraud-class probability.
    Probability,
    /// Isolation forest: negated decision function, higher = more anomalous.
    AnomalyScore,
}

/// One loaded ONNX session behind the `Scorer` capability.
pub struct OnnxModel {
    name: String,
    /// `Session::run` needs exclusive access.
    session: Mutex<Session>,
    input_name: String,
    kind: OutputKind,
}

impl Scorer for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn score(&self, features: &[f32]) -> Result<f64> {
        let shape = vec![1_i64, features.len() as i64];
        let input = Tensor::from_array((shape, features.to_vec()))
            .context("Failed to create input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs![&self.input_name => input])?;

        match self.kind {
            OutputKind::Probability => extract_probability(&outputs, &self.name),
            OutputKind::AnomalyScore => extract_decision_value(&outputs, &self.name).map(|v| -v),
        }
    }
}

/// Fraud-class probability from a classifier's outputs. Tree ensembles
/// exported through sklearn-onnx emit either a `[batch, 2]` tensor
/// (XGBoost) or a seq(map(int64, float)) (CatBoost, LightGBM).
fn extract_probability(outputs: &SessionOutputs, model_name: &str) -> Result<f64> {
    for (name, output) in outputs.iter() {
        if name.contains("label") {
            continue;
        }

        if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
            return Ok(fraud_class_value(&shape.iter().copied().collect::<Vec<_>>(), data));
        }

        if DynSequenceValueType::can_downcast(&output.dtype()) {
            if let Ok(p) = probability_from_sequence_map(&output) {
                return Ok(p);
            }
        }
    }
    anyhow::bail!("model {model_name} produced no extractable probability output")
}

/// Raw decision-function value from the isolation forest's outputs.
fn extract_decision_value(outputs: &SessionOutputs, model_name: &str) -> Result<f64> {
    for (name, output) in outputs.iter() {
        if name.contains("label") {
            continue;
        }
        if let Ok((_, data)) = output.try_extract_tensor::<f32>() {
            if let Some(v) = data.first() {
                return Ok(*v as f64);
            }
        }
    }
    anyhow::bail!("model {model_name} produced no extractable score output")
}

/// Probability of class 1 from a seq(map(int64, float)) output.
fn probability_from_sequence_map(output: &ort::value::DynValue) -> Result<f64> {
    let allocator = Allocator::default();

    let sequence = output
        .downcast_ref::<DynSequenceValueType>()
        .map_err(|e| anyhow::anyhow!("failed to downcast to sequence: {e}"))?;
    let maps = sequence.try_extract_sequence::<DynMapValueType>(&allocator)?;
    let first = maps.first().context("empty sequence output")?;

    let pairs = first.try_extract_key_values::<i64, f32>()?;
    for (class_id, p) in &pairs {
        if *class_id == 1 {
            return Ok(*p as f64);
        }
    }
    for (class_id, p) in &pairs {
        if *class_id == 0 {
            return Ok(1.0 - *p as f64);
        }
    }
    anyhow::bail!("no class probability found in map output")
}

/// Fraud-class value from tensor output data.
fn fraud_class_value(dims: &[i64], data: &[f32]) -> f64 {
    let classes = match dims {
        [_, n] => *n as usize,
        [n] => *n as usize,
        _ => data.len(),
    };
    let value = if classes >= 2 {
        data.get(1).copied()
    } else {
        data.first().copied()
    };
    value.map(|v| v as f64).unwrap_or(0.5)
}

/// Loads the ONNX sessions and the schema sidecar from a models directory.
pub struct ModelLoader {
    onnx_threads: usize,
}

impl ModelLoader {
    pub fn new(onnx_threads: usize) -> Result<Self> {
        ort::init().commit()?;
        info!(onnx_threads, "ONNX Runtime initialized");
        Ok(Self { onnx_threads })
    }

    fn load_model<P: AsRef<Path>>(&self, path: P, name: &str, kind: OutputKind) -> Result<OnnxModel> {
        let path = path.as_ref();
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.onnx_threads)?
            .commit_from_file(path)
            .context(format!("Failed to load model from {path:?}"))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "float_input".to_string());

        info!(model = %name, path = %path.display(), input = %input_name, "Model loaded");

        Ok(OnnxModel {
            name: name.to_string(),
            session: Mutex::new(session),
            input_name,
            kind,
        })
    }

    /// Read the schema sidecar.
    pub fn load_schema<P: AsRef<Path>>(models_dir: P) -> Result<FeatureSchema> {
        let path = models_dir.as_ref().join(SCHEMA_FILE);
        let raw = std::fs::read_to_string(&path)
            .context(format!("Failed to read feature schema from {path:?}"))?;
        serde_json::from_str(&raw).context("Failed to parse feature schema")
    }

    /// Load every model plus the schema. A classifier that fails to load is
    /// skipped with a warning; at least one classifier must load. A missing
    /// anomaly detector degrades to probability-only scoring.
    pub fn load_ensemble<P: AsRef<Path>>(
        &self,
        models_dir: P,
    ) -> Result<(ModelEnsemble, FeatureSchema)> {
        let dir = models_dir.as_ref();
        let schema = Self::load_schema(dir)?;

        let mut classifiers: Vec<Box<dyn Scorer>> = Vec::new();
        for (name, file) in &CLASSIFIER_FILES {
            match self.load_model(dir.join(file), name, OutputKind::Probability) {
                Ok(model) => classifiers.push(Box::new(model)),
                Err(e) => warn!(model = %name, error = %e, "Failed to load classifier, skipping"),
            }
        }
        if classifiers.is_empty() {
            anyhow::bail!("no classifiers loaded from {}", dir.display());
        }

        let (anomaly_name, anomaly_file) = ANOMALY_DETECTOR_FILE;
        let anomaly_detector: Option<Box<dyn Scorer>> =
            match self.load_model(dir.join(anomaly_file), anomaly_name, OutputKind::AnomalyScore) {
                Ok(model) => Some(Box::new(model)),
                Err(e) => {
                    warn!(model = %anomaly_name, error = %e, "Anomaly detector unavailable");
                    None
                }
            };

        info!(
            classifiers = classifiers.len(),
            anomaly_detector = anomaly_detector.is_some(),
            "Model artifacts loaded from {}",
            dir.display()
        );

        let expected_schema = schema.feature_names.clone();
        Ok((
            ModelEnsemble::new(classifiers, anomaly_detector, expected_schema),
            schema,
        ))
    }
}
