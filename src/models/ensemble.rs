//! Model ensemble: three classifiers plus one anomaly detector.

use anyhow::Result;
use std::collections::HashMap;
use tracing::error;

use crate::error::EngineError;
use crate::features::FEATURE_NAMES;

/// Capability interface for one pretrained model: feature vector in,
/// scalar score out. Classifiers return a probability in [0, 1]; the
/// anomaly detector returns an outlier score on its own scale.
pub trait Scorer: Send + Sync {
    fn name(&self) -> &str;
    fn score(&self, features: &[f32]) -> Result<f64>;
}

/// Raw per-model outputs for one request.
#[derive(Debug, Clone, Default)]
pub struct EnsembleOutput {
    /// Probabilities from the classifiers that responded.
    pub classifier_scores: HashMap<String, f64>,
    /// Anomaly detector output; `None` when it failed or is absent.
    pub anomaly_score: Option<f64>,
    /// Classifiers that failed this request, excluded from aggregation.
    pub skipped: Vec<String>,
}

/// Fixed set of models, closed at startup. Each model is invoked
/// independently so one failure never blocks the others.
pub struct ModelEnsemble {
    classifiers: Vec<Box<dyn Scorer>>,
    anomaly_detector: Option<Box<dyn Scorer>>,
    /// Feature-name ordering the artifacts were trained against.
    expected_schema: Vec<String>,
}

impl ModelEnsemble {
    pub fn new(
        classifiers: Vec<Box<dyn Scorer>>,
        anomaly_detector: Option<Box<dyn Scorer>>,
        expected_schema: Vec<String>,
    ) -> Self {
        Self {
            classifiers,
            anomaly_detector,
            expected_schema,
        }
    }

    /// Fail fast when the engine's feature schema does not match what the
    /// artifacts were trained on. Called once at startup.
    pub fn validate_schema(&self) -> Result<(), EngineError> {
        if self.classifiers.is_empty() {
            return Err(EngineError::Configuration(
                "ensemble has no classifiers".to_string(),
            ));
        }
        if self.expected_schema.len() != FEATURE_NAMES.len() {
            return Err(EngineError::Configuration(format!(
                "artifact schema has {} features, engine produces {}",
                self.expected_schema.len(),
                FEATURE_NAMES.len()
            )));
        }
        for (i, (expected, actual)) in self
            .expected_schema
            .iter()
            .zip(FEATURE_NAMES.iter())
            .enumerate()
        {
            if expected != actual {
                return Err(EngineError::Configuration(format!(
                    "feature schema mismatch at position {i}: artifact expects \
                     '{expected}', engine produces '{actual}'"
                )));
            }
        }
        Ok(())
    }

    /// Score the vector with every model. A failed classifier is recorded
    /// as skipped, not as a zero probability.
    pub fn score(&self, features: &[f32]) -> EnsembleOutput {
        let mut output = EnsembleOutput::default();

        for model in &self.classifiers {
            match model.score(features) {
                Ok(p) => {
                    output
                        .classifier_scores
                        .insert(model.name().to_string(), p.clamp(0.0, 1.0));
                }
                Err(e) => {
                    error!(model = %model.name(), error = %e, "Classifier failed, skipping");
                    output.skipped.push(model.name().to_string());
                }
            }
        }

        if let Some(detector) = &self.anomaly_detector {
            match detector.score(features) {
                Ok(s) => output.anomaly_score = Some(s),
                Err(e) => {
                    error!(model = %detector.name(), error = %e, "Anomaly detector failed");
                }
            }
        }

        output
    }

    pub fn classifier_names(&self) -> Vec<String> {
        self.classifiers
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    pub fn model_count(&self) -> usize {
        self.classifiers.len() + usize::from(self.anomaly_detector.is_some())
    }
}
