//! Combines per-model outputs into one calibrated probability and tier.

use std::collections::HashMap;
use tracing::debug;

use crate::config::DetectionConfig;
use crate::error::EngineError;
use crate::models::ensemble::EnsembleOutput;
use crate::types::{RiskLevel, RiskTierThresholds};

/// Weighted-average aggregation over the classifiers that responded, with
/// an anomaly-driven upward adjustment. The anomaly score never enters the
/// average directly; its scale is not a probability.
pub struct ScoreAggregator {
    weights: HashMap<String, f64>,
    anomaly_threshold: f64,
    anomaly_boost: f64,
    tiers: RiskTierThresholds,
}

impl ScoreAggregator {
    pub fn new(weights: HashMap<String, f64>, detection: &DetectionConfig) -> Self {
        Self {
            weights,
            anomaly_threshold: detection.anomaly_threshold,
            anomaly_boost: detection.anomaly_boost,
            tiers: detection.risk_tiers.clone(),
        }
    }

    /// Calibrated fraud probability. Weights are renormalized over the
    /// responders; when every classifier failed this is an error, never a
    /// silent zero.
    pub fn aggregate(&self, output: &EnsembleOutput) -> Result<f64, EngineError> {
        if output.classifier_scores.is_empty() {
            return Err(EngineError::ModelUnavailable(format!(
                "all classifiers failed: {}",
                output.skipped.join(", ")
            )));
        }

        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        for (name, &p) in &output.classifier_scores {
            // unweighted models participate equally rather than dropping out
            let w = self.weights.get(name).copied().unwrap_or(1.0);
            weighted_sum += w * p;
            total_weight += w;
        }
        if total_weight <= 0.0 {
            return Err(EngineError::ModelUnavailable(
                "responding classifiers have zero total weight".to_string(),
            ));
        }

        let mut probability = weighted_sum / total_weight;

        if let Some(anomaly) = output.anomaly_score {
            if anomaly > self.anomaly_threshold {
                debug!(
                    anomaly_score = anomaly,
                    boost = self.anomaly_boost,
                    "Anomaly threshold exceeded, adjusting probability upward"
                );
                probability += self.anomaly_boost;
            }
        }

        Ok(probability.clamp(0.0, 1.0))
    }

    /// Map a probability to its discrete risk tier.
    pub fn tier(&self, probability: f64) -> RiskLevel {
        RiskLevel::from_probability(probability, &self.tiers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> ScoreAggregator {
        let mut weights = HashMap::new();
        weights.insert("catboost".to_string(), 0.4);
        weights.insert("xgboost".to_string(), 0.35);
        weights.insert("lightgbm".to_string(), 0.25);
        ScoreAggregator::new(weights, &crate::config::AppConfig::default().detection)
    }

    fn output(scores: &[(&str, f64)], anomaly: Option<f64>) -> EnsembleOutput {
        EnsembleOutput {
            classifier_scores: scores
                .iter()
                .map(|(n, p)| (n.to_string(), *p))
                .collect(),
            anomaly_score: anomaly,
            skipped: Vec::new(),
        }
    }

    #[test]
    fn test_weighted_average() {
        let agg = aggregator();
        let out = output(
            &[("catboost", 0.8), ("xgboost", 0.6), ("lightgbm", 0.4)],
            None,
        );
        let p = agg.aggregate(&out).unwrap();
        // 0.4*0.8 + 0.35*0.6 + 0.25*0.4 = 0.63
        assert!((p - 0.63).abs() < 1e-9);
    }

    #[test]
    fn test_renormalizes_over_responders() {
        let agg = aggregator();
        // xgboost missing: weights renormalize over 0.4 + 0.25
        let out = output(&[("catboost", 0.8), ("lightgbm", 0.4)], None);
        let p = agg.aggregate(&out).unwrap();
        let expected = (0.4 * 0.8 + 0.25 * 0.4) / 0.65;
        assert!((p - expected).abs() < 1e-9);
    }

    #[test]
    fn test_all_classifiers_failed_is_an_error() {
        let agg = aggregator();
        let out = EnsembleOutput {
            skipped: vec!["catboost".into(), "xgboost".into(), "lightgbm".into()],
            ..Default::default()
        };
        assert!(matches!(
            agg.aggregate(&out),
            Err(EngineError::ModelUnavailable(_))
        ));
    }

    #[test]
    fn test_anomaly_boost_applies_above_threshold_only() {
        let agg = aggregator();
        let calm = output(&[("catboost", 0.5)], Some(0.2));
        assert!((agg.aggregate(&calm).unwrap() - 0.5).abs() < 1e-9);

        let anomalous = output(&[("catboost", 0.5)], Some(0.9));
        assert!((agg.aggregate(&anomalous).unwrap() - 0.6).abs() < 1e-9);

        // boosted probability stays clamped to 1.0
        let extreme = output(&[("catboost", 0.97)], Some(5.0));
        assert_eq!(agg.aggregate(&extreme).unwrap(), 1.0);
    }

    #[test]
    fn test_tier_mapping() {
        let agg = aggregator();
        assert_eq!(agg.tier(0.1), RiskLevel::Low);
        assert_eq!(agg.tier(0.5), RiskLevel::Medium);
        assert_eq!(agg.tier(0.7), RiskLevel::High);
        assert_eq!(agg.tier(0.95), RiskLevel::Critical);
    }
}
