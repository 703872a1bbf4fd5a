//! Scoring output types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::EngineError;

/// Discrete risk tier derived from the calibrated fraud probability.
///
/// Ordered: LOW < MEDIUM < HIGH < CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Map a probability to a tier via the ordered threshold table.
    pub fn from_probability(p: f64, tiers: &RiskTierThresholds) -> Self {
        if p >= tiers.critical {
            RiskLevel::Critical
        } else if p >= tiers.high {
            RiskLevel::High
        } else if p >= tiers.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Risk tier boundaries: p < medium -> LOW, < high -> MEDIUM,
/// < critical -> HIGH, otherwise CRITICAL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskTierThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl RiskTierThresholds {
    /// Thresholds must be strictly increasing within [0, 1]. Checked once
    /// at configuration load, never at request time.
    pub fn validate(&self) -> Result<(), EngineError> {
        let ordered = 0.0 < self.medium
            && self.medium < self.high
            && self.high < self.critical
            && self.critical <= 1.0;
        if !ordered {
            return Err(EngineError::Configuration(format!(
                "risk tier thresholds must be strictly increasing in (0, 1]: \
                 medium={} high={} critical={}",
                self.medium, self.high, self.critical
            )));
        }
        Ok(())
    }
}

impl Default for RiskTierThresholds {
    fn default() -> Self {
        Self {
            medium: 0.4,
            high: 0.6,
            critical: 0.8,
        }
    }
}

/// Per-request scoring outcome returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Echo of the scored transaction id.
    pub transaction_id: String,

    /// Echo of the customer id.
    pub customer_id: i64,

    /// Whether the calibrated probability crossed the decision threshold.
    pub is_fraud: bool,

    /// Calibrated fraud probability in [0, 1].
    pub fraud_probability: f64,

    /// Discrete risk tier.
    pub risk_level: RiskLevel,

    /// Individual classifier probabilities, keyed by model name. Contains
    /// only the models that responded.
    pub model_scores: HashMap<String, f64>,

    /// Anomaly detector output (own scale, not a probability). `None` when
    /// the detector failed or is not configured.
    pub anomaly_score: Option<f64>,

    /// Ordered human-readable explanations; never empty.
    pub alerts: Vec<String>,

    /// Classifiers that failed and were excluded from aggregation.
    pub skipped_models: Vec<String>,

    /// False when the post-scoring history commit failed; downstream
    /// auditing reconciles from this flag.
    pub history_updated: bool,

    /// Decision threshold the verdict was taken against.
    pub threshold_used: f64,

    /// End-to-end request latency.
    pub processing_time_ms: f64,

    /// Result creation time.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        let tiers = RiskTierThresholds::default();

        assert_eq!(RiskLevel::from_probability(0.0, &tiers), RiskLevel::Low);
        assert_eq!(RiskLevel::from_probability(0.39, &tiers), RiskLevel::Low);
        assert_eq!(RiskLevel::from_probability(0.4, &tiers), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_probability(0.6, &tiers), RiskLevel::High);
        assert_eq!(
            RiskLevel::from_probability(0.8, &tiers),
            RiskLevel::Critical
        );
        assert_eq!(
            RiskLevel::from_probability(1.0, &tiers),
            RiskLevel::Critical
        );
    }

    #[test]
    fn test_tier_monotonicity() {
        let tiers = RiskTierThresholds::default();
        let mut probs: Vec<f64> = (0..=100).map(|i| i as f64 / 100.0).collect();
        probs.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let levels: Vec<RiskLevel> = probs
            .iter()
            .map(|&p| RiskLevel::from_probability(p, &tiers))
            .collect();
        assert!(levels.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_threshold_validation() {
        assert!(RiskTierThresholds::default().validate().is_ok());

        let bad = RiskTierThresholds {
            medium: 0.6,
            high: 0.4,
            critical: 0.8,
        };
        assert!(matches!(
            bad.validate(),
            Err(EngineError::Configuration(_))
        ));

        let out_of_range = RiskTierThresholds {
            medium: 0.4,
            high: 0.6,
            critical: 1.5,
        };
        assert!(out_of_range.validate().is_err());
    }
}
