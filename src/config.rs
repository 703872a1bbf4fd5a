//! Configuration for the fraud scoring engine.

use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::EngineError;
use crate::types::RiskTierThresholds;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub models: ModelsConfig,
    pub detection: DetectionConfig,
    pub history: HistoryConfig,
    pub alerts: AlertConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// Subject for incoming transactions.
    pub transaction_subject: String,
    /// Subject for outgoing score results.
    pub score_subject: String,
}

/// Model artifact configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Directory containing the ONNX models and feature_schema.json.
    pub models_dir: String,
    /// Ensemble weights per classifier.
    pub weights: HashMap<String, f64>,
    /// Threads per ONNX session.
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_onnx_threads() -> usize {
    1
}

/// Decision and aggregation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Fraud decision threshold on the calibrated probability.
    pub threshold: f64,
    /// Risk tier boundaries (strictly increasing).
    #[serde(default)]
    pub risk_tiers: RiskTierThresholds,
    /// Anomaly score above which the probability is adjusted upward.
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,
    /// Additive probability adjustment applied when the anomaly score
    /// exceeds the threshold, clamped to [0, 1].
    #[serde(default = "default_anomaly_boost")]
    pub anomaly_boost: f64,
}

fn default_anomaly_threshold() -> f64 {
    0.5
}

fn default_anomaly_boost() -> f64 {
    0.1
}

/// Rolling history configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Retention window for per-customer history, in days.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Short windowed-statistics span, in days.
    #[serde(default = "default_short_window_days")]
    pub short_window_days: i64,
    /// Long windowed-statistics span, in days.
    #[serde(default = "default_long_window_days")]
    pub long_window_days: i64,
}

fn default_retention_days() -> i64 {
    60
}

fn default_short_window_days() -> i64 {
    7
}

fn default_long_window_days() -> i64 {
    30
}

/// Alert rule thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    /// Amount spike fires when amount > multiplier * 30-day average.
    #[serde(default = "default_spike_multiplier")]
    pub amount_spike_multiplier: f64,
    /// Rapid-repeat fires when the previous transaction is closer than
    /// this many minutes.
    #[serde(default = "default_frequency_minutes")]
    pub frequency_threshold_minutes: u32,
    /// Night window start hour (inclusive).
    #[serde(default = "default_night_start")]
    pub night_start_hour: u32,
    /// Night window end hour (inclusive); the window wraps midnight.
    #[serde(default = "default_night_end")]
    pub night_end_hour: u32,
    /// Velocity acceleration above which the velocity alert fires.
    #[serde(default = "default_acceleration_threshold")]
    pub velocity_acceleration_threshold: f64,
    /// Customers with fewer prior transactions get a limited-history alert.
    #[serde(default = "default_min_history")]
    pub min_history_count: u32,
}

fn default_spike_multiplier() -> f64 {
    3.0
}

fn default_frequency_minutes() -> u32 {
    60
}

fn default_night_start() -> u32 {
    23
}

fn default_night_end() -> u32 {
    6
}

fn default_acceleration_threshold() -> f64 {
    2.0
}

fn default_min_history() -> u32 {
    5
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            amount_spike_multiplier: default_spike_multiplier(),
            frequency_threshold_minutes: default_frequency_minutes(),
            night_start_hour: default_night_start(),
            night_end_hour: default_night_end(),
            velocity_acceleration_threshold: default_acceleration_threshold(),
            min_history_count: default_min_history(),
        }
    }
}

/// Pipeline configuration for the binary.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum concurrently processed transactions.
    pub workers: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
}

impl AppConfig {
    /// Load and validate configuration from the default path.
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load and validate configuration from a specific path.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        let config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Validate cross-field invariants. Fatal at startup, never checked
    /// again at request time.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.detection.risk_tiers.validate()?;

        if !(0.0..=1.0).contains(&self.detection.threshold) {
            return Err(EngineError::Configuration(format!(
                "decision threshold must be in [0, 1], got {}",
                self.detection.threshold
            )));
        }
        if self.detection.anomaly_boost < 0.0 {
            return Err(EngineError::Configuration(
                "anomaly_boost must be non-negative".to_string(),
            ));
        }
        if self.history.retention_days <= 0 {
            return Err(EngineError::Configuration(
                "retention_days must be positive".to_string(),
            ));
        }
        if self.history.short_window_days <= 0
            || self.history.long_window_days < self.history.short_window_days
        {
            return Err(EngineError::Configuration(format!(
                "window spans must satisfy 0 < short <= long, got {} and {}",
                self.history.short_window_days, self.history.long_window_days
            )));
        }
        if self.history.long_window_days > self.history.retention_days {
            return Err(EngineError::Configuration(
                "long window span cannot exceed the retention window".to_string(),
            ));
        }
        if self.alerts.night_start_hour > 23 || self.alerts.night_end_hour > 23 {
            return Err(EngineError::Configuration(
                "night hours must be in 0..=23".to_string(),
            ));
        }
        if self.models.weights.is_empty() {
            return Err(EngineError::Configuration(
                "at least one classifier weight must be configured".to_string(),
            ));
        }
        if self.models.weights.values().any(|w| *w < 0.0) {
            return Err(EngineError::Configuration(
                "classifier weights must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut weights = HashMap::new();
        weights.insert("catboost".to_string(), 0.4);
        weights.insert("xgboost".to_string(), 0.35);
        weights.insert("lightgbm".to_string(), 0.25);

        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                transaction_subject: "transactions".to_string(),
                score_subject: "fraud.scores".to_string(),
            },
            models: ModelsConfig {
                models_dir: "models".to_string(),
                weights,
                onnx_threads: 1,
            },
            detection: DetectionConfig {
                threshold: 0.5,
                risk_tiers: RiskTierThresholds::default(),
                anomaly_threshold: default_anomaly_threshold(),
                anomaly_boost: default_anomaly_boost(),
            },
            history: HistoryConfig {
                retention_days: default_retention_days(),
                short_window_days: default_short_window_days(),
                long_window_days: default_long_window_days(),
            },
            alerts: AlertConfig::default(),
            pipeline: PipelineConfig { workers: 4 },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.history.retention_days, 60);
        assert_eq!(config.models.weights.len(), 3);
    }

    #[test]
    fn test_unordered_tiers_rejected() {
        let mut config = AppConfig::default();
        config.detection.risk_tiers.high = 0.2;
        assert!(matches!(
            config.validate(),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn test_window_wider_than_retention_rejected() {
        let mut config = AppConfig::default();
        config.history.retention_days = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = AppConfig::default();
        config.models.weights.insert("xgboost".to_string(), -0.1);
        assert!(config.validate().is_err());
    }
}
