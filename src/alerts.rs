//! Rule-based alert generation.
//!
//! A deterministic, ordered rule set over the already-computed feature
//! vector and the aggregated probability. No randomness and no model
//! access; callers always receive at least one explanation.

use crate::config::{AlertConfig, DetectionConfig};
use crate::features::{FeatureVector, TIME_SINCE_LAST_SENTINEL_HOURS};

/// Emitted when no rule fires, so the alert list is never empty.
pub const NO_ANOMALIES_ALERT: &str = "No anomalies found, decision based on general profile";

/// Evaluates the fixed alert rules in priority order.
pub struct AlertGenerator {
    spike_multiplier: f64,
    frequency_threshold_minutes: u32,
    night_start_hour: u32,
    night_end_hour: u32,
    acceleration_threshold: f64,
    min_history_count: u32,
    critical_threshold: f64,
    anomaly_threshold: f64,
}

impl AlertGenerator {
    pub fn new(alerts: &AlertConfig, detection: &DetectionConfig) -> Self {
        Self {
            spike_multiplier: alerts.amount_spike_multiplier,
            frequency_threshold_minutes: alerts.frequency_threshold_minutes,
            night_start_hour: alerts.night_start_hour,
            night_end_hour: alerts.night_end_hour,
            acceleration_threshold: alerts.velocity_acceleration_threshold,
            min_history_count: alerts.min_history_count,
            critical_threshold: detection.risk_tiers.critical,
            anomaly_threshold: detection.anomaly_threshold,
        }
    }

    /// Ordered alert list for one scored transaction.
    pub fn generate(
        &self,
        features: &FeatureVector,
        probability: f64,
        anomaly_score: Option<f64>,
    ) -> Vec<String> {
        let get = |name: &str| features.get(name).unwrap_or(0.0) as f64;
        let mut alerts = Vec::new();

        if get("is_amount_spike") == 1.0 {
            alerts.push(format!(
                "Amount is {:.0}x higher than 30-day average",
                self.spike_multiplier
            ));
        }

        let time_since_last_hours = get("time_since_last_hours");
        let has_prior = time_since_last_hours < TIME_SINCE_LAST_SENTINEL_HOURS;
        if has_prior
            && time_since_last_hours > 0.0
            && time_since_last_hours * 60.0 < self.frequency_threshold_minutes as f64
        {
            alerts.push(format!(
                "Transaction less than {} minutes since last one",
                self.frequency_threshold_minutes
            ));
        }

        if get("is_night_transaction") == 1.0 {
            alerts.push(format!(
                "Transaction during night hours ({:02}:00-{:02}:00)",
                self.night_start_hour, self.night_end_hour
            ));
        }

        if get("velocity_acceleration") > self.acceleration_threshold {
            alerts.push("Sudden increase in transaction velocity".to_string());
        }

        if get("total_prev_trans") < self.min_history_count as f64 {
            alerts.push("New customer with limited history".to_string());
        }

        if probability >= self.critical_threshold {
            alerts.push("CRITICAL: Very high fraud probability".to_string());
        }

        if anomaly_score.is_some_and(|s| s > self.anomaly_threshold) {
            alerts.push("Anomaly detector flagged unusual pattern".to_string());
        }

        if alerts.is_empty() {
            alerts.push(NO_ANOMALIES_ALERT.to_string());
        }
        alerts
    }
}
