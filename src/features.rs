//! Feature engineering for real-time fraud scoring.
//!
//! Extraction is a pure function of (incoming transaction, history
//! snapshot). The schema, feature order and window semantics must match
//! the models' training pipeline exactly or the probability calibration
//! drifts; windows consider only transactions strictly before the scored
//! one, and all temporal features are derived in UTC.

use chrono::{Datelike, Duration, Timelike};
use std::collections::HashMap;
use std::f64::consts::TAU;

use crate::config::{AlertConfig, HistoryConfig};
use crate::history::HistorySnapshot;
use crate::types::Transaction;

/// Hours reported for `time_since_last_hours` when the customer has no
/// prior transaction (one year).
pub const TIME_SINCE_LAST_SENTINEL_HOURS: f64 = 8760.0;

/// Value used for amount ratios when the denominator is zero: "no
/// deviation measurable", not a division by zero.
pub const RATIO_SENTINEL: f64 = 1.0;

/// Fixed feature schema expected by the trained models, in order.
pub const FEATURE_NAMES: [&str; 60] = [
    // windowed counts and sums
    "num_trans_last_7d",
    "num_trans_last_30d",
    "sum_amount_last_7d",
    "sum_amount_last_30d",
    "avg_amount_last_7d",
    "avg_amount_last_30d",
    // velocity
    "velocity_24h",
    "velocity_7d",
    "velocity_30d",
    "amount_velocity_7d",
    "amount_velocity_30d",
    "velocity_acceleration",
    "velocity_acceleration_24h",
    // windowed distribution
    "std_amount_7d",
    "max_amount_7d",
    "min_amount_7d",
    "std_amount_30d",
    "max_amount_30d",
    "min_amount_30d",
    // ratios
    "ratio_num_7_30",
    "ratio_sum_7_30",
    "amount_ratio_avg7",
    "amount_ratio_avg30",
    "amount_to_max_ratio",
    "amount_to_hist_max_ratio",
    // recency
    "time_since_last_hours",
    "time_since_last_squared",
    "days_since_first",
    "trans_frequency",
    // graph
    "num_prev_trans_to_same",
    "total_prev_trans",
    "unique_directions_count",
    "sender_out_degree",
    "receiver_in_degree",
    "pair_count",
    // behavior flags
    "is_amount_spike",
    "is_rapid_repeat",
    "is_night_transaction",
    "is_weekend",
    "is_first_transaction",
    "is_new_direction",
    // temporal
    "hour",
    "dayofweek",
    "month",
    "hour_sin",
    "hour_cos",
    "dow_sin",
    "dow_cos",
    "month_sin",
    "month_cos",
    // amount
    "amount",
    "amount_log",
    "amount_zscore_7d",
    "amount_zscore_30d",
    // full-history aggregates
    "hist_trans_count",
    "total_amount_hist",
    "avg_amount_hist",
    "std_amount_hist",
    "max_amount_hist",
    // identity
    "direction_id",
];

/// Fixed-order named feature vector. Every entry is always defined; a
/// cold-start customer yields zeros and the documented sentinels, never
/// NaN.
#[derive(Debug, Clone)]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    pub fn names() -> &'static [&'static str] {
        &FEATURE_NAMES
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value by feature name, mainly for the alert rules and tests.
    pub fn get(&self, name: &str) -> Option<f32> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.values[i])
    }

    /// Model input slice, in schema order.
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }
}

/// Maps direction strings to the label-encoded ids used at training time.
/// Unknown directions fall back to class 0, matching the original
/// encoder's behavior.
#[derive(Debug, Clone, Default)]
pub struct DirectionEncoder {
    index: HashMap<String, usize>,
}

impl DirectionEncoder {
    pub fn from_classes(classes: &[String]) -> Self {
        let index = classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.clone(), i))
            .collect();
        Self { index }
    }

    pub fn encode(&self, direction: &str) -> usize {
        self.index.get(direction).copied().unwrap_or(0)
    }
}

/// Derives the fixed-schema feature vector from a transaction and its
/// customer's history snapshot.
pub struct FeatureExtractor {
    short_window: Duration,
    long_window: Duration,
    short_days: f64,
    long_days: f64,
    spike_multiplier: f64,
    night_start_hour: u32,
    night_end_hour: u32,
    encoder: DirectionEncoder,
}

impl FeatureExtractor {
    pub fn new(history: &HistoryConfig, alerts: &AlertConfig, encoder: DirectionEncoder) -> Self {
        Self {
            short_window: Duration::days(history.short_window_days),
            long_window: Duration::days(history.long_window_days),
            short_days: history.short_window_days as f64,
            long_days: history.long_window_days as f64,
            spike_multiplier: alerts.amount_spike_multiplier,
            night_start_hour: alerts.night_start_hour,
            night_end_hour: alerts.night_end_hour,
            encoder,
        }
    }

    /// Whether `hour` falls in the night window; the window wraps midnight
    /// and is inclusive on both ends (23:00-06:00 by default).
    pub fn is_night_hour(&self, hour: u32) -> bool {
        if self.night_start_hour <= self.night_end_hour {
            hour >= self.night_start_hour && hour <= self.night_end_hour
        } else {
            hour >= self.night_start_hour || hour <= self.night_end_hour
        }
    }

    /// Build the full feature vector. Pure and side-effect-free; cold-start
    /// customers are a supported path, not an error.
    pub fn extract(&self, tx: &Transaction, snap: &HistorySnapshot) -> FeatureVector {
        let ts = tx.timestamp;
        let amount = tx.amount;

        let w7 = snap.window_stats(ts, self.short_window);
        let w30 = snap.window_stats(ts, self.long_window);
        let avg7 = w7.mean;
        let avg30 = w30.mean;

        let count_24h = snap.count_in(ts - Duration::hours(24), ts) as f64;
        let count_prev_24h =
            snap.count_in(ts - Duration::hours(48), ts - Duration::hours(24)) as f64;
        let velocity_7d = w7.count as f64 / self.short_days;
        let velocity_30d = w30.count as f64 / self.long_days;

        let time_since_last_hours = match snap.last_timestamp() {
            Some(last) => (ts - last).num_seconds() as f64 / 3600.0,
            None => TIME_SINCE_LAST_SENTINEL_HOURS,
        };
        let days_since_first = match snap.first_timestamp() {
            Some(first) => (ts - first).num_days() as f64,
            None => 0.0,
        };
        let trans_frequency = if days_since_first > 0.0 {
            snap.len() as f64 / days_since_first
        } else {
            0.0
        };

        let prev_to_same = snap.prior_count_to(&tx.direction, ts) as f64;
        let total_prev = snap.prior_count(ts) as f64;
        let unique_directions = snap.prior_unique_directions(ts) as f64;

        let is_amount_spike = avg30 > 0.0 && amount > self.spike_multiplier * avg30;
        let is_rapid_repeat =
            time_since_last_hours > 0.0 && time_since_last_hours < 1.0;

        let hour = ts.hour();
        let dow = ts.weekday().num_days_from_monday();
        let month = ts.month();
        let is_weekend = dow >= 5;

        let mut values: Vec<f32> = Vec::with_capacity(FEATURE_NAMES.len());
        let mut push = |v: f64| values.push(v as f32);

        // windowed counts and sums
        push(w7.count as f64);
        push(w30.count as f64);
        push(w7.sum);
        push(w30.sum);
        push(avg7);
        push(avg30);

        // velocity
        push(count_24h);
        push(velocity_7d);
        push(velocity_30d);
        push(w7.sum / self.short_days);
        push(w30.sum / self.long_days);
        push(velocity_7d - velocity_30d);
        push(count_24h - count_prev_24h);

        // windowed distribution
        push(w7.std);
        push(w7.max);
        push(w7.min);
        push(w30.std);
        push(w30.max);
        push(w30.min);

        // ratios
        push(ratio_or(w7.count as f64, w30.count as f64, 0.0));
        push(ratio_or(w7.sum, w30.sum, 0.0));
        push(ratio_or(amount, avg7, RATIO_SENTINEL));
        push(ratio_or(amount, avg30, RATIO_SENTINEL));
        push(ratio_or(amount, w7.max, RATIO_SENTINEL));
        push(ratio_or(amount, snap.max_amount(), RATIO_SENTINEL));

        // recency
        push(time_since_last_hours);
        push(time_since_last_hours * time_since_last_hours);
        push(days_since_first);
        push(trans_frequency);

        // graph; in-degree is not tracked (the store only sees outgoing
        // transactions), fixed at 1 as in the training data
        push(prev_to_same);
        push(total_prev);
        push(unique_directions);
        push(unique_directions);
        push(1.0);
        push(prev_to_same);

        // behavior flags
        push(flag(is_amount_spike));
        push(flag(is_rapid_repeat));
        push(flag(self.is_night_hour(hour)));
        push(flag(is_weekend));
        push(flag(snap.is_empty()));
        push(flag(!snap.has_direction(&tx.direction)));

        // temporal
        push(hour as f64);
        push(dow as f64);
        push(month as f64);
        push((TAU * hour as f64 / 24.0).sin());
        push((TAU * hour as f64 / 24.0).cos());
        push((TAU * dow as f64 / 7.0).sin());
        push((TAU * dow as f64 / 7.0).cos());
        push((TAU * (month - 1) as f64 / 12.0).sin());
        push((TAU * (month - 1) as f64 / 12.0).cos());

        // amount
        push(amount);
        push(amount.ln_1p());
        push(zscore(amount, w7.mean, w7.std));
        push(zscore(amount, w30.mean, w30.std));

        // full-history aggregates
        push(snap.len() as f64);
        push(snap.total_amount());
        push(snap.mean_amount());
        push(snap.std_amount());
        push(snap.max_amount());

        // identity
        push(self.encoder.encode(&tx.direction) as f64);

        debug_assert_eq!(values.len(), FEATURE_NAMES.len());
        FeatureVector { values }
    }
}

fn ratio_or(numerator: f64, denominator: f64, fallback: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        fallback
    }
}

fn zscore(value: f64, mean: f64, std: f64) -> f64 {
    if std > 0.0 {
        (value - mean) / std
    } else {
        0.0
    }
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryStore;
    use chrono::{DateTime, TimeZone, Utc};

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(
            &crate::config::AppConfig::default().history,
            &AlertConfig::default(),
            DirectionEncoder::default(),
        )
    }

    fn at(day: u32, hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, min, 0).unwrap()
    }

    #[test]
    fn test_schema_has_sixty_unique_names() {
        assert_eq!(FEATURE_NAMES.len(), 60);
        let unique: std::collections::HashSet<_> = FEATURE_NAMES.iter().collect();
        assert_eq!(unique.len(), FEATURE_NAMES.len());
    }

    #[test]
    fn test_cold_start_yields_sentinels_and_no_nan() {
        let tx = Transaction::new(1234, at(15, 23, 45), 50000.0, "card_transfer");
        let fv = extractor().extract(&tx, &HistorySnapshot::default());

        assert_eq!(fv.len(), 60);
        assert!(fv.as_slice().iter().all(|v| v.is_finite()));

        assert_eq!(
            fv.get("time_since_last_hours").unwrap(),
            TIME_SINCE_LAST_SENTINEL_HOURS as f32
        );
        assert_eq!(fv.get("amount_ratio_avg30").unwrap(), RATIO_SENTINEL as f32);
        assert_eq!(fv.get("amount_to_hist_max_ratio").unwrap(), 1.0);
        assert_eq!(fv.get("num_trans_last_7d").unwrap(), 0.0);
        assert_eq!(fv.get("days_since_first").unwrap(), 0.0);
        assert_eq!(fv.get("is_first_transaction").unwrap(), 1.0);
        assert_eq!(fv.get("is_amount_spike").unwrap(), 0.0);
        assert_eq!(fv.get("is_night_transaction").unwrap(), 1.0);
    }

    #[test]
    fn test_night_window_wraps_midnight_inclusive() {
        let ex = extractor();
        assert!(ex.is_night_hour(23));
        assert!(ex.is_night_hour(0));
        assert!(ex.is_night_hour(6));
        assert!(!ex.is_night_hour(7));
        assert!(!ex.is_night_hour(22));
    }

    #[test]
    fn test_windowed_stats_exclude_current_and_match_population_std() {
        let store = HistoryStore::new(Duration::days(60));
        for (day, amount) in [(10u32, 100.0), (11, 200.0), (12, 300.0)] {
            store
                .append(&Transaction::new(1, at(day, 12, 0), amount, "p2p"))
                .unwrap();
        }

        let tx = Transaction::new(1, at(13, 12, 0), 400.0, "p2p");
        let snap = store.snapshot(1, tx.timestamp).unwrap();
        let fv = extractor().extract(&tx, &snap);

        assert_eq!(fv.get("num_trans_last_7d").unwrap(), 3.0);
        assert_eq!(fv.get("sum_amount_last_7d").unwrap(), 600.0);
        assert_eq!(fv.get("avg_amount_last_7d").unwrap(), 200.0);
        assert_eq!(fv.get("max_amount_7d").unwrap(), 300.0);
        assert_eq!(fv.get("min_amount_7d").unwrap(), 100.0);

        // population std of [100, 200, 300]
        let expected_std = (20000.0f64 / 3.0).sqrt() as f32;
        assert!((fv.get("std_amount_7d").unwrap() - expected_std).abs() < 1e-3);

        assert_eq!(fv.get("amount_ratio_avg7").unwrap(), 2.0);
        assert_eq!(fv.get("time_since_last_hours").unwrap(), 24.0);
        assert_eq!(fv.get("days_since_first").unwrap(), 3.0);
    }

    #[test]
    fn test_velocity_and_acceleration() {
        let store = HistoryStore::new(Duration::days(60));
        // 3 transactions in the last 24h, 1 in the 24h before that
        store
            .append(&Transaction::new(1, at(11, 13, 0), 10.0, "a"))
            .unwrap();
        for hour in [14u32, 16, 18] {
            store
                .append(&Transaction::new(1, at(12, hour, 0), 10.0, "a"))
                .unwrap();
        }

        let tx = Transaction::new(1, at(13, 12, 0), 10.0, "a");
        let snap = store.snapshot(1, tx.timestamp).unwrap();
        let fv = extractor().extract(&tx, &snap);

        assert_eq!(fv.get("velocity_24h").unwrap(), 3.0);
        assert_eq!(fv.get("velocity_acceleration_24h").unwrap(), 2.0);

        let v7 = 4.0 / 7.0;
        let v30 = 4.0 / 30.0;
        assert!((fv.get("velocity_acceleration").unwrap() - (v7 - v30) as f32).abs() < 1e-6);
    }

    #[test]
    fn test_graph_features_track_directions() {
        let store = HistoryStore::new(Duration::days(60));
        store
            .append(&Transaction::new(1, at(10, 10, 0), 10.0, "a"))
            .unwrap();
        store
            .append(&Transaction::new(1, at(11, 10, 0), 10.0, "b"))
            .unwrap();
        store
            .append(&Transaction::new(1, at(12, 10, 0), 10.0, "a"))
            .unwrap();

        let tx = Transaction::new(1, at(13, 10, 0), 10.0, "a");
        let snap = store.snapshot(1, tx.timestamp).unwrap();
        let fv = extractor().extract(&tx, &snap);

        assert_eq!(fv.get("num_prev_trans_to_same").unwrap(), 2.0);
        assert_eq!(fv.get("unique_directions_count").unwrap(), 2.0);
        assert_eq!(fv.get("sender_out_degree").unwrap(), 2.0);
        assert_eq!(fv.get("is_new_direction").unwrap(), 0.0);

        let tx_new = Transaction::new(1, at(13, 10, 0), 10.0, "c");
        let fv_new = extractor().extract(&tx_new, &snap);
        assert_eq!(fv_new.get("is_new_direction").unwrap(), 1.0);
        assert_eq!(fv_new.get("num_prev_trans_to_same").unwrap(), 0.0);
    }

    #[test]
    fn test_amount_spike_flag() {
        let store = HistoryStore::new(Duration::days(60));
        for day in 1..=10u32 {
            store
                .append(&Transaction::new(1, at(day, 12, 0), 1000.0, "p2p"))
                .unwrap();
        }

        let tx = Transaction::new(1, at(11, 12, 0), 50000.0, "p2p");
        let snap = store.snapshot(1, tx.timestamp).unwrap();
        let fv = extractor().extract(&tx, &snap);

        assert_eq!(fv.get("is_amount_spike").unwrap(), 1.0);
        assert_eq!(fv.get("amount_ratio_avg30").unwrap(), 50.0);

        let small = Transaction::new(1, at(11, 12, 0), 1200.0, "p2p");
        let fv_small = extractor().extract(&small, &snap);
        assert_eq!(fv_small.get("is_amount_spike").unwrap(), 0.0);
    }

    #[test]
    fn test_direction_encoder_fallback() {
        let encoder = DirectionEncoder::from_classes(&[
            "p2p".to_string(),
            "card_transfer".to_string(),
        ]);
        assert_eq!(encoder.encode("card_transfer"), 1);
        assert_eq!(encoder.encode("never_seen"), 0);
    }
}
