//! Request orchestration: fetch history, extract, score, aggregate,
//! explain, commit.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error};

use crate::alerts::AlertGenerator;
use crate::config::AppConfig;
use crate::error::EngineError;
use crate::features::{DirectionEncoder, FeatureExtractor};
use crate::history::HistoryStore;
use crate::models::{ModelEnsemble, ScoreAggregator};
use crate::types::{ScoreResult, Transaction};

/// Request pipeline stage, for instrumentation.
#[derive(Debug, Clone, Copy)]
enum Stage {
    Fetching,
    Extracting,
    Scoring,
    Aggregating,
    Explaining,
    Committing,
}

/// Engine-level statistics.
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub customers_tracked: usize,
    pub customer_locks_tracked: usize,
    pub model_count: usize,
    pub classifier_names: Vec<String>,
    pub decision_threshold: f64,
}

/// Real-time scoring engine.
///
/// Requests for the same customer are serialized end-to-end (snapshot
/// through commit) via a per-customer lock, so `time_since_last` and the
/// velocity features always see a consistent history. Different customers
/// proceed fully in parallel. The scored transaction is committed only
/// after its result is computed and thus never influences its own
/// features.
pub struct ScoringEngine {
    store: HistoryStore,
    extractor: FeatureExtractor,
    ensemble: ModelEnsemble,
    aggregator: ScoreAggregator,
    alert_generator: AlertGenerator,
    decision_threshold: f64,
    request_locks: DashMap<i64, Arc<Mutex<()>>>,
    /// Forces `commit` to fail, exercising the degraded-result path.
    #[cfg(test)]
    fail_commits: std::sync::atomic::AtomicBool,
}

impl ScoringEngine {
    /// Build the engine, validating configuration and the artifact feature
    /// schema. Both failure modes are fatal at startup, never at request
    /// time.
    pub fn new(
        config: &AppConfig,
        ensemble: ModelEnsemble,
        encoder: DirectionEncoder,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        ensemble.validate_schema()?;

        Ok(Self {
            store: HistoryStore::new(chrono::Duration::days(config.history.retention_days)),
            extractor: FeatureExtractor::new(&config.history, &config.alerts, encoder),
            aggregator: ScoreAggregator::new(config.models.weights.clone(), &config.detection),
            alert_generator: AlertGenerator::new(&config.alerts, &config.detection),
            decision_threshold: config.detection.threshold,
            ensemble,
            request_locks: DashMap::new(),
            #[cfg(test)]
            fail_commits: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn commit(&self, tx: &Transaction) -> Result<(), EngineError> {
        #[cfg(test)]
        if self.fail_commits.load(std::sync::atomic::Ordering::Relaxed) {
            return Err(EngineError::HistoryUnavailable(
                "commit failure injected".to_string(),
            ));
        }
        self.store.append(tx)
    }

    fn customer_lock(&self, customer_id: i64) -> Arc<Mutex<()>> {
        self.request_locks
            .entry(customer_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Score a single transaction.
    pub fn score_one(&self, tx: &Transaction) -> Result<ScoreResult, EngineError> {
        let started = Instant::now();
        tx.validate()?;

        // serialize same-customer requests from snapshot through commit
        let lock = self.customer_lock(tx.customer_id);
        let _guard = lock
            .lock()
            .map_err(|e| EngineError::HistoryUnavailable(format!("request lock poisoned: {e}")))?;

        debug!(transaction_id = %tx.transaction_id, stage = ?Stage::Fetching);
        let snapshot = self.store.snapshot(tx.customer_id, tx.timestamp)?;

        debug!(transaction_id = %tx.transaction_id, stage = ?Stage::Extracting);
        let features = self.extractor.extract(tx, &snapshot);

        debug!(transaction_id = %tx.transaction_id, stage = ?Stage::Scoring);
        let ensemble_output = self.ensemble.score(features.as_slice());

        debug!(transaction_id = %tx.transaction_id, stage = ?Stage::Aggregating);
        let probability = self.aggregator.aggregate(&ensemble_output)?;
        let risk_level = self.aggregator.tier(probability);

        debug!(transaction_id = %tx.transaction_id, stage = ?Stage::Explaining);
        let alerts =
            self.alert_generator
                .generate(&features, probability, ensemble_output.anomaly_score);

        // Commit is the point of no return and best-effort: the caller
        // still gets the computed result when the append fails, with the
        // degraded-state flag set for downstream reconciliation.
        debug!(transaction_id = %tx.transaction_id, stage = ?Stage::Committing);
        let history_updated = match self.commit(tx) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    transaction_id = %tx.transaction_id,
                    customer_id = tx.customer_id,
                    error = %e,
                    "History commit failed, returning result without history update"
                );
                false
            }
        };

        Ok(ScoreResult {
            transaction_id: tx.transaction_id.clone(),
            customer_id: tx.customer_id,
            is_fraud: probability >= self.decision_threshold,
            fraud_probability: probability,
            risk_level,
            model_scores: ensemble_output.classifier_scores,
            anomaly_score: ensemble_output.anomaly_score,
            alerts,
            skipped_models: ensemble_output.skipped,
            history_updated,
            threshold_used: self.decision_threshold,
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            timestamp: Utc::now(),
        })
    }

    /// Lazily score a batch: one result per input, in input order.
    pub fn score_many<'a, I>(
        &'a self,
        transactions: I,
    ) -> impl Iterator<Item = Result<ScoreResult, EngineError>> + 'a
    where
        I: IntoIterator<Item = Transaction>,
        I::IntoIter: 'a,
    {
        transactions.into_iter().map(move |tx| self.score_one(&tx))
    }

    /// Prune expired history for every customer and drop request locks no
    /// in-flight request holds; `customer_lock` recreates them on demand.
    /// The shard lock taken by `retain` excludes concurrent clones, so a
    /// strong count of 1 means the map holds the only reference.
    pub fn sweep(&self, now: chrono::DateTime<Utc>) {
        self.store.sweep(now);
        self.request_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            customers_tracked: self.store.customers_tracked(),
            customer_locks_tracked: self.request_locks.len(),
            model_count: self.ensemble.model_count(),
            classifier_names: self.ensemble.classifier_names(),
            decision_threshold: self.decision_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_NAMES;
    use chrono::TimeZone;
    use std::sync::atomic::Ordering;

    struct Fixed(f64);

    impl crate::models::Scorer for Fixed {
        fn name(&self) -> &str {
            "catboost"
        }
        fn score(&self, _features: &[f32]) -> anyhow::Result<f64> {
            Ok(self.0)
        }
    }

    fn engine() -> ScoringEngine {
        let schema = FEATURE_NAMES.iter().map(|s| s.to_string()).collect();
        let ensemble = ModelEnsemble::new(vec![Box::new(Fixed(0.2))], None, schema);
        ScoringEngine::new(&AppConfig::default(), ensemble, DirectionEncoder::default()).unwrap()
    }

    fn at(day: u32, hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_commit_failure_returns_degraded_result() {
        let engine = engine();
        engine.fail_commits.store(true, Ordering::Relaxed);

        let tx = Transaction::new(1, at(10, 12), 100.0, "p2p");
        let result = engine.score_one(&tx).unwrap();
        assert!(!result.history_updated);
        assert!(result.fraud_probability > 0.0);
        assert_eq!(engine.stats().customers_tracked, 0);

        // a healthy store commits again and the flag clears
        engine.fail_commits.store(false, Ordering::Relaxed);
        let result = engine.score_one(&tx).unwrap();
        assert!(result.history_updated);
        assert_eq!(engine.stats().customers_tracked, 1);
    }
}
