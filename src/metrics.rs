//! In-process performance metrics for the scoring pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector shared across worker tasks.
pub struct PipelineMetrics {
    /// Total transactions scored.
    pub transactions_scored: AtomicU64,
    /// Total transactions flagged as fraud.
    pub flagged: AtomicU64,
    /// Flagged transactions by risk tier.
    flagged_by_tier: RwLock<HashMap<String, u64>>,
    /// Request latencies in microseconds, bounded reservoir.
    latencies: RwLock<Vec<u64>>,
    /// Probability distribution buckets, 0.1 wide.
    probability_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

/// Latency summary over the retained reservoir.
#[derive(Debug, Default)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            transactions_scored: AtomicU64::new(0),
            flagged: AtomicU64::new(0),
            flagged_by_tier: RwLock::new(HashMap::new()),
            latencies: RwLock::new(Vec::with_capacity(1000)),
            probability_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record one scored transaction.
    pub fn record_scored(&self, latency: Duration, probability: f64) {
        self.transactions_scored.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut latencies) = self.latencies.write() {
            latencies.push(latency.as_micros() as u64);
            if latencies.len() > 10_000 {
                latencies.drain(0..5_000);
            }
        }

        let bucket = ((probability * 10.0) as usize).min(9);
        if let Ok(mut buckets) = self.probability_buckets.write() {
            buckets[bucket] += 1;
        }
    }

    /// Record a fraud-flagged transaction with its tier.
    pub fn record_flagged(&self, tier: &str) {
        self.flagged.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut by_tier) = self.flagged_by_tier.write() {
            *by_tier.entry(tier.to_string()).or_insert(0) += 1;
        }
    }

    pub fn latency_stats(&self) -> LatencyStats {
        let Ok(latencies) = self.latencies.read() else {
            return LatencyStats::default();
        };
        if latencies.is_empty() {
            return LatencyStats::default();
        }

        let mut sorted = latencies.clone();
        sorted.sort_unstable();
        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();

        LatencyStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[(count as f64 * 0.95) as usize],
            p99_us: sorted[(count as f64 * 0.99) as usize],
        }
    }

    /// Transactions per second since startup.
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.transactions_scored.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Log a summary of scoring activity so far.
    pub fn log_summary(&self) {
        let scored = self.transactions_scored.load(Ordering::Relaxed);
        let flagged = self.flagged.load(Ordering::Relaxed);
        let flag_rate = if scored > 0 {
            flagged as f64 / scored as f64 * 100.0
        } else {
            0.0
        };
        let latency = self.latency_stats();

        info!(
            scored,
            flagged,
            flag_rate = format!("{flag_rate:.1}%"),
            throughput = format!("{:.1} tx/s", self.throughput()),
            mean_latency_us = latency.mean_us,
            p95_latency_us = latency.p95_us,
            p99_latency_us = latency.p99_us,
            "Scoring metrics summary"
        );

        if let Ok(by_tier) = self.flagged_by_tier.read() {
            for (tier, count) in by_tier.iter() {
                info!(tier = %tier, count, "Flagged by risk tier");
            }
        }
        if let Ok(buckets) = self.probability_buckets.read() {
            info!(distribution = ?*buckets, "Probability distribution (0.1 buckets)");
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically logs metrics summaries.
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        loop {
            interval.tick().await;
            self.metrics.log_summary();
        }
    }
}
