//! Bounded rolling per-customer transaction history.
//!
//! Each customer's retained transactions live behind their own mutex inside
//! a sharded concurrent map, so requests for different customers never
//! contend while same-customer access is serialized. Sequences are kept
//! time-ordered and pruned lazily on access against the retention window;
//! aggregates are maintained by exact subtraction, not decay.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::error::EngineError;
use crate::types::Transaction;

/// A retained history entry.
#[derive(Debug, Clone)]
pub struct TxRecord {
    pub timestamp: DateTime<Utc>,
    pub amount: f64,
    pub direction: String,
}

/// Statistics over a trailing time window.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowStats {
    pub count: u32,
    pub sum: f64,
    pub mean: f64,
    /// Population standard deviation; 0 for fewer than two samples.
    pub std: f64,
    pub max: f64,
    pub min: f64,
}

fn window_stats_over<'a>(amounts: impl Iterator<Item = &'a f64>) -> WindowStats {
    let mut count = 0u32;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut max = f64::MIN;
    let mut min = f64::MAX;

    for &a in amounts {
        count += 1;
        sum += a;
        sum_sq += a * a;
        max = max.max(a);
        min = min.min(a);
    }

    if count == 0 {
        return WindowStats::default();
    }

    let mean = sum / count as f64;
    let std = if count > 1 {
        (sum_sq / count as f64 - mean * mean).max(0.0).sqrt()
    } else {
        0.0
    };

    WindowStats {
        count,
        sum,
        mean,
        std,
        max,
        min,
    }
}

/// Per-customer retained sequence plus running aggregates.
#[derive(Debug, Default)]
struct CustomerHistory {
    /// Time-ordered, oldest first.
    entries: VecDeque<TxRecord>,
    sum: f64,
    sum_sq: f64,
    max_amount: f64,
    /// Distinct counterparties this customer has sent to, with counts.
    direction_counts: HashMap<String, u32>,
}

impl CustomerHistory {
    /// Insert keeping time order; arrivals are usually newest-last so the
    /// scan from the back is O(1) in the common case.
    fn insert(&mut self, rec: TxRecord) {
        self.sum += rec.amount;
        self.sum_sq += rec.amount * rec.amount;
        if rec.amount > self.max_amount {
            self.max_amount = rec.amount;
        }
        *self
            .direction_counts
            .entry(rec.direction.clone())
            .or_insert(0) += 1;

        let mut idx = self.entries.len();
        while idx > 0 && self.entries[idx - 1].timestamp > rec.timestamp {
            idx -= 1;
        }
        if idx == self.entries.len() {
            self.entries.push_back(rec);
        } else {
            self.entries.insert(idx, rec);
        }
    }

    /// Drop entries older than the cutoff from the front, subtracting their
    /// contribution from the aggregates. The max is rescanned only when an
    /// evicted entry held it.
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        let mut max_evicted = false;
        while self
            .entries
            .front()
            .map_or(false, |r| r.timestamp < cutoff)
        {
            if let Some(rec) = self.entries.pop_front() {
                self.sum -= rec.amount;
                self.sum_sq -= rec.amount * rec.amount;
                if rec.amount >= self.max_amount {
                    max_evicted = true;
                }
                if let Some(c) = self.direction_counts.get_mut(&rec.direction) {
                    *c -= 1;
                    if *c == 0 {
                        self.direction_counts.remove(&rec.direction);
                    }
                }
            }
        }

        if self.entries.is_empty() {
            // reset to cancel float drift
            self.sum = 0.0;
            self.sum_sq = 0.0;
            self.max_amount = 0.0;
            self.direction_counts.clear();
        } else if max_evicted {
            self.max_amount = self.entries.iter().map(|r| r.amount).fold(0.0, f64::max);
        }
    }

    /// Read-only view of entries with timestamp <= as_of. Entries newer
    /// than as_of (out-of-order arrivals) are excluded exactly, from the
    /// aggregates too.
    fn snapshot(&self, as_of: DateTime<Utc>) -> HistorySnapshot {
        let cut = self
            .entries
            .iter()
            .rposition(|r| r.timestamp <= as_of)
            .map(|i| i + 1)
            .unwrap_or(0);

        let mut sum = self.sum;
        let mut sum_sq = self.sum_sq;
        let mut direction_counts = self.direction_counts.clone();
        let mut max_excluded = false;

        for rec in self.entries.iter().skip(cut) {
            sum -= rec.amount;
            sum_sq -= rec.amount * rec.amount;
            if rec.amount >= self.max_amount {
                max_excluded = true;
            }
            if let Some(c) = direction_counts.get_mut(&rec.direction) {
                *c -= 1;
                if *c == 0 {
                    direction_counts.remove(&rec.direction);
                }
            }
        }

        let entries: Vec<TxRecord> = self.entries.iter().take(cut).cloned().collect();
        let max_amount = if entries.is_empty() {
            0.0
        } else if max_excluded {
            entries.iter().map(|r| r.amount).fold(0.0, f64::max)
        } else {
            self.max_amount
        };

        HistorySnapshot {
            entries,
            sum: if cut == 0 { 0.0 } else { sum },
            sum_sq: if cut == 0 { 0.0 } else { sum_sq },
            max_amount,
            direction_counts,
        }
    }
}

/// Consistent read-only view of one customer's retained history, taken
/// under the customer lock and safe to use after it is released.
#[derive(Debug, Default)]
pub struct HistorySnapshot {
    entries: Vec<TxRecord>,
    sum: f64,
    sum_sq: f64,
    max_amount: f64,
    direction_counts: HashMap<String, u32>,
}

impl HistorySnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Earliest retained transaction time.
    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.first().map(|r| r.timestamp)
    }

    /// Latest retained transaction time.
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.entries.last().map(|r| r.timestamp)
    }

    /// Sum of all retained amounts.
    pub fn total_amount(&self) -> f64 {
        self.sum
    }

    /// Mean of all retained amounts; 0 when empty.
    pub fn mean_amount(&self) -> f64 {
        if self.entries.is_empty() {
            0.0
        } else {
            self.sum / self.entries.len() as f64
        }
    }

    /// Population standard deviation over all retained amounts.
    pub fn std_amount(&self) -> f64 {
        let n = self.entries.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.sum / n as f64;
        (self.sum_sq / n as f64 - mean * mean).max(0.0).sqrt()
    }

    /// Largest retained amount; 0 when empty.
    pub fn max_amount(&self) -> f64 {
        self.max_amount
    }

    /// Number of distinct directions among retained entries.
    pub fn out_degree(&self) -> usize {
        self.direction_counts.len()
    }

    /// Whether the customer has ever sent to this direction.
    pub fn has_direction(&self, direction: &str) -> bool {
        self.direction_counts.contains_key(direction)
    }

    /// Stats over entries strictly before `as_of` and within `span` of it.
    /// Bounded suffix scan over the time-ordered sequence.
    pub fn window_stats(&self, as_of: DateTime<Utc>, span: Duration) -> WindowStats {
        let cutoff = as_of - span;
        let amounts = self
            .entries
            .iter()
            .rev()
            .take_while(|r| r.timestamp >= cutoff)
            .filter(|r| r.timestamp < as_of)
            .map(|r| &r.amount);
        window_stats_over(amounts)
    }

    /// Count of entries with timestamp in the half-open range [start, end).
    pub fn count_in(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> u32 {
        self.entries
            .iter()
            .rev()
            .take_while(|r| r.timestamp >= start)
            .filter(|r| r.timestamp < end)
            .count() as u32
    }

    /// Count of entries strictly before `as_of`.
    pub fn prior_count(&self, as_of: DateTime<Utc>) -> u32 {
        self.entries.iter().filter(|r| r.timestamp < as_of).count() as u32
    }

    /// Count of entries strictly before `as_of` sent to `direction`.
    pub fn prior_count_to(&self, direction: &str, as_of: DateTime<Utc>) -> u32 {
        self.entries
            .iter()
            .filter(|r| r.timestamp < as_of && r.direction == direction)
            .count() as u32
    }

    /// Distinct directions among entries strictly before `as_of`.
    pub fn prior_unique_directions(&self, as_of: DateTime<Utc>) -> u32 {
        let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for r in self.entries.iter().filter(|r| r.timestamp < as_of) {
            seen.insert(r.direction.as_str());
        }
        seen.len() as u32
    }
}

/// Keyed store of per-customer rolling histories.
pub struct HistoryStore {
    customers: DashMap<i64, Arc<Mutex<CustomerHistory>>>,
    retention: Duration,
}

impl HistoryStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            customers: DashMap::new(),
            retention,
        }
    }

    /// Clone the customer slot out of the map so no shard lock is held
    /// while the customer mutex is taken.
    fn slot(&self, customer_id: i64) -> Option<Arc<Mutex<CustomerHistory>>> {
        self.customers.get(&customer_id).map(|r| r.value().clone())
    }

    fn slot_or_create(&self, customer_id: i64) -> Arc<Mutex<CustomerHistory>> {
        self.customers
            .entry(customer_id)
            .or_insert_with(|| Arc::new(Mutex::new(CustomerHistory::default())))
            .value()
            .clone()
    }

    /// Commit a transaction to its customer's history. Amortized O(1) plus
    /// the aggregate update; prunes expired entries on the way.
    pub fn append(&self, tx: &Transaction) -> Result<(), EngineError> {
        let slot = self.slot_or_create(tx.customer_id);
        let mut hist = slot
            .lock()
            .map_err(|e| EngineError::HistoryUnavailable(format!("customer lock poisoned: {e}")))?;

        hist.prune(tx.timestamp - self.retention);
        hist.insert(TxRecord {
            timestamp: tx.timestamp,
            amount: tx.amount,
            direction: tx.direction.clone(),
        });
        Ok(())
    }

    /// Read-only view of a customer's retained history as of `as_of`.
    /// Unknown customers get an empty snapshot, not an error.
    pub fn snapshot(
        &self,
        customer_id: i64,
        as_of: DateTime<Utc>,
    ) -> Result<HistorySnapshot, EngineError> {
        let Some(slot) = self.slot(customer_id) else {
            return Ok(HistorySnapshot::default());
        };
        let mut hist = slot
            .lock()
            .map_err(|e| EngineError::HistoryUnavailable(format!("customer lock poisoned: {e}")))?;

        hist.prune(as_of - self.retention);
        Ok(hist.snapshot(as_of))
    }

    fn window(
        &self,
        customer_id: i64,
        as_of: DateTime<Utc>,
        span: Duration,
    ) -> Result<WindowStats, EngineError> {
        let Some(slot) = self.slot(customer_id) else {
            return Ok(WindowStats::default());
        };
        let mut hist = slot
            .lock()
            .map_err(|e| EngineError::HistoryUnavailable(format!("customer lock poisoned: {e}")))?;

        hist.prune(as_of - self.retention);
        let cutoff = as_of - span;
        let amounts = hist
            .entries
            .iter()
            .rev()
            .take_while(|r| r.timestamp >= cutoff)
            .filter(|r| r.timestamp < as_of)
            .map(|r| &r.amount);
        Ok(window_stats_over(amounts))
    }

    /// Transactions within `span` of `as_of`, strictly before it.
    pub fn count_since(
        &self,
        customer_id: i64,
        as_of: DateTime<Utc>,
        span: Duration,
    ) -> Result<u32, EngineError> {
        Ok(self.window(customer_id, as_of, span)?.count)
    }

    /// Amount sum within `span` of `as_of`.
    pub fn sum_since(
        &self,
        customer_id: i64,
        as_of: DateTime<Utc>,
        span: Duration,
    ) -> Result<f64, EngineError> {
        Ok(self.window(customer_id, as_of, span)?.sum)
    }

    /// Population standard deviation of amounts within `span` of `as_of`.
    pub fn std_since(
        &self,
        customer_id: i64,
        as_of: DateTime<Utc>,
        span: Duration,
    ) -> Result<f64, EngineError> {
        Ok(self.window(customer_id, as_of, span)?.std)
    }

    /// Largest amount within `span` of `as_of`.
    pub fn max_since(
        &self,
        customer_id: i64,
        as_of: DateTime<Utc>,
        span: Duration,
    ) -> Result<f64, EngineError> {
        Ok(self.window(customer_id, as_of, span)?.max)
    }

    /// Opportunistic full sweep: prune every customer and drop the ones
    /// left with no retained transactions. Each customer is locked only
    /// for its own bounded prune.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        self.customers.retain(|_, slot| match slot.lock() {
            Ok(mut hist) => {
                hist.prune(cutoff);
                !hist.entries.is_empty()
            }
            // a poisoned customer is kept; reads will surface the error
            Err(_) => true,
        });
    }

    /// Customers with at least one retained transaction.
    pub fn customers_tracked(&self) -> usize {
        self.customers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn tx(customer: i64, t: DateTime<Utc>, amount: f64, dir: &str) -> Transaction {
        Transaction::new(customer, t, amount, dir)
    }

    #[test]
    fn test_append_then_count_roundtrip() {
        let store = HistoryStore::new(Duration::days(60));
        for day in 1..=5 {
            store.append(&tx(1, ts(day, 10), 100.0, "p2p")).unwrap();
        }

        let now = ts(5, 12);
        assert_eq!(store.count_since(1, now, Duration::days(30)).unwrap(), 5);
        assert_eq!(store.count_since(1, now, Duration::days(2)).unwrap(), 2);
        assert_eq!(
            store.sum_since(1, now, Duration::days(30)).unwrap(),
            500.0
        );
    }

    #[test]
    fn test_unknown_customer_is_empty_not_error() {
        let store = HistoryStore::new(Duration::days(60));
        let snap = store.snapshot(42, ts(1, 0)).unwrap();
        assert!(snap.is_empty());
        assert_eq!(store.count_since(42, ts(1, 0), Duration::days(7)).unwrap(), 0);
    }

    #[test]
    fn test_eviction_matches_recomputation() {
        let store = HistoryStore::new(Duration::days(10));
        store.append(&tx(1, ts(1, 0), 500.0, "a")).unwrap();
        store.append(&tx(1, ts(2, 0), 300.0, "b")).unwrap();
        store.append(&tx(1, ts(14, 0), 100.0, "a")).unwrap();
        store.append(&tx(1, ts(15, 0), 200.0, "a")).unwrap();

        // day 1 and 2 are now outside the 10-day retention window
        let snap = store.snapshot(1, ts(16, 0)).unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.total_amount(), 300.0);
        assert_eq!(snap.max_amount(), 200.0);
        assert_eq!(snap.out_degree(), 1);
        assert!(!snap.has_direction("b"));

        // aggregates match a from-scratch recomputation over the survivors
        let amounts = [100.0, 200.0];
        let mean: f64 = amounts.iter().sum::<f64>() / 2.0;
        assert!((snap.mean_amount() - mean).abs() < 1e-9);
        let var = amounts.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / 2.0;
        assert!((snap.std_amount() - var.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_full_expiry_removes_everything() {
        let store = HistoryStore::new(Duration::days(10));
        store.append(&tx(1, ts(1, 0), 500.0, "a")).unwrap();

        let snap = store.snapshot(1, ts(25, 0)).unwrap();
        assert!(snap.is_empty());
        assert_eq!(snap.total_amount(), 0.0);
        assert_eq!(snap.max_amount(), 0.0);
    }

    #[test]
    fn test_sweep_drops_idle_customers() {
        let store = HistoryStore::new(Duration::days(10));
        store.append(&tx(1, ts(1, 0), 10.0, "a")).unwrap();
        store.append(&tx(2, ts(15, 0), 10.0, "a")).unwrap();
        assert_eq!(store.customers_tracked(), 2);

        store.sweep(ts(16, 0));
        assert_eq!(store.customers_tracked(), 1);
    }

    #[test]
    fn test_out_of_order_appends_stay_time_ordered() {
        let store = HistoryStore::new(Duration::days(60));
        store.append(&tx(1, ts(3, 0), 30.0, "a")).unwrap();
        store.append(&tx(1, ts(1, 0), 10.0, "a")).unwrap();
        store.append(&tx(1, ts(2, 0), 20.0, "a")).unwrap();

        let snap = store.snapshot(1, ts(4, 0)).unwrap();
        assert_eq!(snap.first_timestamp(), Some(ts(1, 0)));
        assert_eq!(snap.last_timestamp(), Some(ts(3, 0)));
        // suffix window scan still sees a correctly ordered sequence
        assert_eq!(snap.count_in(ts(1, 12), ts(3, 12)), 2);
    }

    #[test]
    fn test_snapshot_excludes_entries_after_as_of() {
        let store = HistoryStore::new(Duration::days(60));
        store.append(&tx(1, ts(1, 0), 10.0, "a")).unwrap();
        store.append(&tx(1, ts(5, 0), 999.0, "b")).unwrap();

        let snap = store.snapshot(1, ts(3, 0)).unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.total_amount(), 10.0);
        assert_eq!(snap.max_amount(), 10.0);
        assert!(!snap.has_direction("b"));
    }

    #[test]
    fn test_concurrent_appends_same_customer_lose_nothing() {
        let store = Arc::new(HistoryStore::new(Duration::days(60)));
        let n = 64;

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .append(&tx(7, ts(10, 0) + Duration::seconds(i), 1.0, "p2p"))
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = store.snapshot(7, ts(11, 0)).unwrap();
        assert_eq!(snap.len(), n as usize);
        assert_eq!(snap.total_amount(), n as f64);
        // appends are serialized per customer: sequence stays time-ordered
        assert_eq!(snap.count_in(ts(10, 0), ts(10, 0) + Duration::seconds(n)), n as u32);
    }

    #[test]
    fn test_window_stats_strictly_before_as_of() {
        let store = HistoryStore::new(Duration::days(60));
        store.append(&tx(1, ts(2, 0), 100.0, "a")).unwrap();
        let stats = store.window(1, ts(2, 0), Duration::days(7)).unwrap();
        assert_eq!(stats.count, 0);
    }
}
