//! Metrics for the dispatch engine
//!
//! Lock-free counters read by `GET /api/v1/dispatch/stats`.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero
    pub fn decrement(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Latency summary in microseconds
#[derive(Debug)]
pub struct Histogram {
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    pub fn record(&self, value_us: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value_us, Ordering::Relaxed);
        self.min.fetch_min(value_us, Ordering::Relaxed);
        self.max.fetch_max(value_us, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> HistogramStats {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);

        HistogramStats {
            count,
            sum_us: sum,
            avg_us: if count > 0 { sum / count } else { 0 },
            min_us: if count > 0 { self.min.load(Ordering::Relaxed) } else { 0 },
            max_us: self.max.load(Ordering::Relaxed),
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistogramStats {
    pub count: u64,
    pub sum_us: u64,
    pub avg_us: u64,
    pub min_us: u64,
    pub max_us: u64,
}

/// Counters for the matching pipeline
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    pub ride_requests: Counter,
    pub offers_sent: Counter,
    pub offers_skipped: Counter,
    pub rides_matched: Counter,
    pub rides_expired: Counter,
    pub rides_no_drivers: Counter,
    pub rejections: Counter,
    pub lost_races: Counter,
    pub status_conflicts: Counter,
    pub locations_accepted: Counter,
    pub locations_throttled: Counter,
    pub pending_rides: Gauge,
    pub match_latency: Histogram,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_match_latency(&self, elapsed: Duration) {
        self.match_latency
            .record(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX));
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ride_requests: self.ride_requests.get(),
            offers_sent: self.offers_sent.get(),
            offers_skipped: self.offers_skipped.get(),
            rides_matched: self.rides_matched.get(),
            rides_expired: self.rides_expired.get(),
            rides_no_drivers: self.rides_no_drivers.get(),
            rejections: self.rejections.get(),
            lost_races: self.lost_races.get(),
            status_conflicts: self.status_conflicts.get(),
            locations_accepted: self.locations_accepted.get(),
            locations_throttled: self.locations_throttled.get(),
            pending_rides: self.pending_rides.get(),
            match_latency: self.match_latency.get_stats(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub ride_requests: u64,
    pub offers_sent: u64,
    pub offers_skipped: u64,
    pub rides_matched: u64,
    pub rides_expired: u64,
    pub rides_no_drivers: u64,
    pub rejections: u64,
    pub lost_races: u64,
    pub status_conflicts: u64,
    pub locations_accepted: u64,
    pub locations_throttled: u64,
    pub pending_rides: u64,
    pub match_latency: HistogramStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_stats() {
        let h = Histogram::new();
        assert_eq!(h.get_stats().min_us, 0);

        h.record(100);
        h.record(300);
        let stats = h.get_stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.avg_us, 200);
        assert_eq!(stats.min_us, 100);
        assert_eq!(stats.max_us, 300);
    }

    #[test]
    fn test_gauge_saturates() {
        let g = Gauge::new();
        g.decrement();
        assert_eq!(g.get(), 0);
        g.increment();
        g.increment();
        g.decrement();
        assert_eq!(g.get(), 1);
    }

    #[test]
    fn test_snapshot_reflects_counters() {
        let m = DispatchMetrics::new();
        m.ride_requests.increment();
        m.offers_sent.add(3);
        m.record_match_latency(Duration::from_millis(2));

        let snap = m.snapshot();
        assert_eq!(snap.ride_requests, 1);
        assert_eq!(snap.offers_sent, 3);
        assert_eq!(snap.match_latency.count, 1);
        assert_eq!(snap.match_latency.max_us, 2_000);
    }
}
