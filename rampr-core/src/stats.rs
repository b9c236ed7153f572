use dashmap::DashMap;
use hdrhistogram::Histogram;
use std::collections::{BTreeMap, HashMap};
use std::{
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::error::Result;
use crate::metrics::{self, IterationRate, MetricKind, RateCounts};
use crate::thresholds::{Aggregate, MetricSource};

const SIGNIFICANT_DIGITS: u8 = 3;

/// Samples buffered by a single VU between merges into [`Stats`].
#[derive(Debug)]
pub(crate) struct LocalStats {
    pub requests: u64,
    pub failed_requests: u64,
    pub bytes_received: u64,
    pub iterations: u64,
    /// Iterations ended, failed ones included; the denominator of every rate.
    pub rate_samples: u64,
    pub errors: HashMap<String, u64>,
    pub checks: HashMap<String, RateCounts>,
    /// Numerator hits per custom rate.
    pub rates: HashMap<String, u64>,
    pub latency: Histogram<u64>,
    pub iteration_latency: Histogram<u64>,
}

impl LocalStats {
    pub fn new() -> Result<Self> {
        Ok(Self {
            requests: 0,
            failed_requests: 0,
            bytes_received: 0,
            iterations: 0,
            rate_samples: 0,
            errors: HashMap::new(),
            checks: HashMap::new(),
            rates: HashMap::new(),
            latency: Histogram::new(SIGNIFICANT_DIGITS)?,
            iteration_latency: Histogram::new(SIGNIFICANT_DIGITS)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.requests == 0
            && self.iterations == 0
            && self.rate_samples == 0
            && self.errors.is_empty()
            && self.checks.is_empty()
            && self.rates.is_empty()
            && self.latency.is_empty()
            && self.iteration_latency.is_empty()
    }

    pub fn clear(&mut self) {
        self.requests = 0;
        self.failed_requests = 0;
        self.bytes_received = 0;
        self.iterations = 0;
        self.rate_samples = 0;
        self.errors.clear();
        self.checks.clear();
        self.rates.clear();
        self.latency.reset();
        self.iteration_latency.reset();
    }
}

/// Run-wide aggregate shared by every VU.
#[derive(Debug)]
pub struct Stats {
    pub vus: AtomicU64,
    pub vus_max: AtomicU64,
    pub total_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub total_bytes_received: AtomicU64,
    pub iterations: AtomicU64,
    pub interrupted_iterations: AtomicU64,
    pub errors_map: DashMap<String, u64>,
    pub checks: DashMap<String, RateCounts>,
    pub rates: DashMap<String, IterationRate>,
    pub latency_histogram: Mutex<Histogram<u64>>,
    pub iteration_histogram: Mutex<Histogram<u64>>,
}

impl Stats {
    pub fn new() -> Result<Self> {
        Ok(Self {
            vus: AtomicU64::new(0),
            vus_max: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            total_bytes_received: AtomicU64::new(0),
            iterations: AtomicU64::new(0),
            interrupted_iterations: AtomicU64::new(0),
            errors_map: DashMap::new(),
            checks: DashMap::new(),
            rates: DashMap::new(),
            latency_histogram: Mutex::new(Histogram::new(SIGNIFICANT_DIGITS)?),
            iteration_histogram: Mutex::new(Histogram::new(SIGNIFICANT_DIGITS)?),
        })
    }

    /// Makes a custom rate visible (with zero samples) before anything is recorded.
    pub fn register_rate(&self, name: &str) {
        self.rates.entry(name.to_string()).or_default();
    }

    pub fn vu_started(&self) {
        let running = self.vus.fetch_add(1, Ordering::Relaxed) + 1;
        self.vus_max.fetch_max(running, Ordering::Relaxed);
    }

    pub fn vu_stopped(&self) {
        self.vus.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, error: String) {
        *self.errors_map.entry(error).or_insert(0) += 1;
    }

    pub fn record_interrupted(&self, count: u64) {
        self.interrupted_iterations.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn merge(&self, local: &LocalStats) {
        self.total_requests.fetch_add(local.requests, Ordering::Relaxed);
        self.failed_requests.fetch_add(local.failed_requests, Ordering::Relaxed);
        self.total_bytes_received.fetch_add(local.bytes_received, Ordering::Relaxed);
        self.iterations.fetch_add(local.iterations, Ordering::Relaxed);

        for (k, v) in &local.errors {
            *self.errors_map.entry(k.clone()).or_insert(0) += v;
        }
        for (k, v) in &local.checks {
            self.checks.entry(k.clone()).or_default().merge(*v);
        }
        for k in local.rates.keys() {
            self.rates.entry(k.clone()).or_default();
        }
        for mut rate in self.rates.iter_mut() {
            let hits = local.rates.get(rate.key()).copied().unwrap_or(0);
            rate.value_mut().merge(hits, local.rate_samples);
        }

        {
            let mut h = self.latency_histogram.lock().unwrap_or_else(|e| e.into_inner());
            let _ = h.add(&local.latency);
        }
        {
            let mut h = self.iteration_histogram.lock().unwrap_or_else(|e| e.into_inner());
            let _ = h.add(&local.iteration_latency);
        }
    }

    pub fn snapshot(&self, duration: Duration, elapsed: Duration) -> StatsSnapshot {
        StatsSnapshot {
            duration,
            elapsed,
            vus: self.vus.load(Ordering::Relaxed),
            vus_max: self.vus_max.load(Ordering::Relaxed),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            total_bytes_received: self.total_bytes_received.load(Ordering::Relaxed),
            iterations: self.iterations.load(Ordering::Relaxed),
            interrupted_iterations: self.interrupted_iterations.load(Ordering::Relaxed),
            errors: self
                .errors_map
                .iter()
                .map(|r| (r.key().clone(), *r.value()))
                .collect(),
            checks: self
                .checks
                .iter()
                .map(|r| (r.key().clone(), *r.value()))
                .collect(),
            rates: self
                .rates
                .iter()
                .map(|r| (r.key().clone(), *r.value()))
                .collect(),
            latency_histogram: self
                .latency_histogram
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            iteration_histogram: self
                .iteration_histogram
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub duration: Duration,
    pub elapsed: Duration,
    pub vus: u64,
    pub vus_max: u64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub total_bytes_received: u64,
    pub iterations: u64,
    pub interrupted_iterations: u64,
    pub errors: HashMap<String, u64>,
    pub checks: BTreeMap<String, RateCounts>,
    pub rates: BTreeMap<String, IterationRate>,
    /// Request latency in microseconds.
    pub latency_histogram: Histogram<u64>,
    /// Iteration wall time in microseconds.
    pub iteration_histogram: Histogram<u64>,
}

impl StatsSnapshot {
    /// Passes and fails summed over every named check.
    pub fn checks_total(&self) -> RateCounts {
        self.checks.values().fold(RateCounts::default(), |mut acc, c| {
            acc.merge(*c);
            acc
        })
    }

    pub fn http_req_failed(&self) -> RateCounts {
        RateCounts {
            passes: self.failed_requests,
            fails: self.total_requests.saturating_sub(self.failed_requests),
        }
    }

    fn trend(&self, metric: &str) -> Option<&Histogram<u64>> {
        match metric {
            metrics::HTTP_REQ_DURATION => Some(&self.latency_histogram),
            metrics::ITERATION_DURATION => Some(&self.iteration_histogram),
            _ => None,
        }
    }

    fn counter(&self, metric: &str) -> Option<u64> {
        match metric {
            metrics::HTTP_REQS => Some(self.total_requests),
            metrics::ITERATIONS => Some(self.iterations),
            metrics::DATA_RECEIVED => Some(self.total_bytes_received),
            _ => None,
        }
    }

    fn rate(&self, metric: &str) -> Option<f64> {
        match metric {
            metrics::CHECKS => Some(self.checks_total().rate()),
            metrics::HTTP_REQ_FAILED => Some(self.http_req_failed().rate()),
            _ => self.rates.get(metric).map(IterationRate::rate),
        }
    }
}

/// Trend aggregate in milliseconds; `None` when no samples were recorded.
pub fn trend_value(h: &Histogram<u64>, aggregate: Aggregate) -> Option<f64> {
    if h.is_empty() {
        return None;
    }
    let micros = match aggregate {
        Aggregate::Avg => h.mean(),
        Aggregate::Min => h.min() as f64,
        Aggregate::Max => h.max() as f64,
        Aggregate::Med => h.value_at_quantile(0.5) as f64,
        Aggregate::Percentile(p) => h.value_at_quantile(p / 100.0) as f64,
        Aggregate::Rate | Aggregate::Count => return None,
    };
    Some(micros / 1000.0)
}

impl MetricSource for StatsSnapshot {
    fn metric_kind(&self, metric: &str) -> Option<MetricKind> {
        metrics::builtin_kind(metric)
            .or_else(|| self.rates.contains_key(metric).then_some(MetricKind::Rate))
    }

    fn metric_value(&self, metric: &str, aggregate: Aggregate) -> Option<f64> {
        if let Some(h) = self.trend(metric) {
            return trend_value(h, aggregate);
        }

        if let Some(total) = self.counter(metric) {
            return match aggregate {
                Aggregate::Count => Some(total as f64),
                Aggregate::Rate => {
                    let secs = self.elapsed.as_secs_f64();
                    Some(if secs > 0.0 { total as f64 / secs } else { 0.0 })
                }
                _ => None,
            };
        }

        match aggregate {
            Aggregate::Rate => self.rate(metric),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_with(latencies_ms: &[u64]) -> LocalStats {
        let mut local = LocalStats::new().unwrap();
        for ms in latencies_ms {
            local.requests += 1;
            local.latency.record(ms * 1000).unwrap();
        }
        local
    }

    #[test]
    fn merges_local_buffers() {
        let stats = Stats::new().unwrap();
        stats.register_rate("errors");

        let mut a = local_with(&[10, 20]);
        a.bytes_received = 100;
        a.failed_requests = 1;
        a.rate_samples = 2;
        a.checks.entry("status 200".into()).or_default().add(true);
        a.errors.insert("Request timeout".into(), 1);

        let mut b = local_with(&[30]);
        b.bytes_received = 50;
        b.rate_samples = 1;
        b.checks.entry("status 200".into()).or_default().add(false);
        b.rates.insert("errors".into(), 1);
        b.errors.insert("Request timeout".into(), 2);

        stats.merge(&a);
        stats.merge(&b);

        let snap = stats.snapshot(Duration::from_secs(10), Duration::from_secs(10));
        assert_eq!(snap.total_requests, 3);
        assert_eq!(snap.failed_requests, 1);
        assert_eq!(snap.total_bytes_received, 150);
        assert_eq!(snap.errors["Request timeout"], 3);
        assert_eq!(snap.checks["status 200"], RateCounts { passes: 1, fails: 1 });
        assert_eq!(snap.rates["errors"], IterationRate { hits: 1, iterations: 3 });
        assert_eq!(snap.latency_histogram.len(), 3);
    }

    #[test]
    fn clearing_local_buffer() {
        let mut local = local_with(&[5]);
        assert!(!local.is_empty());
        local.clear();
        assert!(local.is_empty());
    }

    #[test]
    fn tracks_peak_vus() {
        let stats = Stats::new().unwrap();
        stats.vu_started();
        stats.vu_started();
        stats.vu_stopped();
        stats.vu_started();
        stats.vu_stopped();
        let snap = stats.snapshot(Duration::ZERO, Duration::ZERO);
        assert_eq!(snap.vus, 1);
        assert_eq!(snap.vus_max, 2);
    }

    #[test]
    fn answers_metric_lookups() {
        let stats = Stats::new().unwrap();
        stats.register_rate("errors");
        let mut local = local_with(&[100, 200, 300, 400]);
        local.failed_requests = 1;
        local.checks.entry("a".into()).or_default().add(true);
        local.checks.entry("b".into()).or_default().add(true);
        local.checks.entry("b".into()).or_default().add(false);
        local.checks.entry("b".into()).or_default().add(true);
        stats.merge(&local);

        let snap = stats.snapshot(Duration::from_secs(2), Duration::from_secs(2));

        assert_eq!(snap.metric_kind("errors"), Some(MetricKind::Rate));
        assert_eq!(snap.metric_kind("unknown"), None);

        let max = snap.metric_value("http_req_duration", Aggregate::Max).unwrap();
        assert!((max - 400.0).abs() < 1.0, "max was {max}");
        let avg = snap.metric_value("http_req_duration", Aggregate::Avg).unwrap();
        assert!((avg - 250.0).abs() < 1.0, "avg was {avg}");

        assert_eq!(snap.metric_value("http_reqs", Aggregate::Count), Some(4.0));
        assert_eq!(snap.metric_value("http_reqs", Aggregate::Rate), Some(2.0));
        assert_eq!(snap.metric_value("http_req_failed", Aggregate::Rate), Some(0.25));
        assert_eq!(snap.metric_value("checks", Aggregate::Rate), Some(0.75));
        assert_eq!(snap.metric_value("errors", Aggregate::Rate), Some(0.0));
        assert_eq!(snap.metric_value("iteration_duration", Aggregate::Avg), None);
    }
}
