use std::collections::BTreeMap;

use hdrhistogram::Histogram;
use serde::Serialize;

use crate::metrics::RateCounts;
use crate::stats::{StatsSnapshot, trend_value};
use crate::thresholds::{Aggregate, ThresholdResult};

/// Final state of a run plus its threshold verdicts.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub scenario: String,
    pub base_url: String,
    pub stats: StatsSnapshot,
    pub thresholds: Vec<ThresholdResult>,
}

impl RunSummary {
    pub fn passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }

    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds.iter().filter(|t| !t.passed)
    }

    pub fn to_json(&self) -> JsonSummary {
        let s = &self.stats;
        JsonSummary {
            scenario: self.scenario.clone(),
            base_url: self.base_url.clone(),
            passed: self.passed(),
            elapsed_secs: s.elapsed.as_secs_f64(),
            vus_max: s.vus_max,
            iterations: s.iterations,
            interrupted_iterations: s.interrupted_iterations,
            http_reqs: s.total_requests,
            http_req_failed: s.http_req_failed().rate(),
            data_received: s.total_bytes_received,
            http_req_duration: TrendSummary::from_histogram(&s.latency_histogram),
            iteration_duration: TrendSummary::from_histogram(&s.iteration_histogram),
            checks: s
                .checks
                .iter()
                .map(|(name, counts)| CheckSummary {
                    name: name.clone(),
                    counts: *counts,
                })
                .collect(),
            rates: s.rates.iter().map(|(k, v)| (k.clone(), v.rate())).collect(),
            errors: s.errors.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            thresholds: self.thresholds.clone(),
        }
    }
}

/// Trend aggregates in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrendSummary {
    pub avg: f64,
    pub min: f64,
    pub med: f64,
    pub max: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl TrendSummary {
    pub fn from_histogram(h: &Histogram<u64>) -> Self {
        let v = |aggregate| trend_value(h, aggregate).unwrap_or(0.0);
        Self {
            avg: v(Aggregate::Avg),
            min: v(Aggregate::Min),
            med: v(Aggregate::Med),
            max: v(Aggregate::Max),
            p90: v(Aggregate::Percentile(90.0)),
            p95: v(Aggregate::Percentile(95.0)),
            p99: v(Aggregate::Percentile(99.0)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSummary {
    pub name: String,
    #[serde(flatten)]
    pub counts: RateCounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonSummary {
    pub scenario: String,
    pub base_url: String,
    pub passed: bool,
    pub elapsed_secs: f64,
    pub vus_max: u64,
    pub iterations: u64,
    pub interrupted_iterations: u64,
    pub http_reqs: u64,
    pub http_req_failed: f64,
    pub data_received: u64,
    pub http_req_duration: TrendSummary,
    pub iteration_duration: TrendSummary,
    pub checks: Vec<CheckSummary>,
    pub rates: BTreeMap<String, f64>,
    pub errors: BTreeMap<String, u64>,
    pub thresholds: Vec<ThresholdResult>,
}
