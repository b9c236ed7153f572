use std::fmt;

use serde::Serialize;

pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const ITERATIONS: &str = "iterations";
pub const DATA_RECEIVED: &str = "data_received";
pub const CHECKS: &str = "checks";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Distribution of durations, reported in milliseconds.
    Trend,
    /// Share of true samples.
    Rate,
    /// Monotonic total.
    Counter,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Trend => write!(f, "trend"),
            MetricKind::Rate => write!(f, "rate"),
            MetricKind::Counter => write!(f, "counter"),
        }
    }
}

pub fn builtin_kind(metric: &str) -> Option<MetricKind> {
    match metric {
        HTTP_REQ_DURATION | ITERATION_DURATION => Some(MetricKind::Trend),
        HTTP_REQ_FAILED | CHECKS => Some(MetricKind::Rate),
        HTTP_REQS | ITERATIONS | DATA_RECEIVED => Some(MetricKind::Counter),
        _ => None,
    }
}

/// Passing and failing sample counts behind a rate metric or a named check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateCounts {
    pub passes: u64,
    pub fails: u64,
}

impl RateCounts {
    pub fn add(&mut self, value: bool) {
        if value {
            self.passes += 1;
        } else {
            self.fails += 1;
        }
    }

    pub fn merge(&mut self, other: RateCounts) {
        self.passes += other.passes;
        self.fails += other.fails;
    }

    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }

    /// Share of true samples; zero when nothing was recorded.
    pub fn rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.passes as f64 / total as f64,
        }
    }
}

/// Custom rate whose numerator is bumped by the scenario and whose
/// denominator grows by one per iteration, whatever its outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IterationRate {
    pub hits: u64,
    pub iterations: u64,
}

impl IterationRate {
    pub fn merge(&mut self, hits: u64, iterations: u64) {
        self.hits += hits;
        self.iterations += iterations;
    }

    /// `hits / iterations`; zero before the first iteration.
    pub fn rate(&self) -> f64 {
        match self.iterations {
            0 => 0.0,
            n => self.hits as f64 / n as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_counts() {
        let mut counts = RateCounts::default();
        assert_eq!(counts.rate(), 0.0);

        counts.add(true);
        counts.add(false);
        counts.add(false);
        counts.add(false);
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.rate(), 0.25);

        counts.merge(RateCounts { passes: 1, fails: 1 });
        assert_eq!(counts, RateCounts { passes: 2, fails: 4 });
    }

    #[test]
    fn iteration_rate_divides_by_iterations() {
        let mut errors = IterationRate::default();
        assert_eq!(errors.rate(), 0.0);

        errors.merge(1, 4);
        errors.merge(0, 6);
        assert_eq!(errors, IterationRate { hits: 1, iterations: 10 });
        assert_eq!(errors.rate(), 0.1);
    }

    #[test]
    fn builtin_kinds() {
        assert_eq!(builtin_kind("http_req_duration"), Some(MetricKind::Trend));
        assert_eq!(builtin_kind("checks"), Some(MetricKind::Rate));
        assert_eq!(builtin_kind("data_received"), Some(MetricKind::Counter));
        assert_eq!(builtin_kind("errors"), None);
    }
}
