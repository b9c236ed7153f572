use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use reqwest::Client;
use tokio::time::{Instant, sleep};
use tracing::trace;

use crate::error::Result;
use crate::response::Response;
use crate::stats::{LocalStats, Stats};

const NON_2XX_3XX: &str = "Non 2xx and non 3xx status code";

/// A named assertion evaluated against a response.
pub struct Check<'a> {
    name: &'a str,
    predicate: Box<dyn Fn(&Response) -> bool + Send + 'a>,
}

impl<'a> Check<'a> {
    pub fn new<F>(name: &'a str, predicate: F) -> Self
    where
        F: Fn(&Response) -> bool + Send + 'a,
    {
        Self {
            name,
            predicate: Box::new(predicate),
        }
    }
}

/// Handle a scenario uses to issue requests and record samples for one VU.
pub struct VuContext {
    vu_id: u64,
    client: Client,
    base_url: Arc<str>,
    stats: Arc<Stats>,
    local: Mutex<LocalStats>,
}

impl VuContext {
    pub fn new(client: Client, base_url: Arc<str>, stats: Arc<Stats>, vu_id: u64) -> Result<Self> {
        Ok(Self {
            vu_id,
            client,
            base_url,
            stats,
            local: Mutex::new(LocalStats::new()?),
        })
    }

    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Absolute URLs pass through; anything else is appended to the base URL.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    pub async fn get(&self, path: &str) -> Response {
        let url = self.url(path);
        trace!(vu = self.vu_id, %url, "GET");
        let start = Instant::now();
        let resp = self.client.get(&url).send().await;
        self.process_response(resp, start).await
    }

    /// Evaluates every check (no short-circuit), records each outcome under
    /// its name and returns whether all of them passed.
    pub fn check<'a>(&self, response: &Response, checks: impl IntoIterator<Item = Check<'a>>) -> bool {
        let outcomes: Vec<(&str, bool)> = checks
            .into_iter()
            .map(|c| (c.name, (c.predicate)(response)))
            .collect();

        let mut local = self.local();
        for (name, passed) in &outcomes {
            local.checks.entry((*name).to_string()).or_default().add(*passed);
        }
        outcomes.iter().all(|(_, passed)| *passed)
    }

    /// Bumps the numerator of a custom rate. The denominator is the number
    /// of iterations, counted by the runner.
    pub fn increment(&self, rate: &str) {
        *self.local().rates.entry(rate.to_string()).or_insert(0) += 1;
    }

    /// Suspends only this VU.
    pub async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            sleep(duration).await;
        }
    }

    pub(crate) fn record_iteration(&self, elapsed: Duration) {
        let mut local = self.local();
        local.iterations += 1;
        let _ = local.iteration_latency.record(elapsed.as_micros() as u64);
    }

    /// Closes an iteration for rate purposes, whether it succeeded or not.
    pub(crate) fn end_iteration(&self) {
        self.local().rate_samples += 1;
    }

    pub(crate) fn record_error(&self, error: String) {
        *self.local().errors.entry(error).or_insert(0) += 1;
    }

    pub fn flush_stats(&self) {
        let mut local = self.local();
        if !local.is_empty() {
            self.stats.merge(&local);
            local.clear();
        }
    }

    fn local(&self) -> MutexGuard<'_, LocalStats> {
        self.local.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn process_response(
        &self,
        resp: reqwest::Result<reqwest::Response>,
        start: Instant,
    ) -> Response {
        let response = match resp {
            Ok(r) => match Response::new(r, start).await {
                Ok(response) => response,
                Err(e) => Response::failed(format!("Response processing error: {}", e), start.elapsed()),
            },
            Err(e) if e.is_timeout() => Response::failed("Request timeout".to_owned(), start.elapsed()),
            Err(e) => Response::failed(format!("Request error: {}", e), start.elapsed()),
        };

        let mut local = self.local();
        local.requests += 1;
        local.bytes_received += response.total_size() as u64;
        let _ = local.latency.record(response.duration().as_micros() as u64);

        if response.is_failure() {
            local.failed_requests += 1;
            let key = response.error().unwrap_or(NON_2XX_3XX).to_owned();
            *local.errors.entry(key).or_insert(0) += 1;
        }
        drop(local);

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::{Aggregate, MetricSource};

    fn context(base_url: &str) -> VuContext {
        VuContext::new(
            Client::new(),
            Arc::from(base_url),
            Arc::new(Stats::new().unwrap()),
            1,
        )
        .unwrap()
    }

    #[test]
    fn builds_urls_from_base() {
        let ctx = context("http://example.test:9090");
        assert_eq!(ctx.url("/hello"), "http://example.test:9090/hello");
        assert_eq!(ctx.url("https://other.test/x"), "https://other.test/x");
    }

    #[test]
    fn records_every_check_in_a_group() {
        let ctx = context("http://localhost:8080");
        let response = Response::failed("Request error: refused".into(), Duration::ZERO);

        let ok = ctx.check(
            &response,
            [
                Check::new("status 0", |r| r.status() == 0),
                Check::new("status 200", |r| r.status() == 200),
                Check::new("has error", |r| r.error().is_some()),
            ],
        );
        assert!(!ok);

        ctx.flush_stats();
        let snap = ctx.stats().snapshot(Duration::ZERO, Duration::ZERO);
        assert_eq!(snap.checks.len(), 3);
        assert_eq!(snap.checks["status 0"].passes, 1);
        assert_eq!(snap.checks["status 200"].fails, 1);
        assert_eq!(snap.checks["has error"].passes, 1);
    }

    #[test]
    fn rate_denominator_counts_iterations() {
        let ctx = context("http://localhost:8080");
        ctx.stats().register_rate("errors");

        ctx.increment("errors");
        ctx.end_iteration();
        ctx.flush_stats();
        for _ in 0..3 {
            ctx.end_iteration();
            ctx.flush_stats();
        }
        ctx.record_error("boom".into());
        ctx.flush_stats();

        let snap = ctx.stats().snapshot(Duration::ZERO, Duration::ZERO);
        assert_eq!(snap.rates["errors"].hits, 1);
        assert_eq!(snap.rates["errors"].iterations, 4);
        assert_eq!(snap.metric_value("errors", Aggregate::Rate), Some(0.25));
        assert_eq!(snap.errors["boom"], 1);
    }
}
