use crate::config::ScenarioConfig;
use crate::context::VuContext;
use crate::error::*;
use crate::scenario::Scenario;
use crate::stages::LoadProfile;
use crate::stats::{Stats, StatsSnapshot};
use crate::summary::RunSummary;
use crate::thresholds::ThresholdSet;
use reqwest::Client;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{Duration, Instant, sleep_until, timeout_at};
use tracing::{debug, error, info, warn};

const SCHEDULER_TICK: Duration = Duration::from_millis(100);
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub base_url: String,
    pub profile: LoadProfile,
    pub thresholds: ThresholdSet,
    /// How long in-flight iterations may run past the end of the schedule.
    pub graceful_stop: Duration,
    pub request_timeout: Duration,
}

impl RunConfig {
    pub fn from_config(config: &ScenarioConfig, base_url_override: Option<&str>) -> Result<Self> {
        Ok(Self {
            base_url: config.resolve_base_url(base_url_override),
            profile: config.load_profile()?,
            thresholds: config.thresholds.clone(),
            graceful_stop: config.graceful_stop,
            request_timeout: config.request_timeout,
        })
    }
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        // One connection per VU: single idle slot and no cross-VU pooling
        .pool_max_idle_per_host(1)
        .http1_only()
        .tcp_nodelay(true)
        .no_proxy()
        .timeout(timeout)
        .build()
        .map_err(Error::from)
}

/// Decrements the running VU gauge even when the task is aborted.
struct VuGuard(Arc<Stats>);

impl VuGuard {
    fn new(stats: Arc<Stats>) -> Self {
        stats.vu_started();
        Self(stats)
    }
}

impl Drop for VuGuard {
    fn drop(&mut self) {
        self.0.vu_stopped();
    }
}

fn prepare_stats(config: &RunConfig, scenario: &dyn Scenario) -> Result<Arc<Stats>> {
    let stats = Stats::new()?;
    for rate in scenario.rates() {
        stats.register_rate(rate);
    }
    config
        .thresholds
        .validate(&stats.snapshot(Duration::ZERO, Duration::ZERO))?;
    Ok(Arc::new(stats))
}

fn finish(config: &RunConfig, scenario: &dyn Scenario, snapshot: StatsSnapshot) -> RunSummary {
    let thresholds = config.thresholds.evaluate(&snapshot);
    for failed in thresholds.iter().filter(|t| !t.passed) {
        warn!(metric = %failed.metric, expression = %failed.expression, observed = ?failed.observed, "threshold crossed");
    }
    RunSummary {
        scenario: scenario.name().to_string(),
        base_url: config.base_url.clone(),
        stats: snapshot,
        thresholds,
    }
}

fn log_join(res: std::result::Result<(), JoinError>) {
    if let Err(e) = res {
        if !e.is_cancelled() {
            error!("VU task failed: {}", e);
        }
    }
}

/// Runs the staged load profile, then evaluates thresholds.
pub async fn run_scenario<F>(
    config: RunConfig,
    scenario: Arc<dyn Scenario>,
    mut on_progress: Option<F>,
) -> Result<RunSummary>
where
    F: FnMut(StatsSnapshot) + Send + 'static,
{
    let stats = prepare_stats(&config, scenario.as_ref())?;
    let base_url: Arc<str> = Arc::from(config.base_url.as_str());
    let duration = config.profile.total_duration();

    info!(
        scenario = scenario.name(),
        base_url = %base_url,
        duration_secs = duration.as_secs_f64(),
        max_vus = config.profile.max_vus(),
        "starting run"
    );

    let mut set = JoinSet::new();
    let mut active: Vec<Arc<AtomicBool>> = Vec::new();
    let mut next_vu_id = 1;

    let start_time = Instant::now();
    let end_time = start_time + duration;
    let mut last_progress = start_time;

    // Main loop
    while Instant::now() < end_time {
        let target = config.profile.target_at(start_time.elapsed()) as usize;

        if active.len() < target {
            for _ in active.len()..target {
                let stop = Arc::new(AtomicBool::new(false));
                let client = build_client(config.request_timeout)?;
                let ctx = VuContext::new(client, base_url.clone(), stats.clone(), next_vu_id)?;
                next_vu_id += 1;

                set.spawn(run_vu(ctx, scenario.clone(), stop.clone()));
                active.push(stop);
            }
            debug!(vus = active.len(), "ramped up");
        } else if active.len() > target {
            // Most recently started VUs leave first, after their current iteration.
            for stop in active.drain(target..) {
                stop.store(true, Ordering::Relaxed);
            }
            debug!(vus = active.len(), "ramped down");
        }

        while let Some(res) = set.try_join_next() {
            log_join(res);
        }

        if let Some(ref mut cb) = on_progress {
            if last_progress.elapsed() >= PROGRESS_INTERVAL {
                last_progress = Instant::now();
                cb(stats.snapshot(duration, start_time.elapsed()));
            }
        }

        sleep_until((Instant::now() + SCHEDULER_TICK).min(end_time)).await;
    }

    for stop in active.drain(..) {
        stop.store(true, Ordering::Relaxed);
    }

    let graceful_deadline = Instant::now() + config.graceful_stop;
    loop {
        match timeout_at(graceful_deadline, set.join_next()).await {
            Ok(Some(res)) => log_join(res),
            Ok(None) => break,
            Err(_) => {
                let interrupted = set.len() as u64;
                warn!(interrupted, "graceful stop elapsed, aborting in-flight iterations");
                stats.record_interrupted(interrupted);
                set.abort_all();
                while let Some(res) = set.join_next().await {
                    log_join(res);
                }
                break;
            }
        }
    }

    let snapshot = stats.snapshot(duration, start_time.elapsed());
    if let Some(ref mut cb) = on_progress {
        cb(snapshot.clone());
    }

    info!(
        iterations = snapshot.iterations,
        requests = snapshot.total_requests,
        "run finished"
    );
    Ok(finish(&config, scenario.as_ref(), snapshot))
}

/// One VU, one iteration. Useful to smoke test a target before a full run.
pub async fn run_once(config: RunConfig, scenario: Arc<dyn Scenario>) -> Result<RunSummary> {
    let stats = prepare_stats(&config, scenario.as_ref())?;
    let start = Instant::now();

    let client = build_client(config.request_timeout)?;
    let ctx = VuContext::new(client, Arc::from(config.base_url.as_str()), stats.clone(), 1)?;

    {
        let _guard = VuGuard::new(stats.clone());
        run_iteration(&ctx, scenario.as_ref()).await;
    }

    let elapsed = start.elapsed();
    Ok(finish(&config, scenario.as_ref(), stats.snapshot(elapsed, elapsed)))
}

async fn run_vu(ctx: VuContext, scenario: Arc<dyn Scenario>, stop: Arc<AtomicBool>) {
    let _guard = VuGuard::new(ctx.stats().clone());
    debug!(vu = ctx.vu_id(), "VU started");

    while !stop.load(Ordering::Relaxed) {
        run_iteration(&ctx, scenario.as_ref()).await;
    }

    debug!(vu = ctx.vu_id(), "VU stopped");
}

async fn run_iteration(ctx: &VuContext, scenario: &dyn Scenario) {
    let started = Instant::now();
    match scenario.iteration(ctx).await {
        Ok(()) => ctx.record_iteration(started.elapsed()),
        Err(e) => {
            debug!(vu = ctx.vu_id(), error = %e, "iteration failed");
            ctx.record_error(e.to_string());
        }
    }
    ctx.end_iteration();
    ctx.flush_stats();
}
