use std::fmt::Write;

use console::style;
use humanize_bytes::humanize_bytes_binary;
use rampr_core::RunSummary;
use rampr_core::metrics::{IterationRate, RateCounts};
use rampr_core::summary::TrendSummary;

const LABEL_WIDTH: usize = 24;

pub fn fmt_time(micros: f64) -> String {
    if micros >= 1_000_000.0 {
        format!("{:.2}s", micros / 1_000_000.0)
    } else if micros >= 1_000.0 {
        format!("{:.2}ms", micros / 1_000.0)
    } else {
        format!("{:.2}us", micros)
    }
}

fn label(name: &str) -> String {
    format!("{:.<width$}:", name, width = LABEL_WIDTH)
}

fn trend_line(t: &TrendSummary) -> String {
    let ms = |v: f64| fmt_time(v * 1000.0);
    format!(
        "avg={} min={} med={} max={} p(90)={} p(95)={} p(99)={}",
        ms(t.avg),
        ms(t.min),
        ms(t.med),
        ms(t.max),
        ms(t.p90),
        ms(t.p95),
        ms(t.p99)
    )
}

fn rate_line(counts: &RateCounts) -> String {
    format!(
        "{:.2}% {} {} {} {}",
        counts.rate() * 100.0,
        style("✓").green(),
        counts.passes,
        style("✗").red(),
        counts.fails
    )
}

fn iteration_rate_line(r: &IterationRate) -> String {
    format!("{:.2}% {} out of {} iterations", r.rate() * 100.0, r.hits, r.iterations)
}

pub fn render_text(summary: &RunSummary) -> String {
    let s = &summary.stats;
    let json = summary.to_json();
    let secs = s.elapsed.as_secs_f64();
    let per_sec = |n: u64| if secs > 0.0 { n as f64 / secs } else { 0.0 };
    let mut out = String::new();

    let _ = writeln!(out, "  scenario: {} @ {}", summary.scenario, summary.base_url);
    let _ = writeln!(out);

    for (name, counts) in &s.checks {
        if counts.fails == 0 {
            let _ = writeln!(out, "  {} {}", style("✓").green(), name);
        } else {
            let _ = writeln!(out, "  {} {}", style("✗").red(), name);
            let _ = writeln!(
                out,
                "    ↳  {:.0}% - {} {} / {} {}",
                counts.rate() * 100.0,
                style("✓").green(),
                counts.passes,
                style("✗").red(),
                counts.fails
            );
        }
    }
    if !s.checks.is_empty() {
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "  {} {}", label("checks"), rate_line(&s.checks_total()));
    let _ = writeln!(
        out,
        "  {} {}",
        label("data_received"),
        humanize_bytes_binary!(s.total_bytes_received)
    );
    for (name, rate) in &s.rates {
        let _ = writeln!(out, "  {} {}", label(name), iteration_rate_line(rate));
    }
    let _ = writeln!(out, "  {} {}", label("http_req_duration"), trend_line(&json.http_req_duration));
    let _ = writeln!(
        out,
        "  {} {:.2}%",
        label("http_req_failed"),
        s.http_req_failed().rate() * 100.0
    );
    let _ = writeln!(
        out,
        "  {} {} {:.2}/s",
        label("http_reqs"),
        s.total_requests,
        per_sec(s.total_requests)
    );
    let _ = writeln!(out, "  {} {}", label("iteration_duration"), trend_line(&json.iteration_duration));
    let _ = writeln!(
        out,
        "  {} {} {:.2}/s",
        label("iterations"),
        s.iterations,
        per_sec(s.iterations)
    );
    if s.interrupted_iterations > 0 {
        let _ = writeln!(out, "  {} {}", label("interrupted_iterations"), s.interrupted_iterations);
    }
    let _ = writeln!(out, "  {} {}", label("vus_max"), s.vus_max);

    if !summary.thresholds.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  thresholds");
        for t in &summary.thresholds {
            let mark = if t.passed { style("✓").green() } else { style("✗").red() };
            let observed = t
                .observed
                .map(|v| format!("{:.4}", v))
                .unwrap_or_else(|| "no samples".to_string());
            let _ = writeln!(out, "  {} {} {} (observed {})", mark, t.metric, t.expression, observed);
        }
    }

    if !json.errors.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  errors");
        for (err, count) in &json.errors {
            let _ = writeln!(out, "    {}: {}", err, count);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampr_core::{Stats, ThresholdResult};
    use std::time::Duration;

    #[test]
    fn formats_times() {
        assert_eq!(fmt_time(512.0), "512.00us");
        assert_eq!(fmt_time(1_500.0), "1.50ms");
        assert_eq!(fmt_time(2_000_000.0), "2.00s");
    }

    #[test]
    fn renders_checks_thresholds_and_errors() {
        let stats = Stats::new().unwrap();
        stats.rates.entry("errors".into()).or_default().merge(1, 2);
        stats.checks.entry("hello status 200".into()).or_default().add(true);
        stats.checks.entry("users list has data".into()).or_default().add(false);
        stats.record_error("Request timeout".into());

        let summary = RunSummary {
            scenario: "users".into(),
            base_url: "http://localhost:8080".into(),
            stats: stats.snapshot(Duration::from_secs(2), Duration::from_secs(2)),
            thresholds: vec![ThresholdResult {
                metric: "errors".into(),
                expression: "rate<0.01".into(),
                observed: Some(0.5),
                passed: false,
            }],
        };

        let text = render_text(&summary);
        assert!(text.contains("scenario: users @ http://localhost:8080"));
        assert!(text.contains("hello status 200"));
        assert!(text.contains("users list has data"));
        assert!(text.contains("errors rate<0.01 (observed 0.5000)"));
        assert!(text.contains("50.00% 1 out of 2 iterations"));
        assert!(text.contains("Request timeout: 1"));
        assert!(text.contains("http_reqs......"));
    }
}
