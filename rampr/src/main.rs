use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use mimalloc::MiMalloc;
use rampr_core::{RunConfig, ScenarioConfig, StatsSnapshot, UsersScenario, run_once, run_scenario};
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod cli;
mod report;

/// Exit status when at least one threshold was crossed.
const THRESHOLDS_FAILED: u8 = 99;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::new("warn"),
        })
        .init();

    let args = cli::Args::parse();
    let text_output = args.output == cli::OutputFormat::Text;

    let config = match &args.config {
        Some(path) => ScenarioConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ScenarioConfig::default(),
    };
    let run = RunConfig::from_config(&config, args.base_url.as_deref())?;
    let scenario = Arc::new(UsersScenario::new(config.pauses()));

    if text_output {
        if args.once {
            println!("Running a single iteration @ {}", run.base_url);
        } else {
            println!(
                "Running {}s staged test @ {}",
                run.profile.total_duration().as_secs(),
                run.base_url
            );
            println!("  up to {} VUs over {} stages", run.profile.max_vus(), run.profile.stages().len());
        }
    }

    let summary = if args.once {
        run_once(run, scenario).await?
    } else {
        let pb = if text_output {
            let pb = ProgressBar::new(run.profile.total_duration().as_secs());
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}]",
                )?
                .progress_chars("=>-"),
            );
            Some(pb)
        } else {
            None
        };

        let pb_clone = pb.clone();
        let mut last_requests = 0;
        let mut last_elapsed = Duration::ZERO;

        let summary = run_scenario(
            run,
            scenario,
            Some(move |p: StatsSnapshot| {
                let interval_secs = p.elapsed.saturating_sub(last_elapsed).as_secs_f64();
                let current_rps = if interval_secs > 0.0 {
                    (p.total_requests - last_requests) as f64 / interval_secs
                } else {
                    0.0
                };
                last_requests = p.total_requests;
                last_elapsed = p.elapsed;

                if let Some(pb) = &pb_clone {
                    pb.set_position(p.elapsed.as_secs());
                    pb.set_message(format!(
                        "VUs: {} | RPS: {:.0} | Iterations: {} | Failed reqs: {}",
                        p.vus, current_rps, p.iterations, p.failed_requests
                    ));
                }
            }),
        )
        .await?;

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        summary
    };

    match args.output {
        cli::OutputFormat::Text => print!("{}", report::render_text(&summary)),
        cli::OutputFormat::Json => println!("{}", serde_json::to_string(&summary.to_json())?),
    }

    if let Some(path) = &args.summary_export {
        std::fs::write(path, serde_json::to_string_pretty(&summary.to_json())?)
            .with_context(|| format!("failed to write summary to {}", path.display()))?;
        info!("Summary written to {}", path.display());
    }

    std::io::stdout().flush().ok();

    if summary.passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("{} threshold(s) crossed", summary.failed_thresholds().count());
        Ok(ExitCode::from(THRESHOLDS_FAILED))
    }
}
