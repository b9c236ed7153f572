//! Staged virtual-user HTTP load engine.
//!
//! A [`Scenario`] describes what one VU does per iteration; [`run_scenario`]
//! ramps VUs through a [`LoadProfile`], aggregates request latency, checks
//! and rates into [`Stats`], and evaluates a [`ThresholdSet`] at the end.

mod context;
mod duration;
mod error;
mod response;
mod runner;
mod stats;

pub mod config;
pub mod metrics;
pub mod scenario;
pub mod stages;
pub mod summary;
pub mod thresholds;

pub use config::{DEFAULT_BASE_URL, ScenarioConfig};
pub use context::{Check, VuContext};
pub use error::*;
pub use response::Response;
pub use runner::{RunConfig, run_once, run_scenario};
pub use scenario::{Pauses, Scenario, UsersScenario};
pub use stages::{LoadProfile, Stage};
pub use stats::{Stats, StatsSnapshot};
pub use summary::{JsonSummary, RunSummary};
pub use thresholds::{ThresholdResult, ThresholdSet};
