use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::MetricKind;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
    Rate,
    Count,
}

impl Aggregate {
    pub fn applies_to(&self, kind: MetricKind) -> bool {
        match self {
            Aggregate::Avg
            | Aggregate::Min
            | Aggregate::Max
            | Aggregate::Med
            | Aggregate::Percentile(_) => kind == MetricKind::Trend,
            Aggregate::Rate => matches!(kind, MetricKind::Rate | MetricKind::Counter),
            Aggregate::Count => kind == MetricKind::Counter,
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregate::Avg => write!(f, "avg"),
            Aggregate::Min => write!(f, "min"),
            Aggregate::Max => write!(f, "max"),
            Aggregate::Med => write!(f, "med"),
            Aggregate::Percentile(p) => write!(f, "p({})", p),
            Aggregate::Rate => write!(f, "rate"),
            Aggregate::Count => write!(f, "count"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
        };
        f.write_str(op)
    }
}

impl Comparison {
    fn holds(&self, observed: f64, limit: f64) -> bool {
        match self {
            Comparison::Lt => observed < limit,
            Comparison::Le => observed <= limit,
            Comparison::Gt => observed > limit,
            Comparison::Ge => observed >= limit,
            Comparison::Eq => observed == limit,
            Comparison::Ne => observed != limit,
        }
    }
}

/// A single `<aggregate> <op> <number>` expression such as `p(95)<500`.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub aggregate: Aggregate,
    pub comparison: Comparison,
    pub limit: f64,
    source: String,
}

impl Threshold {
    pub fn new(aggregate: Aggregate, comparison: Comparison, limit: f64) -> Self {
        Self {
            aggregate,
            comparison,
            limit,
            source: format!("{}{}{}", aggregate, comparison, limit),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn check(&self, observed: f64) -> bool {
        self.comparison.holds(observed, self.limit)
    }
}

impl FromStr for Threshold {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let source = s.trim().to_string();
        let op_at = source
            .find(['<', '>', '=', '!'])
            .ok_or_else(|| format!("missing comparison operator in '{}'", source))?;
        let (lhs, rest) = source.split_at(op_at);

        let (comparison, rhs) = [
            ("<=", Comparison::Le),
            (">=", Comparison::Ge),
            ("==", Comparison::Eq),
            ("!=", Comparison::Ne),
            ("<", Comparison::Lt),
            (">", Comparison::Gt),
        ]
        .into_iter()
        .find_map(|(token, cmp)| rest.strip_prefix(token).map(|rhs| (cmp, rhs)))
        .ok_or_else(|| format!("unknown comparison operator in '{}'", source))?;

        let aggregate = parse_aggregate(lhs.trim())?;
        let limit: f64 = rhs
            .trim()
            .parse()
            .map_err(|_| format!("invalid threshold value '{}'", rhs.trim()))?;

        Ok(Self {
            aggregate,
            comparison,
            limit,
            source,
        })
    }
}

fn parse_aggregate(s: &str) -> std::result::Result<Aggregate, String> {
    match s {
        "avg" => Ok(Aggregate::Avg),
        "min" => Ok(Aggregate::Min),
        "max" => Ok(Aggregate::Max),
        "med" => Ok(Aggregate::Med),
        "rate" => Ok(Aggregate::Rate),
        "count" => Ok(Aggregate::Count),
        _ => {
            let inner = s
                .strip_prefix("p(")
                .and_then(|rest| rest.strip_suffix(')'))
                .ok_or_else(|| format!("unknown aggregate '{}'", s))?;
            let p: f64 = inner
                .trim()
                .parse()
                .map_err(|_| format!("invalid percentile '{}'", inner))?;
            if !(p > 0.0 && p <= 100.0) {
                return Err(format!("percentile {} out of range (0, 100]", p));
            }
            Ok(Aggregate::Percentile(p))
        }
    }
}

/// Metric name to threshold expressions, e.g. `http_req_duration: [p(95)<500]`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "BTreeMap<String, Vec<String>>")]
pub struct ThresholdSet {
    metrics: BTreeMap<String, Vec<Threshold>>,
}

impl TryFrom<BTreeMap<String, Vec<String>>> for ThresholdSet {
    type Error = Error;

    fn try_from(raw: BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut set = ThresholdSet::default();
        for (metric, expressions) in raw {
            for expr in expressions {
                set.add(&metric, &expr)?;
            }
        }
        Ok(set)
    }
}

/// Resolves metric kinds and aggregate values for threshold evaluation.
pub trait MetricSource {
    fn metric_kind(&self, metric: &str) -> Option<MetricKind>;
    fn metric_value(&self, metric: &str, aggregate: Aggregate) -> Option<f64>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

impl ThresholdSet {
    pub fn add(&mut self, metric: &str, expression: &str) -> Result<()> {
        let threshold = expression.parse::<Threshold>().map_err(|reason| Error::InvalidThreshold {
            metric: metric.to_string(),
            reason,
        })?;
        self.insert(metric, threshold);
        Ok(())
    }

    pub fn insert(&mut self, metric: &str, threshold: Threshold) {
        self.metrics.entry(metric.to_string()).or_default().push(threshold);
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Threshold)> {
        self.metrics
            .iter()
            .flat_map(|(metric, list)| list.iter().map(move |t| (metric.as_str(), t)))
    }

    /// Fails on metrics the run will not produce and on aggregates that do
    /// not apply to a metric's kind.
    pub fn validate(&self, source: &impl MetricSource) -> Result<()> {
        for (metric, threshold) in self.iter() {
            let kind = source.metric_kind(metric).ok_or_else(|| Error::InvalidThreshold {
                metric: metric.to_string(),
                reason: "unknown metric".to_string(),
            })?;
            if !threshold.aggregate.applies_to(kind) {
                return Err(Error::InvalidThreshold {
                    metric: metric.to_string(),
                    reason: format!("'{}' does not apply to a {} metric", threshold.aggregate, kind),
                });
            }
        }
        Ok(())
    }

    pub fn evaluate(&self, source: &impl MetricSource) -> Vec<ThresholdResult> {
        self.iter()
            .map(|(metric, threshold)| {
                let observed = source.metric_value(metric, threshold.aggregate);
                ThresholdResult {
                    metric: metric.to_string(),
                    expression: threshold.source().to_string(),
                    observed,
                    passed: observed.is_some_and(|v| threshold.check(v)),
                }
            })
            .collect()
    }
}
