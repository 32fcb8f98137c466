//! Threshold evaluation and end-of-run reporting.
//!
//! A [`Threshold`] is a pass/fail criterion over one series' final
//! aggregates, written in the compact form `"p(95)<500"` or `"rate<0.1"`.
//! After the run the driver folds the snapshot and the thresholds into a
//! [`RunReport`], which renders the stdout summary and writes the two JSON
//! artifacts.
use crate::error::Error;
use crate::metrics::{
    RegistrySnapshot, SeriesStats, TrendStats, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED,
    ITERATIONS, ITERATION_DURATION,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Which aggregate of a series a threshold constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Rate,
    Avg,
    P50,
    P90,
    P95,
    P99,
}

impl Aggregate {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "rate" => Some(Aggregate::Rate),
            "avg" => Some(Aggregate::Avg),
            "p(50)" => Some(Aggregate::P50),
            "p(90)" => Some(Aggregate::P90),
            "p(95)" => Some(Aggregate::P95),
            "p(99)" => Some(Aggregate::P99),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Aggregate::Rate => "rate",
            Aggregate::Avg => "avg",
            Aggregate::P50 => "p(50)",
            Aggregate::P90 => "p(90)",
            Aggregate::P95 => "p(95)",
            Aggregate::P99 => "p(99)",
        }
    }

    /// The aggregate's value for `stats`, or `None` if the series kind does
    /// not carry it (a rate has no percentiles, a counter has neither).
    fn extract(self, stats: &SeriesStats) -> Option<f64> {
        match (self, stats) {
            (Aggregate::Rate, SeriesStats::Rate(r)) => Some(r.rate),
            (Aggregate::Avg, SeriesStats::Trend(t)) => Some(t.avg),
            (Aggregate::P50, SeriesStats::Trend(t)) => Some(t.p50),
            (Aggregate::P90, SeriesStats::Trend(t)) => Some(t.p90),
            (Aggregate::P95, SeriesStats::Trend(t)) => Some(t.p95),
            (Aggregate::P99, SeriesStats::Trend(t)) => Some(t.p99),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
        }
    }

    fn holds(self, actual: f64, bound: f64) -> bool {
        match self {
            Op::Lt => actual < bound,
            Op::Le => actual <= bound,
            Op::Gt => actual > bound,
            Op::Ge => actual >= bound,
        }
    }
}

/// One pass/fail criterion over a named series.
#[derive(Debug, Clone)]
pub struct Threshold {
    metric: String,
    expr: String,
    aggregate: Aggregate,
    op: Op,
    bound: f64,
}

impl Threshold {
    /// Parses an expression such as `"p(95)<500"` against `metric`.
    ///
    /// The left side must be one of `rate`, `avg`, `p(50)`, `p(90)`,
    /// `p(95)`, `p(99)`; the operator one of `<`, `<=`, `>`, `>=`.
    /// Whitespace around the parts is ignored.
    pub fn parse(metric: &str, expr: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidThreshold(format!("{metric}: {expr}"));

        // Two-character operators first so "<=" is not read as "<" + "=".
        let (op, at) = ["<=", ">=", "<", ">"]
            .iter()
            .find_map(|needle| expr.find(needle).map(|at| (*needle, at)))
            .ok_or_else(invalid)?;
        let (left, right) = (expr[..at].trim(), expr[at + op.len()..].trim());

        let aggregate = Aggregate::parse(left).ok_or_else(invalid)?;
        let op = match op {
            "<=" => Op::Le,
            ">=" => Op::Ge,
            "<" => Op::Lt,
            _ => Op::Gt,
        };
        let bound: f64 = right.parse().map_err(|_| invalid())?;
        if !bound.is_finite() {
            return Err(invalid());
        }

        Ok(Self {
            metric: metric.to_string(),
            expr: format!("{}{}{}", aggregate.as_str(), op.as_str(), bound),
            aggregate,
            op,
            bound,
        })
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// The canonical form of the expression, e.g. `"p(95)<500"`.
    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Judges this threshold against the final snapshot.
    ///
    /// A missing series, or one that never received a sample, is
    /// [`ThresholdOutcome::NoData`]: it neither passes nor fails. An
    /// aggregate the series kind cannot supply fails outright, since that
    /// threshold could never be satisfied.
    pub fn evaluate(&self, snapshot: &RegistrySnapshot) -> ThresholdReport {
        let (outcome, actual) = match snapshot.get(&self.metric) {
            None => (ThresholdOutcome::NoData, None),
            Some(SeriesStats::Rate(r)) if r.total == 0 => (ThresholdOutcome::NoData, None),
            Some(SeriesStats::Trend(t)) if t.count == 0 => (ThresholdOutcome::NoData, None),
            Some(stats) => match self.aggregate.extract(stats) {
                Some(actual) if self.op.holds(actual, self.bound) => {
                    (ThresholdOutcome::Passed, Some(actual))
                }
                Some(actual) => (ThresholdOutcome::Failed, Some(actual)),
                None => (ThresholdOutcome::Failed, None),
            },
        };
        ThresholdReport {
            metric: self.metric.clone(),
            expr: self.expr.clone(),
            aggregate: self.aggregate,
            outcome,
            actual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdOutcome {
    Passed,
    Failed,
    /// The series never received a sample, so there is nothing to judge.
    NoData,
}

/// The judged result of one threshold.
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdReport {
    pub metric: String,
    pub expr: String,
    #[serde(skip)]
    aggregate: Aggregate,
    pub outcome: ThresholdOutcome,
    pub actual: Option<f64>,
}

impl ThresholdReport {
    fn render(&self) -> String {
        match self.outcome {
            ThresholdOutcome::NoData => format!("  {}: No data", self.metric),
            outcome => {
                let mark = if outcome == ThresholdOutcome::Passed {
                    "✅"
                } else {
                    "❌"
                };
                let actual = match self.actual {
                    Some(v) if self.aggregate == Aggregate::Rate => {
                        format!("{:.1}%", v * 100.0)
                    }
                    Some(v) => format!("{:.0}ms", v),
                    None => "n/a".to_string(),
                };
                format!("  {} {}: {} (actual: {})", self.metric, self.expr, mark, actual)
            }
        }
    }
}

/// Everything known about a finished run.
///
/// Serializing the whole struct yields the detailed report artifact;
/// [`RunReport::render_summary`] produces the human-readable text and
/// [`RunReport::write_artifacts`] the two JSON files.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub duration_secs: f64,
    pub metrics: RegistrySnapshot,
    pub thresholds: Vec<ThresholdReport>,
}

impl RunReport {
    pub fn new(
        name: &str,
        started_at: OffsetDateTime,
        elapsed: Duration,
        metrics: RegistrySnapshot,
        thresholds: &[Threshold],
    ) -> Self {
        let thresholds = thresholds.iter().map(|t| t.evaluate(&metrics)).collect();
        Self {
            name: name.to_string(),
            started_at,
            duration_secs: elapsed.as_secs_f64(),
            metrics,
            thresholds,
        }
    }

    /// True when no threshold failed. `NoData` outcomes are not failures;
    /// an idle run is judged inconclusive rather than broken.
    pub fn passed(&self) -> bool {
        self.thresholds
            .iter()
            .all(|t| t.outcome != ThresholdOutcome::Failed)
    }

    /// The human-readable end-of-run summary.
    ///
    /// Custom series that never received a sample render as "No data"
    /// rather than a zero value.
    pub fn render_summary(&self) -> String {
        let reqs = self.metrics.counter(HTTP_REQS).unwrap_or_default();
        let failed = self.metrics.rate(HTTP_REQ_FAILED).unwrap_or_default();
        let duration = self.metrics.trend(HTTP_REQ_DURATION).unwrap_or_default();
        let wall = Duration::from_secs(self.duration_secs.round() as u64);

        let mut out = String::new();
        let _ = writeln!(out);
        let _ = writeln!(out, "📊 Performance Test Summary");
        let _ = writeln!(out, "==========================");
        let _ = writeln!(out);
        let _ = writeln!(out, "Test Duration: {}", humantime::format_duration(wall));
        let _ = writeln!(out, "Total Requests: {}", reqs.count);
        let _ = writeln!(out, "Failed Requests: {:.1}%", failed.rate * 100.0);
        let _ = writeln!(out);
        let _ = writeln!(out, "🚀 Response Times:");
        let _ = writeln!(out, "  Average: {:.0}ms", duration.avg);
        let _ = writeln!(out, "  95th percentile: {:.0}ms", duration.p95);
        let _ = writeln!(out, "  99th percentile: {:.0}ms", duration.p99);
        let _ = writeln!(out);
        let _ = writeln!(out, "🔥 Throughput:");
        let _ = writeln!(out, "  Requests/second: {:.0}", reqs.per_second);
        let _ = writeln!(out);
        let _ = writeln!(out, "⚠️  Error Rates:");
        let _ = writeln!(out, "  HTTP errors: {:.1}%", failed.rate * 100.0);
        for (name, stats) in &self.metrics.series {
            if let SeriesStats::Rate(r) = stats {
                if name == HTTP_REQ_FAILED {
                    continue;
                }
                if r.total == 0 {
                    let _ = writeln!(out, "  {}: No data", title_case(name));
                } else {
                    let _ = writeln!(out, "  {}: {:.1}%", title_case(name), r.rate * 100.0);
                }
            }
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "📈 Custom Metrics:");
        for (name, stats) in &self.metrics.series {
            if let SeriesStats::Trend(t) = stats {
                if name == HTTP_REQ_DURATION || name == ITERATION_DURATION {
                    continue;
                }
                if t.count == 0 {
                    let _ = writeln!(out, "  {}: No data", title_case(name));
                } else {
                    let _ = writeln!(out, "  {}: {:.0}ms", title_case(name), t.avg);
                }
            }
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "🎯 Thresholds Met:");
        for threshold in &self.thresholds {
            let _ = writeln!(out, "{}", threshold.render());
        }
        out
    }

    /// Writes `performance-report.json` (this struct, pretty-printed) and
    /// `performance-metrics.json` (timestamped metrics plus the threshold
    /// expressions) into `dir`.
    pub fn write_artifacts(&self, dir: &Path) -> Result<(), Error> {
        let report = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join("performance-report.json"), report)?;

        let mut thresholds: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for t in &self.thresholds {
            thresholds.entry(&t.metric).or_default().push(&t.expr);
        }
        let artifact = MetricsArtifact {
            timestamp: OffsetDateTime::now_utc().format(&Rfc3339)?,
            metrics: &self.metrics,
            thresholds,
        };
        let metrics = serde_json::to_string_pretty(&artifact)?;
        std::fs::write(dir.join("performance-metrics.json"), metrics)?;
        Ok(())
    }

    pub fn iterations(&self) -> u64 {
        self.metrics
            .counter(ITERATIONS)
            .map(|c| c.count)
            .unwrap_or_default()
    }

    pub fn iteration_duration(&self) -> TrendStats {
        self.metrics.trend(ITERATION_DURATION).unwrap_or_default()
    }
}

#[derive(Serialize)]
struct MetricsArtifact<'a> {
    timestamp: String,
    metrics: &'a RegistrySnapshot,
    thresholds: BTreeMap<&'a str, Vec<&'a str>>,
}

/// `login_duration` renders as `Login duration`.
fn title_case(name: &str) -> String {
    let mut out = name.replace('_', " ");
    if let Some(first) = out.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    out
}
