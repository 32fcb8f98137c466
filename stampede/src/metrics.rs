//! Metric series and their lock-free accumulators.
//!
//! A [`Registry`] hands out cheap cloneable handles ([`Counter`], [`Rate`],
//! [`Trend`]) backed by atomics, so any number of workers can append
//! concurrently without coordination. Aggregates (averages, percentiles,
//! rates) are computed once at the end of the run via [`Registry::snapshot`].
//!
//! With the `metrics` feature enabled (the default), every append is also
//! emitted to the [`metrics`] facade so an exporter can expose live values.
use metrics_util::AtomicBucket;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Built-in series names, matching the ones the original engine maintained.
pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";

#[derive(Clone)]
enum Series {
    Counter(Counter),
    Rate(Rate),
    Trend(Trend),
}

impl Series {
    fn kind(&self) -> &'static str {
        match self {
            Series::Counter(_) => "counter",
            Series::Rate(_) => "rate",
            Series::Trend(_) => "trend",
        }
    }
}

/// Shared, append-only store of named metric series.
///
/// Cloning is cheap and all clones observe the same series. Handles are
/// meant to be acquired once at wiring time and moved into worker tasks;
/// the appends themselves never touch the registry lock.
#[derive(Clone, Default)]
pub struct Registry {
    series: Arc<RwLock<HashMap<String, Series>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the counter series `name`.
    ///
    /// Panics if `name` is already registered with a different kind; that is
    /// a wiring bug, not a runtime condition.
    pub fn counter(&self, name: &str) -> Counter {
        match self.entry(name) {
            Series::Counter(c) => c,
            other => panic!(
                "metric `{name}` is already registered as a {}, not a counter",
                other.kind()
            ),
        }
    }

    /// Get or create the rate series `name`. Panics on a kind mismatch.
    pub fn rate(&self, name: &str) -> Rate {
        match self.entry_with(name, || Series::Rate(Rate::new(name))) {
            Series::Rate(r) => r,
            other => panic!(
                "metric `{name}` is already registered as a {}, not a rate",
                other.kind()
            ),
        }
    }

    /// Get or create the trend series `name`. Panics on a kind mismatch.
    pub fn trend(&self, name: &str) -> Trend {
        match self.entry_with(name, || Series::Trend(Trend::new(name))) {
            Series::Trend(t) => t,
            other => panic!(
                "metric `{name}` is already registered as a {}, not a trend",
                other.kind()
            ),
        }
    }

    /// Pre-wired handles for the built-in HTTP request series.
    pub fn http(&self) -> HttpMetrics {
        HttpMetrics {
            requests: self.counter(HTTP_REQS),
            failed: self.rate(HTTP_REQ_FAILED),
            duration: self.trend(HTTP_REQ_DURATION),
        }
    }

    fn entry(&self, name: &str) -> Series {
        self.entry_with(name, || Series::Counter(Counter::new(name)))
    }

    fn entry_with(&self, name: &str, make: impl FnOnce() -> Series) -> Series {
        let mut map = self.series.write().expect("metric registry lock poisoned");
        match map.entry(name.to_string()) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(v) => v.insert(make()).clone(),
        }
    }

    /// Final aggregate view of every series. `elapsed` is the run's wall
    /// clock duration, used for per-second rates.
    pub fn snapshot(&self, elapsed: Duration) -> RegistrySnapshot {
        let map = self.series.read().expect("metric registry lock poisoned");
        let series = map
            .iter()
            .map(|(name, series)| {
                let stats = match series {
                    Series::Counter(c) => SeriesStats::Counter(c.stats(elapsed)),
                    Series::Rate(r) => SeriesStats::Rate(r.stats()),
                    Series::Trend(t) => SeriesStats::Trend(t.stats()),
                };
                (name.clone(), stats)
            })
            .collect();
        RegistrySnapshot { series }
    }
}

/// Monotonic event counter.
#[derive(Clone)]
pub struct Counter {
    name: Arc<str>,
    count: Arc<AtomicU64>,
}

impl Counter {
    fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn increment(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
        #[cfg(feature = "metrics")]
        {
            metrics::counter!(self.name.to_string()).increment(n);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn stats(&self, elapsed: Duration) -> CounterStats {
        let count = self.count();
        let secs = elapsed.as_secs_f64();
        let per_second = if secs > 0.0 { count as f64 / secs } else { 0.0 };
        CounterStats { count, per_second }
    }
}

/// Fraction-of-marked-samples metric. Each sample is either marked (counts
/// toward the rate) or not; the final value is `marked / total`.
#[derive(Clone)]
pub struct Rate {
    name: Arc<str>,
    total: Arc<AtomicU64>,
    marked: Arc<AtomicU64>,
}

impl Rate {
    fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            total: Arc::new(AtomicU64::new(0)),
            marked: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn add(&self, marked: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if marked {
            self.marked.fetch_add(1, Ordering::Relaxed);
        }
        #[cfg(feature = "metrics")]
        {
            metrics::counter!(format!("{}_samples", self.name)).increment(1);
            if marked {
                metrics::counter!(format!("{}_marked", self.name)).increment(1);
            }
        }
    }

    fn stats(&self) -> RateStats {
        let total = self.total.load(Ordering::Relaxed);
        let marked = self.marked.load(Ordering::Relaxed);
        let rate = if total > 0 {
            marked as f64 / total as f64
        } else {
            0.0
        };
        RateStats {
            total,
            marked,
            rate,
        }
    }
}

/// Distribution-valued metric over durations. Appends are lock-free; the
/// percentile math happens once at snapshot time over the full sample set.
#[derive(Clone)]
pub struct Trend {
    name: Arc<str>,
    samples: Arc<AtomicBucket<Duration>>,
}

impl Trend {
    fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            samples: Arc::new(AtomicBucket::new()),
        }
    }

    pub fn add(&self, elapsed: Duration) {
        self.samples.push(elapsed);
        #[cfg(feature = "metrics")]
        {
            metrics::histogram!(self.name.to_string()).record(elapsed.as_secs_f64() * 1e3);
        }
    }

    fn stats(&self) -> TrendStats {
        let millis: Vec<f64> = self
            .samples
            .data()
            .iter()
            .map(|d| d.as_secs_f64() * 1e3)
            .collect();
        TrendStats::from_millis(millis)
    }
}

/// Handles for the built-in HTTP series, recording one call's outcome with a
/// single operation so every call lands in all three series exactly once.
#[derive(Clone)]
pub struct HttpMetrics {
    requests: Counter,
    failed: Rate,
    duration: Trend,
}

impl HttpMetrics {
    pub fn record(&self, elapsed: Duration, ok: bool) {
        self.requests.increment(1);
        self.duration.add(elapsed);
        self.failed.add(!ok);
    }
}

/// Final aggregates of one counter series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct CounterStats {
    pub count: u64,
    pub per_second: f64,
}

/// Final aggregates of one rate series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct RateStats {
    pub total: u64,
    pub marked: u64,
    pub rate: f64,
}

/// Final aggregates of one trend series, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct TrendStats {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl TrendStats {
    fn from_millis(mut millis: Vec<f64>) -> Self {
        if millis.is_empty() {
            return Self::default();
        }
        millis.sort_by(f64::total_cmp);

        let count = millis.len() as u64;
        let avg = millis.iter().sum::<f64>() / millis.len() as f64;
        Self {
            count,
            avg,
            min: millis[0],
            max: millis[millis.len() - 1],
            p50: percentile(&millis, 50.0),
            p90: percentile(&millis, 90.0),
            p95: percentile(&millis, 95.0),
            p99: percentile(&millis, 99.0),
        }
    }
}

/// Nearest-rank percentile over an already-sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Aggregates of one series, tagged with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeriesStats {
    Counter(CounterStats),
    Rate(RateStats),
    Trend(TrendStats),
}

/// Read-only aggregate view of every series, taken after the run.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct RegistrySnapshot {
    pub series: BTreeMap<String, SeriesStats>,
}

impl RegistrySnapshot {
    pub fn get(&self, name: &str) -> Option<&SeriesStats> {
        self.series.get(name)
    }

    pub fn counter(&self, name: &str) -> Option<CounterStats> {
        match self.series.get(name) {
            Some(SeriesStats::Counter(c)) => Some(*c),
            _ => None,
        }
    }

    pub fn rate(&self, name: &str) -> Option<RateStats> {
        match self.series.get(name) {
            Some(SeriesStats::Rate(r)) => Some(*r),
            _ => None,
        }
    }

    pub fn trend(&self, name: &str) -> Option<TrendStats> {
        match self.series.get(name) {
            Some(SeriesStats::Trend(t)) => Some(*t),
            _ => None,
        }
    }
}
