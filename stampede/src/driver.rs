//! The staged virtual-user driver.
//!
//! [`LoadTest`] is the awaitable handle for one run: build it with a ramp
//! plan and thresholds, `.await` it, get a [`RunReport`] back. Internally a
//! control loop wakes once per tick, asks the plan for the current
//! virtual-user target and resizes a pool of worker tasks to match. Each
//! worker runs the iteration body back to back until it is scaled away or
//! the plan ends.
use crate::metrics::{Registry, ITERATIONS, ITERATION_DURATION};
use crate::pick::IterationContext;
use crate::plan::RampPlan;
use crate::report::{RunReport, Threshold};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Settings for one run.
#[derive(Clone)]
pub struct TestConfig {
    pub name: String,
    pub plan: RampPlan,
    pub thresholds: Vec<Threshold>,
    /// Seed for the per-iteration random streams. Randomized per run unless
    /// pinned, so reruns differ but a pinned seed reproduces exactly.
    pub seed: u64,
    /// How often the control loop re-evaluates the plan.
    pub tick: Duration,
}

impl TestConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            plan: RampPlan::new(),
            thresholds: vec![],
            seed: rand::random(),
            tick: DEFAULT_TICK,
        }
    }
}

/// An awaitable load test run.
///
/// Not intended to be polled manually; configure it with the builder
/// methods and `.await` it.
#[pin_project::pin_project]
pub struct LoadTest<T> {
    func: T,
    registry: Registry,
    config: TestConfig,
    shutdown: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
    runner_fut: Option<Pin<Box<dyn Future<Output = RunReport> + Send>>>,
}

impl<T> LoadTest<T> {
    /// A run named `name`, recording into `registry`, executing `func` for
    /// every iteration.
    pub fn new(name: &str, registry: Registry, func: T) -> Self {
        Self {
            func,
            registry,
            config: TestConfig::new(name),
            shutdown: None,
            runner_fut: None,
        }
    }

    /// Append a ramp stage.
    pub fn stage(mut self, duration: Duration, target: u32) -> Self {
        self.config.plan = self.config.plan.stage(duration, target);
        self
    }

    /// Replace the whole ramp plan.
    pub fn plan(mut self, plan: RampPlan) -> Self {
        self.config.plan = plan;
        self
    }

    /// Add a pass/fail criterion to judge at the end of the run.
    pub fn threshold(mut self, threshold: Threshold) -> Self {
        self.config.thresholds.push(threshold);
        self
    }

    /// Pin the random seed so user picks and think times reproduce.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Override the control loop tick.
    pub fn tick(mut self, tick: Duration) -> Self {
        self.config.tick = tick;
        self
    }

    /// End the run early when `signal` completes. The report still covers
    /// everything recorded up to that point.
    pub fn shutdown_on<S>(mut self, signal: S) -> Self
    where
        S: Future<Output = ()> + Send + 'static,
    {
        self.shutdown = Some(Box::pin(signal));
        self
    }
}

impl<T, F> Future for LoadTest<T>
where
    T: Fn(IterationContext) -> F + Send + Sync + 'static + Clone,
    F: Future<Output = ()> + Send,
{
    type Output = RunReport;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.runner_fut.is_none() {
            let func = self.func.clone();
            let registry = self.registry.clone();
            let config = self.config.clone();
            let shutdown = self.shutdown.take();
            self.runner_fut = Some(Box::pin(async move {
                run_plan(func, registry, config, shutdown).await
            }));
        }

        if let Some(runner) = &mut self.runner_fut {
            runner.as_mut().poll(cx)
        } else {
            unreachable!()
        }
    }
}

#[instrument(name = "run", skip_all, fields(name = config.name))]
async fn run_plan<T, F>(
    func: T,
    registry: Registry,
    config: TestConfig,
    shutdown: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
) -> RunReport
where
    T: Fn(IterationContext) -> F + Send + Sync + 'static + Clone,
    F: Future<Output = ()> + Send,
{
    info!("Running {} with plan [{}]", config.name, config.plan);

    let started_at = OffsetDateTime::now_utc();
    let start = Instant::now();
    let mut shutdown = shutdown.unwrap_or_else(|| Box::pin(std::future::pending()));
    let mut pool = WorkerPool::new(func, registry.clone(), config.seed);
    let mut timer = Timer::new(config.tick).await;

    loop {
        match config.plan.target_at(start.elapsed()) {
            Some(target) => {
                trace!("Plan target {target} at {:?}", start.elapsed());
                pool.resize(target as usize);
            }
            None => {
                info!("Plan complete for {}", config.name);
                break;
            }
        }

        tokio::select! {
            _ = timer.tick() => {}
            _ = &mut shutdown => {
                info!("Shutdown signal received; ending {} early", config.name);
                break;
            }
        }
    }

    pool.shutdown().await;

    let elapsed = start.elapsed();
    let report = RunReport::new(
        &config.name,
        started_at,
        elapsed,
        registry.snapshot(elapsed),
        &config.thresholds,
    );
    info!(
        "Finished {}: {} iterations over {:?}",
        config.name,
        report.iterations(),
        elapsed
    );
    report
}

/// The worker tasks currently running iteration bodies.
///
/// Each spawned worker gets an id that is never reused, so the random
/// streams of a worker scaled away and one scaled up later never collide.
struct WorkerPool<T> {
    func: T,
    registry: Registry,
    seed: u64,
    tasks: Vec<JoinHandle<()>>,
    next_id: usize,
}

impl<T, F> WorkerPool<T>
where
    T: Fn(IterationContext) -> F + Send + Sync + 'static + Clone,
    F: Future<Output = ()> + Send,
{
    fn new(func: T, registry: Registry, seed: u64) -> Self {
        Self {
            func,
            registry,
            seed,
            tasks: vec![],
            next_id: 0,
        }
    }

    fn resize(&mut self, target: usize) {
        if self.tasks.len() == target {
        } else if self.tasks.len() > target {
            debug!("Scaling down {} -> {target} workers", self.tasks.len());
            for handle in self.tasks.drain(target..) {
                handle.abort();
            }
        } else {
            debug!("Scaling up {} -> {target} workers", self.tasks.len());
            while self.tasks.len() < target {
                let func = self.func.clone();
                let registry = self.registry.clone();
                let seed = self.seed;
                let id = self.next_id;
                self.next_id += 1;

                self.tasks.push(tokio::spawn(async move {
                    let iterations = registry.counter(ITERATIONS);
                    let duration = registry.trend(ITERATION_DURATION);
                    let mut iteration = 0u64;
                    loop {
                        let ctx = IterationContext::new(seed, id, iteration);
                        let started = Instant::now();
                        func(ctx).await;
                        duration.add(started.elapsed());
                        iterations.increment(1);
                        iteration += 1;
                    }
                }));
            }
        }
    }

    /// Aborts every worker and waits for each to wind down, so nothing is
    /// mid-record when the final snapshot is taken.
    async fn shutdown(mut self) {
        let handles: Vec<_> = self.tasks.drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

struct Timer {
    interval: Interval,
}

impl Timer {
    async fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes instantly
        interval.tick().await;
        Self { interval }
    }

    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}
