//! Staged performance test for the people-and-feedback API.
//!
//! Each virtual user logs in as one of a fixed set of test accounts, runs
//! one randomly chosen flow against the API (dashboard, people search,
//! feedback browsing or feedback posting) and pauses for a short think
//! time, while the size of the user pool follows the ramp plan. The run
//! ends with a text summary on stdout, two JSON artifacts on disk and an
//! exit status reflecting the thresholds.
pub mod scenarios;

use crate::scenarios::ApiScenarios;
use clap::Parser;
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stampede::metrics::{HTTP_REQ_DURATION, HTTP_REQ_FAILED};
use stampede::prelude::*;
use thiserror::Error;
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser, Debug, Clone)]
#[command(name = "loadtest", about = "Staged-ramp performance test against a running API")]
pub struct Options {
    /// Base URL of the API under test
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:3000")]
    pub base_url: String,

    /// Name of the run, used in the report
    #[arg(long, default_value = "performance")]
    pub name: String,

    /// Pin the random seed so user picks and think times reproduce
    #[arg(long)]
    pub seed: Option<u64>,

    /// Directory the JSON report artifacts are written into
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Run the compressed smoke schedule instead of the full 22-minute ramp
    #[arg(long)]
    pub quick: bool,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("application is not healthy: {0}")]
    Unhealthy(String),

    #[error("error building the HTTP client")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    Report(#[from] stampede::Error),
}

/// The ramp plan: up to 100 users over 2m, hold 5m, up to 500 over 3m,
/// hold 10m, down to zero over 2m.
pub fn stage_schedule() -> RampPlan {
    RampPlan::new()
        .stage(Duration::from_secs(120), 100)
        .stage(Duration::from_secs(300), 100)
        .stage(Duration::from_secs(180), 500)
        .stage(Duration::from_secs(600), 500)
        .stage(Duration::from_secs(120), 0)
}

/// The same shape as [`stage_schedule`] squeezed into 40 seconds at a
/// tenth of the peak, for smoke-testing a deployment.
pub fn quick_schedule() -> RampPlan {
    RampPlan::new()
        .stage(Duration::from_secs(10), 10)
        .stage(Duration::from_secs(20), 10)
        .stage(Duration::from_secs(10), 0)
}

/// Pass/fail criteria for the run.
pub fn thresholds() -> Result<Vec<Threshold>, stampede::Error> {
    Ok(vec![
        Threshold::parse(HTTP_REQ_DURATION, "p(95)<500")?,
        Threshold::parse(HTTP_REQ_FAILED, "rate<0.1")?,
        Threshold::parse(scenarios::ERRORS, "rate<0.1")?,
    ])
}

/// Verifies the target is up before any load is generated.
pub async fn health_check(client: &Client, base_url: &str) -> Result<(), RunError> {
    let response = client
        .get(format!("{base_url}/health"))
        .send()
        .await
        .map_err(|err| RunError::Unhealthy(format!("health check request failed: {err}")))?;

    let status = response.status();
    if status != StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return Err(RunError::Unhealthy(format!(
            "health check returned {status}: {body}"
        )));
    }
    Ok(())
}

/// Runs the full test to completion.
pub async fn run(options: Options) -> Result<RunReport, RunError> {
    run_with_shutdown(options, std::future::pending()).await
}

/// Runs the full test, ending early (with a report covering what ran so
/// far) if `signal` completes first.
pub async fn run_with_shutdown<S>(options: Options, signal: S) -> Result<RunReport, RunError>
where
    S: Future<Output = ()> + Send + 'static,
{
    let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

    info!("Starting performance test setup...");
    health_check(&client, &options.base_url).await?;
    info!("Health check passed");

    let registry = Registry::new();
    let api = Arc::new(ApiScenarios::new(client, options.base_url.clone(), &registry));

    let plan = if options.quick {
        quick_schedule()
    } else {
        stage_schedule()
    };
    let mut test = LoadTest::new(&options.name, registry, move |ctx| {
        let api = Arc::clone(&api);
        async move { api.iteration(ctx).await }
    })
    .plan(plan)
    .shutdown_on(signal);
    for threshold in thresholds()? {
        test = test.threshold(threshold);
    }
    if let Some(seed) = options.seed {
        test = test.seed(seed);
    }

    let report = test.await;
    info!("Performance test completed");
    Ok(report)
}
