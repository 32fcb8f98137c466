mod utils;
#[allow(unused)]
use utils::*;

use mock_service::MockState;
use reqwest::Client;
use stampede::metrics::{Registry, HTTP_REQS, HTTP_REQ_FAILED};
use stampede::pick::IterationContext;
use stampede_loadtest::scenarios::{ApiScenarios, ERRORS, LOGIN_DURATION};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
#[ntest::timeout(60_000)]
async fn an_iteration_logs_in_and_runs_one_flow() {
    init();
    let addr = spawn_mock(Arc::new(MockState::new().with_delay(Duration::ZERO))).await;
    let registry = Registry::new();
    let api = ApiScenarios::new(Client::new(), format!("http://{addr}"), &registry);

    api.iteration(IterationContext::new(11, 0, 0)).await;

    let snap = registry.snapshot(Duration::from_secs(1));
    let reqs = snap.counter(HTTP_REQS).unwrap().count;
    // Login plus at most one flow request; the feedback-create flow can
    // decline its 10% roll and send nothing.
    assert!((1..=2).contains(&reqs), "unexpected request count {reqs}");
    assert_eq!(snap.trend(LOGIN_DURATION).unwrap().count, 1);
    assert_eq!(snap.rate(HTTP_REQ_FAILED).unwrap().total, reqs);
    assert_eq!(snap.rate(HTTP_REQ_FAILED).unwrap().marked, 0);
    // No sample lands in `errors` on a clean run.
    assert_eq!(snap.rate(ERRORS).unwrap().total, 0);
}

#[tokio::test]
#[ntest::timeout(60_000)]
async fn failed_logins_mark_errors_and_skip_think_time() {
    init();
    let addr = spawn_mock(Arc::new(MockState::new().with_delay(Duration::ZERO))).await;
    let registry = Registry::new();
    // Nothing is served under this prefix, so every login fails.
    let api = Arc::new(ApiScenarios::new(
        Client::new(),
        format!("http://{addr}/missing"),
        &registry,
    ));

    let started = Instant::now();
    let iterations = (0..8).map(|worker| {
        let api = Arc::clone(&api);
        async move { api.iteration(IterationContext::new(3, worker, 0)).await }
    });
    futures::future::join_all(iterations).await;
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "failed logins must end the iteration without the think-time pause"
    );

    let snap = registry.snapshot(Duration::from_secs(1));
    let errors = snap.rate(ERRORS).unwrap();
    assert_eq!(errors.total, 8);
    assert_eq!(errors.rate, 1.0);
    assert_eq!(snap.trend(LOGIN_DURATION).unwrap().count, 8);
    // Only the login requests went out; no flow ran without a token.
    assert_eq!(snap.counter(HTTP_REQS).unwrap().count, 8);
    assert_eq!(snap.rate(HTTP_REQ_FAILED).unwrap().marked, 8);
}

#[tokio::test]
#[ntest::timeout(60_000)]
async fn concurrent_iterations_record_without_losing_samples() {
    init();
    let addr = spawn_mock(Arc::new(MockState::new().with_delay(Duration::ZERO))).await;
    let registry = Registry::new();
    let api = Arc::new(ApiScenarios::new(
        Client::new(),
        format!("http://{addr}/missing"),
        &registry,
    ));

    let iterations = (0..16).map(|worker| {
        let api = Arc::clone(&api);
        async move { api.iteration(IterationContext::new(9, worker, 0)).await }
    });
    futures::future::join_all(iterations).await;

    let snap = registry.snapshot(Duration::from_secs(1));
    assert_eq!(snap.rate(ERRORS).unwrap().total, 16);
    assert_eq!(snap.counter(HTTP_REQS).unwrap().count, 16);
}
