mod utils;
#[allow(unused)]
use utils::*;

use mock_service::MockState;
use reqwest::Client;
use stampede::metrics::{HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED};
use stampede::prelude::*;
use stampede_loadtest::scenarios::ApiScenarios;
use stampede_loadtest::{thresholds, Options, RunError};
use std::sync::Arc;
use std::time::Duration;

fn with_thresholds<T>(mut test: LoadTest<T>) -> LoadTest<T> {
    for threshold in thresholds().unwrap() {
        test = test.threshold(threshold);
    }
    test
}

#[tokio::test]
#[ntest::timeout(60_000)]
async fn short_ramp_against_the_mock_passes_thresholds() {
    init();
    let addr = spawn_mock(Arc::new(MockState::new())).await;
    let registry = Registry::new();
    let api = Arc::new(ApiScenarios::new(
        Client::new(),
        format!("http://{addr}"),
        &registry,
    ));

    let test = LoadTest::new("short-ramp", registry, move |ctx| {
        let api = Arc::clone(&api);
        async move { api.iteration(ctx).await }
    })
    .stage(Duration::from_secs(3), 10)
    .stage(Duration::from_secs(3), 10)
    .tick(Duration::from_millis(100))
    .seed(7);
    let report = with_thresholds(test).await;

    let summary = report.render_summary();
    assert!(report.passed(), "{summary}");
    // The workers up by the one-second mark finish their first think
    // pause well inside the six-second run.
    assert!(report.iterations() >= 3, "{summary}");
    let reqs = report.metrics.counter(HTTP_REQS).unwrap();
    assert!(reqs.count >= report.iterations());
    assert_eq!(report.metrics.rate(HTTP_REQ_FAILED).unwrap().marked, 0);

    assert!(summary.contains("📊 Performance Test Summary"));
    assert!(summary.contains("🎯 Thresholds Met:"));
    assert!(summary.contains("http_req_duration p(95)<500: ✅"));
}

#[tokio::test]
#[ntest::timeout(60_000)]
async fn failed_thresholds_show_up_in_the_artifacts() {
    init();
    // Nothing is mounted under /missing, so every login comes back 404
    // and both error-rate thresholds blow past 0.1.
    let addr = spawn_mock(Arc::new(MockState::new())).await;
    let registry = Registry::new();
    let api = Arc::new(ApiScenarios::new(
        Client::new(),
        format!("http://{addr}/missing"),
        &registry,
    ));

    let test = LoadTest::new("smoke-fail", registry, move |ctx| {
        let api = Arc::clone(&api);
        async move { api.iteration(ctx).await }
    })
    .stage(Duration::from_secs(1), 4)
    .tick(Duration::from_millis(50))
    .seed(11);
    let report = with_thresholds(test).await;

    assert!(!report.passed());
    assert!(report.render_summary().contains("❌"));

    let dir = std::env::temp_dir().join(format!("stampede-e2e-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    report.write_artifacts(&dir).unwrap();

    let raw = std::fs::read_to_string(dir.join("performance-report.json")).unwrap();
    let detailed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(detailed["name"], "smoke-fail");
    let failed = detailed["thresholds"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["metric"] == HTTP_REQ_FAILED)
        .unwrap();
    assert_eq!(failed["outcome"], "failed");
    assert_eq!(failed["actual"], 1.0);

    let raw = std::fs::read_to_string(dir.join("performance-metrics.json")).unwrap();
    let metrics: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(metrics["timestamp"].as_str().unwrap().contains('T'));
    assert_eq!(metrics["metrics"][HTTP_REQS]["kind"], "counter");
    assert_eq!(
        metrics["thresholds"][HTTP_REQ_DURATION],
        serde_json::json!(["p(95)<500"])
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn unhealthy_target_aborts_the_run() {
    init();
    let state = Arc::new(MockState::new());
    state.set_healthy(false);
    let addr = spawn_mock(state).await;

    let options = Options {
        base_url: format!("http://{addr}"),
        name: "abort".into(),
        seed: None,
        output_dir: ".".into(),
        quick: true,
    };
    let err = stampede_loadtest::run(options).await.unwrap_err();

    assert!(matches!(err, RunError::Unhealthy(_)), "{err}");
    assert!(err.to_string().contains("503"), "{err}");
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn unreachable_target_fails_setup() {
    init();
    // Bind and immediately drop a listener; nothing serves on the port.
    let addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let options = Options {
        base_url: format!("http://{addr}"),
        name: "abort".into(),
        seed: None,
        output_dir: ".".into(),
        quick: true,
    };
    let err = stampede_loadtest::run(options).await.unwrap_err();

    assert!(matches!(err, RunError::Unhealthy(_)), "{err}");
    assert!(err.to_string().contains("health check request failed"), "{err}");
}
