mod utils;
#[allow(unused)]
use utils::*;

#[cfg(feature = "integration")]
mod tests {
    use super::*;

    use mock_service::MockState;
    use reqwest::Client;
    use stampede::metrics::HTTP_REQ_FAILED;
    use stampede::prelude::*;
    use stampede_loadtest::scenarios::ApiScenarios;
    use stampede_loadtest::thresholds;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    #[ntest::timeout(300_000)]
    async fn sustained_ramp_holds_the_thresholds() {
        init();
        let addr = spawn_mock(Arc::new(MockState::new())).await;
        let registry = Registry::new();
        let api = Arc::new(ApiScenarios::new(
            Client::new(),
            format!("http://{addr}"),
            &registry,
        ));

        let mut test = LoadTest::new("soak", registry, move |ctx| {
            let api = Arc::clone(&api);
            async move { api.iteration(ctx).await }
        })
        .stage(Duration::from_secs(5), 40)
        .stage(Duration::from_secs(20), 40)
        .stage(Duration::from_secs(5), 0)
        .tick(Duration::from_millis(250));
        for threshold in thresholds().unwrap() {
            test = test.threshold(threshold);
        }
        let report = test.await;

        let summary = report.render_summary();
        assert!(report.passed(), "{summary}");
        assert!(report.iterations() > 100, "{summary}");
        assert_eq!(report.metrics.rate(HTTP_REQ_FAILED).unwrap().marked, 0);
    }
}
