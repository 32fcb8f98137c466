use mock_service::{tps_measure_task, MockState};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    metrics_exporter_prometheus::PrometheusBuilder::new().install()?;

    tokio::task::spawn(async { tps_measure_task().await });

    let state = Arc::new(MockState::new());
    mock_service::run("0.0.0.0:3000".parse()?, state).await
}
