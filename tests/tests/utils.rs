use metrics_exporter_prometheus::PrometheusBuilder;
use mock_service::MockState;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tracing::error;
use tracing_subscriber::FmtSubscriber;

#[allow(unused)]
pub fn init() {
    static ONCE_LOCK: OnceLock<()> = OnceLock::new();

    ONCE_LOCK.get_or_init(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            default_panic(info);
            error!("Panic occurred: {info:?}");
            std::process::exit(1);
        }));

        FmtSubscriber::builder()
            .with_env_filter(
                "stampede=debug,stampede_loadtest=debug,mock_service=debug,axum::rejection=trace",
            )
            .init();

        let _ = PrometheusBuilder::new().install_recorder();
    });
}

/// Serves a fresh mock API on a free port and returns its address.
#[allow(unused)]
pub async fn spawn_mock(state: Arc<MockState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Err(err) = mock_service::serve(listener, state).await {
            error!("mock service exited: {err}");
        }
    });
    addr
}
