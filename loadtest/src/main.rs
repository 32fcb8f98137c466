use clap::Parser;
use stampede_loadtest::{run_with_shutdown, Options};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let options = Options::parse();
    let output_dir = options.output_dir.clone();

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Interrupt received; winding the test down");
    };

    match run_with_shutdown(options, shutdown).await {
        Ok(report) => {
            println!("{}", report.render_summary());
            if let Err(err) = report.write_artifacts(&output_dir) {
                error!("Failed to write report artifacts: {err}");
                return ExitCode::FAILURE;
            }
            if report.passed() {
                ExitCode::SUCCESS
            } else {
                error!("One or more thresholds failed");
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
