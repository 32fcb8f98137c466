use thiserror::Error;

/// Errors surfaced by the harness itself.
///
/// Failures of the system under test are not errors here; those are recorded
/// as metric samples and judged by thresholds at the end of the run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid threshold expression `{0}`")]
    InvalidThreshold(String),

    #[error("error writing report artifact")]
    Io(#[from] std::io::Error),

    #[error("error serializing report")]
    Json(#[from] serde_json::Error),

    #[error("error formatting timestamp")]
    Timestamp(#[from] time::error::Format),
}
