use plexus::NetworkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no data directory available on this platform")]
    NoDataDir,

    #[error("vocabulary has no unit for {0:?}")]
    MissingUnit(String),

    #[error("training task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
