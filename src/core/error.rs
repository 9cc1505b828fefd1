use std::io;

use thiserror::Error;

use crate::integrity::IntegrityReport;
use crate::network::{CellId, SynapseId};

/// Errors surfaced by network operations.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("cell not found: {0}")]
    CellNotFound(CellId),

    #[error("synapse not found: {0}")]
    SynapseNotFound(SynapseId),

    #[error("invalid config: {0}")]
    Config(&'static str),

    #[error("diff was computed against generation {diff}, baseline is at generation {baseline}")]
    StaleDiff { diff: u64, baseline: u64 },

    #[error("integrity check failed: {0}")]
    Integrity(IntegrityReport),

    #[error("bad network image: {0}")]
    BadImage(&'static str),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = NetworkError> = std::result::Result<T, E>;
