use std::{io, path::PathBuf};
use thiserror::Error;

/// Failures of the file-backed stores (ledger, proxy config, markers, artifacts).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("i/o failure on {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("could not lock {}: {reason}", path.display())]
    Lock { path: PathBuf, reason: String },
    #[error("proxy config {} is corrupt and could not be backed up: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
    #[error("failed to encode proxy config: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    #[inline]
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
