use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("session error: {0}")]
    Session(#[from] lendline_session::SessionError),

    #[error("reconciliation error: {0}")]
    Cache(#[from] lendline_cache::CacheError),

    #[error(transparent)]
    Lifecycle(#[from] lendline_lifecycle::LifecycleError),

    #[error("invalid config {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SdkResult<T> = Result<T, SdkError>;
