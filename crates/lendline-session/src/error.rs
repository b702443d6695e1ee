use std::path::PathBuf;

use thiserror::Error;

use lendline_ledger::ConnectError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no identity provider available")]
    NoProvider,

    #[error("identity provider refused the connection: {0}")]
    Rejected(String),

    #[error("no identity is connected")]
    NotConnected,

    #[error("binding ledger client failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("identity store {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;
