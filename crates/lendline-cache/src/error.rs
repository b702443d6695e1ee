use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("ledger read failed: {0}")]
    Query(#[from] lendline_ledger::QueryError),

    #[error("snapshot for epoch {built_for} superseded by epoch {current}")]
    Superseded { built_for: u64, current: u64 },
}

pub type CacheResult<T> = Result<T, CacheError>;
