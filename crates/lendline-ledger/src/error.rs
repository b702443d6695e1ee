use crate::records::TxHash;

/// The ledger refused an operation before accepting it.
///
/// Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    #[error("{operation} rejected by simulation: {reason}")]
    Rejected { operation: String, reason: String },

    #[error("{operation} has malformed parameters: {reason}")]
    Malformed { operation: String, reason: String },

    #[error("ledger unavailable for {operation}: {reason}")]
    Unavailable { operation: String, reason: String },
}

/// Finality of an accepted write was not observed as success.
///
/// The outcome is indeterminate until reconciliation reads the ledger.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FinalityError {
    #[error("transaction {tx} reverted: {reason}")]
    Reverted { tx: TxHash, reason: String },

    #[error("timed out waiting for finality of {tx}")]
    TimedOut { tx: TxHash },

    #[error("transaction {tx} was dropped by a reorganization")]
    Reorganized { tx: TxHash },

    #[error("unknown transaction {tx}")]
    UnknownTransaction { tx: TxHash },
}

impl FinalityError {
    pub fn tx(&self) -> TxHash {
        match self {
            Self::Reverted { tx, .. }
            | Self::TimedOut { tx }
            | Self::Reorganized { tx }
            | Self::UnknownTransaction { tx } => *tx,
        }
    }
}

/// A read against the ledger failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("transient failure on {query}: {reason}")]
    Transient { query: String, reason: String },

    #[error("malformed response to {query}: {reason}")]
    Malformed { query: String, reason: String },
}

impl QueryError {
    /// Reads have no side effects, so transient failures may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// The in-memory ledger clock cannot move as asked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    #[error("advancing clock {clock} by {secs}s overflows")]
    Overflow { clock: u64, secs: u64 },
}

/// A ledger client could not be bound to a signing identity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("signer has no usable identity")]
    NoIdentity,

    #[error("ledger binding failed: {0}")]
    Bind(String),
}
