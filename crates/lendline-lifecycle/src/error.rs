use std::fmt;
use std::time::Duration;

use thiserror::Error;

use lendline_ledger::{FinalityError, QueryError, SubmissionError, TxHash};
use lendline_projection::ProjectionError;
use lendline_types::{Amount, IntentId, LoanAction, LoanId, LoanStatus};

/// Local validation failed; nothing was sent to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreconditionError {
    #[error("no identity is connected")]
    NotConnected,

    #[error("invalid loan terms: {0}")]
    InvalidTerms(String),

    #[error("loan {0} does not exist")]
    LoanNotFound(LoanId),

    #[error("{action} is not allowed on loan {loan_id} while it is {status}")]
    IllegalTransition {
        loan_id: LoanId,
        action: LoanAction,
        status: LoanStatus,
    },

    #[error("only the borrower of loan {loan_id} may call {action}")]
    NotBorrower { loan_id: LoanId, action: LoanAction },

    #[error("only the lender of loan {loan_id} may call {action}")]
    NotLender { loan_id: LoanId, action: LoanAction },

    #[error("the borrower cannot fund their own loan {0}")]
    BorrowerCannotFund(LoanId),

    #[error("{action} on loan {loan_id} needs exactly {expected}, got {actual}")]
    WrongAmount {
        loan_id: LoanId,
        action: LoanAction,
        expected: Amount,
        actual: Amount,
    },

    #[error("another operation on loan {0} is still in flight")]
    OperationInFlight(LoanId),

    #[error("intent {0} was already issued; start a new request")]
    IntentAlreadyIssued(IntentId),

    #[error("intent {0} is older than every remembered intent; start a new request")]
    IntentExpired(IntentId),

    #[error("identity changed before the operation was submitted")]
    SessionChanged,
}

/// What a forced refresh learned after an unobserved or failed finality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Whether the cache was rebuilt from the ledger.
    pub refreshed: bool,
    /// Status of the target loan in the rebuilt snapshot, when known.
    pub status: Option<LoanStatus>,
}

impl fmt::Display for Reconciliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.refreshed, self.status) {
            (true, Some(status)) => write!(f, "refreshed, loan is now {status}"),
            (true, None) => f.write_str("refreshed"),
            (false, _) => f.write_str("refresh failed, view may be stale"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    /// Finality failed. The write may or may not have taken effect.
    #[error("{source}; outcome unknown, {reconciliation}")]
    Finality {
        #[source]
        source: FinalityError,
        reconciliation: Reconciliation,
    },

    /// Gave up waiting for finality. The write was not withdrawn.
    #[error("no finality for {tx} within {waited:?}; outcome unknown, {reconciliation}")]
    Indeterminate {
        tx: TxHash,
        waited: Duration,
        reconciliation: Reconciliation,
    },

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

impl LifecycleError {
    /// True when the ledger may have applied the write.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Self::Finality { .. } | Self::Indeterminate { .. })
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// A confirmed mutation whose follow-up refresh did not land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleViewWarning {
    pub loan_id: Option<LoanId>,
    pub reason: String,
}

impl fmt::Display for StaleViewWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.loan_id {
            Some(id) => write!(f, "loan {id} confirmed but view is stale: {}", self.reason),
            None => write!(f, "confirmed but view is stale: {}", self.reason),
        }
    }
}
