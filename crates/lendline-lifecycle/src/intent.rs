use serde::{Deserialize, Serialize};

use lendline_ledger::TxHash;
use lendline_types::{Amount, IntentId, LoanAction, LoanId, LoanStatus, SECONDS_PER_DAY};

use crate::error::{PreconditionError, StaleViewWarning};

/// Terms of a new loan request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub amount: Amount,
    pub interest_rate_bps: u64,
    pub duration_days: u64,
    pub purpose: String,
    pub collateral: Amount,
}

impl LoanTerms {
    /// Duration as the ledger expects it.
    pub fn duration_secs(&self) -> Option<u64> {
        self.duration_days.checked_mul(SECONDS_PER_DAY)
    }

    pub fn validate(&self) -> Result<(), PreconditionError> {
        if self.amount.is_zero() {
            return Err(PreconditionError::InvalidTerms("amount must be positive".into()));
        }
        if self.collateral.is_zero() {
            return Err(PreconditionError::InvalidTerms(
                "collateral must be positive".into(),
            ));
        }
        if self.duration_days == 0 {
            return Err(PreconditionError::InvalidTerms(
                "duration must be at least one day".into(),
            ));
        }
        if self.duration_secs().is_none() {
            return Err(PreconditionError::InvalidTerms("duration is too long".into()));
        }
        Ok(())
    }
}

/// One client-initiated change to the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    Request(LoanTerms),
    Fund { loan_id: LoanId, amount: Amount },
    /// Settles the full remaining balance, read from the ledger at submit time.
    MakePayment { loan_id: LoanId },
    Default { loan_id: LoanId },
    Cancel { loan_id: LoanId },
}

impl Mutation {
    pub fn action(&self) -> LoanAction {
        match self {
            Self::Request(_) => LoanAction::Request,
            Self::Fund { .. } => LoanAction::Fund,
            Self::MakePayment { .. } => LoanAction::MakePayment,
            Self::Default { .. } => LoanAction::Default,
            Self::Cancel { .. } => LoanAction::Cancel,
        }
    }

    pub fn loan_id(&self) -> Option<LoanId> {
        match self {
            Self::Request(_) => None,
            Self::Fund { loan_id, .. }
            | Self::MakePayment { loan_id }
            | Self::Default { loan_id }
            | Self::Cancel { loan_id } => Some(*loan_id),
        }
    }
}

/// A mutation tagged with the caller's intent id.
///
/// An intent reaches the ledger at most once. Retrying after an unknown
/// outcome takes a new intent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationIntent {
    pub id: IntentId,
    pub action: Mutation,
}

impl MutationIntent {
    pub fn new(action: Mutation) -> Self {
        Self {
            id: IntentId::new(),
            action,
        }
    }
}

/// A mutation the ledger confirmed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutationOutcome {
    pub intent: IntentId,
    pub tx: TxHash,
    /// Target loan, or the loan a request created.
    pub loan_id: Option<LoanId>,
    /// Status in the refreshed snapshot; `None` if the refresh did not land.
    pub status: Option<LoanStatus>,
    pub warning: Option<StaleViewWarning>,
}
