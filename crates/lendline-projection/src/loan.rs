use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lendline_types::{Address, Amount, LoanId, LoanStatus, SECONDS_PER_DAY};

/// Canonical client-side view of one ledger loan.
///
/// A read-only projection of ledger-owned truth; it is replaced, never
/// mutated, when the ledger changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub borrower: Address,
    /// `None` until funded, and for cancelled loans.
    pub lender: Option<Address>,
    pub principal: Amount,
    pub collateral: Amount,
    pub interest_rate_bps: u64,
    pub duration_secs: u64,
    pub purpose: String,
    pub status: LoanStatus,
    pub repaid_amount: Amount,
    pub total_amount_due: Amount,
    pub installment_amount: Amount,
    pub next_payment_due_at: Option<DateTime<Utc>>,
    pub is_defaulted: bool,
    /// Ledger order, append-only.
    pub payments: Vec<Payment>,
}

/// One recorded repayment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub amount: Amount,
    pub timestamp: DateTime<Utc>,
    pub remaining_balance_after: Amount,
}

impl Loan {
    /// Amount still owed: `total_amount_due - repaid_amount`.
    pub fn remaining_balance(&self) -> Amount {
        self.total_amount_due.saturating_sub(self.repaid_amount)
    }

    pub fn duration_days(&self) -> u64 {
        self.duration_secs / SECONDS_PER_DAY
    }

    /// Repaid fraction of the total due, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        self.repaid_amount.ratio_of(self.total_amount_due)
    }

    pub fn is_borrower(&self, who: Address) -> bool {
        self.borrower == who
    }

    pub fn is_lender(&self, who: Address) -> bool {
        self.lender == Some(who)
    }
}
