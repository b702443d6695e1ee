use std::fmt;

use serde::{Deserialize, Serialize};

use lendline_types::{Address, Amount, LoanAction, LoanId};

/// Hash identifying a submitted transaction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxHash(pub [u8; 32]);

impl TxHash {
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn short(&self) -> String {
        format!("0x{}", hex::encode(&self.0[..4]))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self.short())
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

/// Signing capability handed out by the identity provider.
///
/// The ledger client derives the caller identity from this, never from
/// persisted state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signer {
    address: Address,
    provider: String,
}

impl Signer {
    pub fn new(address: Address, provider: impl Into<String>) -> Self {
        Self {
            address,
            provider: provider.into(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }
}

/// A state-changing ledger operation. Each variant is one ledger method.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerOperation {
    RequestLoan {
        amount: Amount,
        interest_bps: u64,
        duration_secs: u64,
        purpose: String,
    },
    FundLoan { loan_id: LoanId },
    MakePayment { loan_id: LoanId },
    DefaultLoan { loan_id: LoanId },
    CancelLoan { loan_id: LoanId },
}

impl LedgerOperation {
    pub fn action(&self) -> LoanAction {
        match self {
            Self::RequestLoan { .. } => LoanAction::Request,
            Self::FundLoan { .. } => LoanAction::Fund,
            Self::MakePayment { .. } => LoanAction::MakePayment,
            Self::DefaultLoan { .. } => LoanAction::Default,
            Self::CancelLoan { .. } => LoanAction::Cancel,
        }
    }

    /// The ledger method name.
    pub fn name(&self) -> &'static str {
        self.action().operation_name()
    }

    /// Target loan; `None` for `requestLoan`, which creates one.
    pub fn loan_id(&self) -> Option<LoanId> {
        match self {
            Self::RequestLoan { .. } => None,
            Self::FundLoan { loan_id }
            | Self::MakePayment { loan_id }
            | Self::DefaultLoan { loan_id }
            | Self::CancelLoan { loan_id } => Some(*loan_id),
        }
    }
}

/// An operation plus its attached value transfer (smallest unit).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCall {
    pub operation: LedgerOperation,
    pub value: Amount,
}

impl LedgerCall {
    pub fn new(operation: LedgerOperation) -> Self {
        Self {
            operation,
            value: Amount::ZERO,
        }
    }

    pub fn with_value(mut self, value: Amount) -> Self {
        self.value = value;
        self
    }
}

/// Handle for a submitted, not yet final, transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingTx {
    pub hash: TxHash,
    pub operation: LedgerOperation,
    pub caller: Address,
}

/// Effects the ledger reports for a finalized transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    LoanRequested { loan_id: LoanId, borrower: Address },
    LoanFunded { loan_id: LoanId, lender: Address },
    PaymentMade { loan_id: LoanId, amount: Amount },
    LoanCompleted { loan_id: LoanId },
    LoanDefaulted { loan_id: LoanId },
    LoanCancelled { loan_id: LoanId },
}

/// Proof that a transaction reached finality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalityReceipt {
    pub tx: TxHash,
    pub block: u64,
    pub events: Vec<LedgerEvent>,
}

impl FinalityReceipt {
    /// Id of the loan created by a finalized `requestLoan`, if any.
    pub fn created_loan(&self) -> Option<LoanId> {
        self.events.iter().find_map(|e| match e {
            LedgerEvent::LoanRequested { loan_id, .. } => Some(*loan_id),
            _ => None,
        })
    }
}

/// Read queries the ledger answers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerQuery {
    LoanCount,
    GetLoan(LoanId),
    GetLoanPayments(LoanId),
    GetBorrowerLoans(Address),
    GetLenderLoans(Address),
}

impl LedgerQuery {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LoanCount => "loanCount",
            Self::GetLoan(_) => "getLoan",
            Self::GetLoanPayments(_) => "getLoanPayments",
            Self::GetBorrowerLoans(_) => "getBorrowerLoans",
            Self::GetLenderLoans(_) => "getLenderLoans",
        }
    }
}

impl fmt::Display for LedgerQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoanCount => f.write_str("loanCount()"),
            Self::GetLoan(id) => write!(f, "getLoan({})", id.0),
            Self::GetLoanPayments(id) => write!(f, "getLoanPayments({})", id.0),
            Self::GetBorrowerLoans(a) => write!(f, "getBorrowerLoans({a})"),
            Self::GetLenderLoans(a) => write!(f, "getLenderLoans({a})"),
        }
    }
}

/// Raw answer to a [`LedgerQuery`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueryResponse {
    Count(u64),
    Loan(RawLoanRecord),
    Payments(Vec<RawPaymentRecord>),
    LoanIds(Vec<u64>),
}

/// Loan record exactly as the ledger stores it.
///
/// Amounts are in the smallest unit, durations and timestamps in integer
/// seconds, `status` is the ledger's numeric code, and an unset lender is
/// [`Address::ZERO`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLoanRecord {
    pub borrower: Address,
    pub amount: u128,
    pub interest_bps: u64,
    pub duration_secs: u64,
    pub collateral_amount: u128,
    pub lender: Address,
    pub repaid_amount: u128,
    pub next_payment_due: u64,
    pub installment_amount: u128,
    pub total_amount_due: u128,
    pub is_defaulted: bool,
    pub status: u8,
    pub purpose: String,
}

/// One recorded payment, in ledger order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPaymentRecord {
    pub amount: u128,
    pub timestamp: u64,
    pub remaining_balance: u128,
}
