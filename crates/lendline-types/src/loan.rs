use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Seconds in one loan-duration day.
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Ledger-assigned loan sequence number (0-based, monotonic).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoanId(pub u64);

impl fmt::Display for LoanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for LoanId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Lifecycle status of a loan, mirroring the ledger's numeric codes 0..=5.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LoanStatus {
    Pending,
    Funded,
    Repaying,
    Completed,
    Defaulted,
    Cancelled,
}

impl LoanStatus {
    pub const ALL: [LoanStatus; 6] = [
        LoanStatus::Pending,
        LoanStatus::Funded,
        LoanStatus::Repaying,
        LoanStatus::Completed,
        LoanStatus::Defaulted,
        LoanStatus::Cancelled,
    ];

    /// Map a ledger status code. Codes outside the known range are an error,
    /// never coerced.
    pub fn from_code(code: u8) -> Result<Self, TypeError> {
        match code {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Funded),
            2 => Ok(Self::Repaying),
            3 => Ok(Self::Completed),
            4 => Ok(Self::Defaulted),
            5 => Ok(Self::Cancelled),
            other => Err(TypeError::UnknownStatus(other)),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Funded => 1,
            Self::Repaying => 2,
            Self::Completed => 3,
            Self::Defaulted => 4,
            Self::Cancelled => 5,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Funded => "Funded",
            Self::Repaying => "Repaying",
            Self::Completed => "Completed",
            Self::Defaulted => "Defaulted",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Completed, Defaulted and Cancelled admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Defaulted | Self::Cancelled)
    }

    /// `true` while repayment is outstanding.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Funded | Self::Repaying)
    }

    /// The lender is set in every status except these two.
    pub fn has_lender(&self) -> bool {
        !matches!(self, Self::Pending | Self::Cancelled)
    }

    /// Edges of the status machine as the ledger may apply them, including
    /// partial repayment (`Funded -> Repaying`, `Repaying -> Repaying`).
    pub fn can_become(&self, next: LoanStatus) -> bool {
        use LoanStatus::*;
        matches!(
            (self, next),
            (Pending, Funded)
                | (Pending, Cancelled)
                | (Funded, Repaying)
                | (Funded, Completed)
                | (Funded, Defaulted)
                | (Repaying, Repaying)
                | (Repaying, Completed)
                | (Repaying, Defaulted)
        )
    }

    /// Whether `action` may be applied to a loan in this status.
    pub fn permits(&self, action: LoanAction) -> bool {
        action.transition(*self).is_some()
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A client-initiated mutation, one per ledger operation name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanAction {
    Request,
    Cancel,
    Fund,
    MakePayment,
    Default,
}

/// `(from, action, to)` for every legal client mutation of an existing loan.
/// Payments settle the full remaining balance, so they always complete.
pub const LEGAL_TRANSITIONS: &[(LoanStatus, LoanAction, LoanStatus)] = &[
    (LoanStatus::Pending, LoanAction::Cancel, LoanStatus::Cancelled),
    (LoanStatus::Pending, LoanAction::Fund, LoanStatus::Funded),
    (LoanStatus::Funded, LoanAction::MakePayment, LoanStatus::Completed),
    (LoanStatus::Repaying, LoanAction::MakePayment, LoanStatus::Completed),
    (LoanStatus::Funded, LoanAction::Default, LoanStatus::Defaulted),
    (LoanStatus::Repaying, LoanAction::Default, LoanStatus::Defaulted),
];

impl LoanAction {
    pub const ALL: [LoanAction; 5] = [
        LoanAction::Request,
        LoanAction::Cancel,
        LoanAction::Fund,
        LoanAction::MakePayment,
        LoanAction::Default,
    ];

    /// The ledger operation this action submits.
    pub fn operation_name(&self) -> &'static str {
        match self {
            Self::Request => "requestLoan",
            Self::Cancel => "cancelLoan",
            Self::Fund => "fundLoan",
            Self::MakePayment => "makePayment",
            Self::Default => "defaultLoan",
        }
    }

    /// Target status when applied to a loan in `from`, or `None` if illegal.
    /// `Request` creates loans and is never legal against an existing one.
    pub fn transition(&self, from: LoanStatus) -> Option<LoanStatus> {
        LEGAL_TRANSITIONS
            .iter()
            .find(|(f, a, _)| *f == from && a == self)
            .map(|(_, _, to)| *to)
    }
}

impl fmt::Display for LoanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation_name())
    }
}
