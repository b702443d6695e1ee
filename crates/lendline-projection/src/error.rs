use lendline_types::LoanId;

/// A raw ledger record could not be projected.
///
/// Fatal for that loan only; reconciliation skips and reports it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    #[error("loan {loan_id}: unknown status code {code}")]
    UnknownStatus { loan_id: LoanId, code: u8 },

    #[error("loan {loan_id}: timestamp {value} out of range")]
    InvalidTimestamp { loan_id: LoanId, value: u64 },

    #[error("loan {loan_id}: inconsistent record: {reason}")]
    Inconsistent { loan_id: LoanId, reason: String },
}

impl ProjectionError {
    pub fn loan_id(&self) -> LoanId {
        match self {
            Self::UnknownStatus { loan_id, .. }
            | Self::InvalidTimestamp { loan_id, .. }
            | Self::Inconsistent { loan_id, .. } => *loan_id,
        }
    }
}
