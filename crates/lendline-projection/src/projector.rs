use chrono::{DateTime, Utc};

use lendline_ledger::{RawLoanRecord, RawPaymentRecord};
use lendline_types::{Amount, LoanId, LoanStatus};

use crate::error::ProjectionError;
use crate::loan::{Loan, Payment};

/// Deterministic projection from raw ledger records.
pub struct LoanProjector;

impl LoanProjector {
    /// Project one loan and its payment history.
    ///
    /// Fails on an unknown status code, an unrepresentable timestamp, or a
    /// record whose fields contradict its status.
    pub fn project(
        id: LoanId,
        record: &RawLoanRecord,
        payments: &[RawPaymentRecord],
    ) -> Result<Loan, ProjectionError> {
        let status = LoanStatus::from_code(record.status).map_err(|_| {
            ProjectionError::UnknownStatus {
                loan_id: id,
                code: record.status,
            }
        })?;

        let payments = payments
            .iter()
            .map(|p| Self::project_payment(id, p))
            .collect::<Result<Vec<_>, _>>()?;

        let next_payment_due_at = match record.next_payment_due {
            0 => None,
            secs => Some(decode_timestamp(id, secs)?),
        };

        let loan = Loan {
            id,
            borrower: record.borrower,
            lender: record.lender.non_zero(),
            principal: Amount::from_wei(record.amount),
            collateral: Amount::from_wei(record.collateral_amount),
            interest_rate_bps: record.interest_bps,
            duration_secs: record.duration_secs,
            purpose: record.purpose.clone(),
            status,
            repaid_amount: Amount::from_wei(record.repaid_amount),
            total_amount_due: Amount::from_wei(record.total_amount_due),
            installment_amount: Amount::from_wei(record.installment_amount),
            next_payment_due_at,
            is_defaulted: record.is_defaulted,
            payments,
        };

        check_consistency(&loan)?;
        Ok(loan)
    }

    pub fn project_payment(
        id: LoanId,
        record: &RawPaymentRecord,
    ) -> Result<Payment, ProjectionError> {
        Ok(Payment {
            amount: Amount::from_wei(record.amount),
            timestamp: decode_timestamp(id, record.timestamp)?,
            remaining_balance_after: Amount::from_wei(record.remaining_balance),
        })
    }
}

fn decode_timestamp(id: LoanId, secs: u64) -> Result<DateTime<Utc>, ProjectionError> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
        .ok_or(ProjectionError::InvalidTimestamp {
            loan_id: id,
            value: secs,
        })
}

fn check_consistency(loan: &Loan) -> Result<(), ProjectionError> {
    let inconsistent = |reason: &str| ProjectionError::Inconsistent {
        loan_id: loan.id,
        reason: reason.to_string(),
    };

    if loan.borrower.is_zero() {
        return Err(inconsistent("borrower is unset"));
    }
    if loan.lender.is_some() != loan.status.has_lender() {
        return Err(inconsistent("lender presence contradicts status"));
    }
    if loan.is_defaulted != (loan.status == LoanStatus::Defaulted) {
        return Err(inconsistent("default flag contradicts status"));
    }
    if loan.status.is_active() && loan.repaid_amount >= loan.total_amount_due {
        return Err(inconsistent("active loan is fully repaid"));
    }
    if loan.status == LoanStatus::Completed && loan.repaid_amount != loan.total_amount_due {
        return Err(inconsistent("completed loan is not fully repaid"));
    }

    let paid = loan
        .payments
        .iter()
        .try_fold(Amount::ZERO, |acc, p| acc.checked_add(p.amount))
        .ok_or_else(|| inconsistent("payment total overflows"))?;
    if paid != loan.repaid_amount {
        return Err(inconsistent("payments do not sum to repaid amount"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use lendline_types::Address;

    use super::*;

    fn units(n: u64) -> u128 {
        Amount::from_units(n).as_wei()
    }

    fn pending_record() -> RawLoanRecord {
        RawLoanRecord {
            borrower: Address::derive("borrower"),
            amount: units(100),
            interest_bps: 1_000,
            duration_secs: 30 * 86_400,
            collateral_amount: units(10),
            lender: Address::ZERO,
            repaid_amount: 0,
            next_payment_due: 0,
            installment_amount: units(110),
            total_amount_due: units(110),
            is_defaulted: false,
            status: 0,
            purpose: "x".into(),
        }
    }

    fn completed_record() -> (RawLoanRecord, Vec<RawPaymentRecord>) {
        let mut record = pending_record();
        record.lender = Address::derive("lender");
        record.status = 3;
        record.repaid_amount = units(110);
        let payments = vec![RawPaymentRecord {
            amount: units(110),
            timestamp: 1_700_000_100,
            remaining_balance: 0,
        }];
        (record, payments)
    }

    #[test]
    fn projects_pending_loan() {
        let loan = LoanProjector::project(LoanId(0), &pending_record(), &[]).unwrap();
        assert_eq!(loan.status, LoanStatus::Pending);
        assert_eq!(loan.lender, None);
        assert_eq!(loan.principal.to_string(), "100");
        assert_eq!(loan.duration_days(), 30);
        assert_eq!(loan.next_payment_due_at, None);
        assert_eq!(loan.remaining_balance(), Amount::from_units(110));
        assert_eq!(loan.progress(), 0.0);
    }

    #[test]
    fn projects_payment_history_in_order() {
        let (record, payments) = completed_record();
        let loan = LoanProjector::project(LoanId(3), &record, &payments).unwrap();
        assert_eq!(loan.status, LoanStatus::Completed);
        assert_eq!(loan.payments.len(), 1);
        assert_eq!(loan.payments[0].timestamp.timestamp(), 1_700_000_100);
        assert_eq!(loan.payments[0].remaining_balance_after, Amount::ZERO);
        assert_eq!(loan.progress(), 1.0);
    }

    #[test]
    fn unknown_status_is_not_coerced() {
        let mut record = pending_record();
        record.status = 6;
        assert_eq!(
            LoanProjector::project(LoanId(1), &record, &[]),
            Err(ProjectionError::UnknownStatus {
                loan_id: LoanId(1),
                code: 6
            })
        );
    }

    #[test]
    fn out_of_range_timestamp_fails() {
        let (record, mut payments) = completed_record();
        payments[0].timestamp = u64::MAX;
        let err = LoanProjector::project(LoanId(2), &record, &payments).unwrap_err();
        assert!(matches!(err, ProjectionError::InvalidTimestamp { .. }));
        assert_eq!(err.loan_id(), LoanId(2));
    }

    #[test]
    fn lender_contradicting_status_fails() {
        let mut record = pending_record();
        record.lender = Address::derive("lender");
        assert!(matches!(
            LoanProjector::project(LoanId(0), &record, &[]),
            Err(ProjectionError::Inconsistent { .. })
        ));
    }

    #[test]
    fn default_flag_must_match_status() {
        let mut record = pending_record();
        record.lender = Address::derive("lender");
        record.status = 4;
        assert!(LoanProjector::project(LoanId(0), &record, &[]).is_err());
        record.is_defaulted = true;
        let loan = LoanProjector::project(LoanId(0), &record, &[]).unwrap();
        assert!(loan.is_defaulted);
    }

    #[test]
    fn payments_must_sum_to_repaid() {
        let (record, mut payments) = completed_record();
        payments[0].amount = units(100);
        assert!(LoanProjector::project(LoanId(0), &record, &payments).is_err());
    }

    #[test]
    fn projection_is_deterministic() {
        let (record, payments) = completed_record();
        let a = LoanProjector::project(LoanId(0), &record, &payments).unwrap();
        let b = LoanProjector::project(LoanId(0), &record, &payments).unwrap();
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }
}
