use lendline_ledger::{LedgerCall, LedgerOperation};
use lendline_projection::Loan;
use lendline_types::{Address, Amount, LoanAction, LoanId, LoanStatus};

use crate::error::PreconditionError;
use crate::intent::Mutation;

/// Client-checkable preconditions of `action` on `loan` for `caller`.
///
/// Returns the status the ledger will move the loan to. `Request` never
/// applies to an existing loan.
pub fn check_action(
    loan: &Loan,
    caller: Address,
    action: LoanAction,
) -> Result<LoanStatus, PreconditionError> {
    let to = action
        .transition(loan.status)
        .ok_or(PreconditionError::IllegalTransition {
            loan_id: loan.id,
            action,
            status: loan.status,
        })?;

    match action {
        LoanAction::Fund if loan.is_borrower(caller) => {
            Err(PreconditionError::BorrowerCannotFund(loan.id))
        }
        LoanAction::Cancel | LoanAction::MakePayment if !loan.is_borrower(caller) => {
            Err(PreconditionError::NotBorrower {
                loan_id: loan.id,
                action,
            })
        }
        LoanAction::Default if !loan.is_lender(caller) => Err(PreconditionError::NotLender {
            loan_id: loan.id,
            action,
        }),
        _ => Ok(to),
    }
}

/// Actions `caller` may take on `loan` right now.
pub fn available_actions(loan: &Loan, caller: Address) -> Vec<LoanAction> {
    LoanAction::ALL
        .into_iter()
        .filter(|action| check_action(loan, caller, *action).is_ok())
        .collect()
}

/// Validate `mutation` against `loan` and build the ledger call.
///
/// `loan` must be the mutation's target; requests take `None`.
pub fn prepare_call(
    mutation: &Mutation,
    loan: Option<&Loan>,
    caller: Address,
) -> Result<LedgerCall, PreconditionError> {
    match mutation {
        Mutation::Request(terms) => {
            terms.validate()?;
            let duration_secs = terms
                .duration_secs()
                .ok_or_else(|| PreconditionError::InvalidTerms("duration is too long".into()))?;
            Ok(LedgerCall::new(LedgerOperation::RequestLoan {
                amount: terms.amount,
                interest_bps: terms.interest_rate_bps,
                duration_secs,
                purpose: terms.purpose.clone(),
            })
            .with_value(terms.collateral))
        }
        Mutation::Fund { loan_id, amount } => {
            let loan = target(loan, *loan_id)?;
            check_action(loan, caller, LoanAction::Fund)?;
            if *amount != loan.principal {
                return Err(PreconditionError::WrongAmount {
                    loan_id: *loan_id,
                    action: LoanAction::Fund,
                    expected: loan.principal,
                    actual: *amount,
                });
            }
            Ok(LedgerCall::new(LedgerOperation::FundLoan { loan_id: *loan_id }).with_value(*amount))
        }
        Mutation::MakePayment { loan_id } => {
            let loan = target(loan, *loan_id)?;
            check_action(loan, caller, LoanAction::MakePayment)?;
            let due = loan.remaining_balance();
            if due == Amount::ZERO {
                return Err(PreconditionError::IllegalTransition {
                    loan_id: *loan_id,
                    action: LoanAction::MakePayment,
                    status: loan.status,
                });
            }
            Ok(LedgerCall::new(LedgerOperation::MakePayment { loan_id: *loan_id }).with_value(due))
        }
        Mutation::Default { loan_id } => {
            check_action(target(loan, *loan_id)?, caller, LoanAction::Default)?;
            Ok(LedgerCall::new(LedgerOperation::DefaultLoan { loan_id: *loan_id }))
        }
        Mutation::Cancel { loan_id } => {
            check_action(target(loan, *loan_id)?, caller, LoanAction::Cancel)?;
            Ok(LedgerCall::new(LedgerOperation::CancelLoan { loan_id: *loan_id }))
        }
    }
}

fn target(loan: Option<&Loan>, loan_id: LoanId) -> Result<&Loan, PreconditionError> {
    loan.ok_or(PreconditionError::LoanNotFound(loan_id))
}

#[cfg(test)]
mod tests {
    use lendline_ledger::{RawLoanRecord, RawPaymentRecord};
    use lendline_projection::LoanProjector;
    use proptest::prelude::*;

    use super::*;

    fn borrower() -> Address {
        Address::derive("borrower")
    }

    fn lender() -> Address {
        Address::derive("lender")
    }

    fn loan(status: LoanStatus) -> Loan {
        let total = Amount::from_units(110).as_wei();
        let repaid = match status {
            LoanStatus::Repaying => Amount::from_units(50).as_wei(),
            LoanStatus::Completed => total,
            _ => 0,
        };
        let payments = if repaid > 0 {
            vec![RawPaymentRecord {
                amount: repaid,
                timestamp: 1_700_000_000,
                remaining_balance: total - repaid,
            }]
        } else {
            Vec::new()
        };
        let record = RawLoanRecord {
            borrower: borrower(),
            amount: Amount::from_units(100).as_wei(),
            interest_bps: 1_000,
            duration_secs: 30 * 86_400,
            collateral_amount: Amount::from_units(10).as_wei(),
            lender: if status.has_lender() {
                lender()
            } else {
                Address::ZERO
            },
            repaid_amount: repaid,
            next_payment_due: 0,
            installment_amount: total,
            total_amount_due: total,
            is_defaulted: status == LoanStatus::Defaulted,
            status: status.code(),
            purpose: "x".into(),
        };
        LoanProjector::project(LoanId(0), &record, &payments).unwrap()
    }

    #[test]
    fn pending_actions_per_role() {
        let l = loan(LoanStatus::Pending);
        assert_eq!(available_actions(&l, borrower()), vec![LoanAction::Cancel]);
        assert_eq!(
            available_actions(&l, Address::derive("stranger")),
            vec![LoanAction::Fund]
        );
    }

    #[test]
    fn active_actions_per_role() {
        for status in [LoanStatus::Funded, LoanStatus::Repaying] {
            let l = loan(status);
            assert_eq!(available_actions(&l, borrower()), vec![LoanAction::MakePayment]);
            assert_eq!(available_actions(&l, lender()), vec![LoanAction::Default]);
            assert!(available_actions(&l, Address::derive("stranger")).is_empty());
        }
    }

    #[test]
    fn terminal_loans_allow_nothing() {
        for status in [
            LoanStatus::Completed,
            LoanStatus::Defaulted,
            LoanStatus::Cancelled,
        ] {
            let l = loan(status);
            assert!(available_actions(&l, borrower()).is_empty());
            assert!(available_actions(&l, lender()).is_empty());
        }
    }

    #[test]
    fn fund_requires_exact_principal() {
        let l = loan(LoanStatus::Pending);
        let short = Mutation::Fund {
            loan_id: LoanId(0),
            amount: Amount::from_units(99),
        };
        assert!(matches!(
            prepare_call(&short, Some(&l), lender()),
            Err(PreconditionError::WrongAmount { .. })
        ));
        let exact = Mutation::Fund {
            loan_id: LoanId(0),
            amount: Amount::from_units(100),
        };
        let call = prepare_call(&exact, Some(&l), lender()).unwrap();
        assert_eq!(call.value, Amount::from_units(100));
    }

    #[test]
    fn borrower_cannot_fund() {
        let l = loan(LoanStatus::Pending);
        let fund = Mutation::Fund {
            loan_id: LoanId(0),
            amount: Amount::from_units(100),
        };
        assert_eq!(
            prepare_call(&fund, Some(&l), borrower()),
            Err(PreconditionError::BorrowerCannotFund(LoanId(0)))
        );
    }

    #[test]
    fn payment_settles_remaining_balance() {
        let funded = loan(LoanStatus::Funded);
        let pay = Mutation::MakePayment { loan_id: LoanId(0) };
        let call = prepare_call(&pay, Some(&funded), borrower()).unwrap();
        assert_eq!(call.value, Amount::from_units(110));

        let repaying = loan(LoanStatus::Repaying);
        let call = prepare_call(&pay, Some(&repaying), borrower()).unwrap();
        assert_eq!(call.value, Amount::from_units(60));
    }

    #[test]
    fn request_carries_collateral_and_seconds() {
        let request = Mutation::Request(crate::intent::LoanTerms {
            amount: Amount::from_units(100),
            interest_rate_bps: 500,
            duration_days: 30,
            purpose: "x".into(),
            collateral: Amount::from_units(10),
        });
        let call = prepare_call(&request, None, borrower()).unwrap();
        assert_eq!(call.value, Amount::from_units(10));
        assert!(matches!(
            call.operation,
            LedgerOperation::RequestLoan {
                duration_secs: 2_592_000,
                ..
            }
        ));
    }

    #[test]
    fn missing_target_is_not_found() {
        let cancel = Mutation::Cancel { loan_id: LoanId(4) };
        assert_eq!(
            prepare_call(&cancel, None, borrower()),
            Err(PreconditionError::LoanNotFound(LoanId(4)))
        );
    }

    fn any_status() -> impl Strategy<Value = LoanStatus> {
        prop::sample::select(LoanStatus::ALL.to_vec())
    }

    fn any_action() -> impl Strategy<Value = LoanAction> {
        prop::sample::select(LoanAction::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn unlisted_pairs_are_rejected_for_every_caller(
            status in any_status(),
            action in any_action(),
            who in prop::sample::select(vec!["borrower", "lender", "stranger"]),
        ) {
            let l = loan(status);
            let result = check_action(&l, Address::derive(who), action);
            if action.transition(status).is_none() {
                let is_illegal = matches!(result, Err(PreconditionError::IllegalTransition { .. }));
                prop_assert!(is_illegal);
            }
            if let Ok(to) = result {
                prop_assert!(status.can_become(to));
            }
        }
    }
}
