use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use lendline_projection::Loan;
use lendline_types::{Address, LoanId, LoanStatus};

/// Loan ids the bound identity participates in, per role.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MyLoans {
    pub as_borrower: BTreeSet<LoanId>,
    pub as_lender: BTreeSet<LoanId>,
}

impl MyLoans {
    pub fn contains(&self, id: LoanId) -> bool {
        self.as_borrower.contains(&id) || self.as_lender.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.as_borrower.union(&self.as_lender).count()
    }

    pub fn is_empty(&self) -> bool {
        self.as_borrower.is_empty() && self.as_lender.is_empty()
    }
}

/// A loan the rebuild left out because its record could not be projected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedLoan {
    pub loan_id: LoanId,
    pub reason: String,
}

/// One complete, immutable view of the ledger.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Snapshot {
    /// Identity the index was built for.
    pub identity: Option<Address>,
    /// Session epoch the snapshot belongs to.
    pub epoch: u64,
    /// Every projectable loan, ordered by id.
    pub loans: Vec<Loan>,
    pub my_loans: MyLoans,
    pub skipped: Vec<SkippedLoan>,
}

impl Snapshot {
    /// The snapshot before any successful load.
    pub fn empty(epoch: u64) -> Self {
        Self {
            epoch,
            ..Default::default()
        }
    }

    pub fn loan(&self, id: LoanId) -> Option<&Loan> {
        self.loans
            .binary_search_by_key(&id, |l| l.id)
            .ok()
            .map(|i| &self.loans[i])
    }

    /// Loans the bound identity borrowed, in id order.
    pub fn borrowed(&self) -> impl Iterator<Item = &Loan> {
        self.loans
            .iter()
            .filter(|l| self.my_loans.as_borrower.contains(&l.id))
    }

    /// Loans the bound identity funded, in id order.
    pub fn lent(&self) -> impl Iterator<Item = &Loan> {
        self.loans
            .iter()
            .filter(|l| self.my_loans.as_lender.contains(&l.id))
    }

    pub fn mine(&self) -> impl Iterator<Item = &Loan> {
        self.loans.iter().filter(|l| self.my_loans.contains(l.id))
    }
}

/// A difference between two snapshots the ledger should never produce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HistoryAnomaly {
    IllegalTransition {
        loan_id: LoanId,
        from: LoanStatus,
        to: LoanStatus,
    },
    PaymentsRewritten {
        loan_id: LoanId,
    },
    LoanVanished {
        loan_id: LoanId,
    },
}

/// Compare an installed snapshot with its replacement.
///
/// Statuses may only follow the lifecycle machine and payment histories
/// may only grow at the tail. Loans skipped in `next` are not reported.
pub fn history_anomalies(prev: &Snapshot, next: &Snapshot) -> Vec<HistoryAnomaly> {
    let next_by_id: BTreeMap<LoanId, &Loan> = next.loans.iter().map(|l| (l.id, l)).collect();
    let skipped: BTreeSet<LoanId> = next.skipped.iter().map(|s| s.loan_id).collect();

    let mut anomalies = Vec::new();
    for old in &prev.loans {
        let Some(new) = next_by_id.get(&old.id) else {
            if !skipped.contains(&old.id) {
                anomalies.push(HistoryAnomaly::LoanVanished { loan_id: old.id });
            }
            continue;
        };
        if old.status != new.status && !old.status.can_become(new.status) {
            anomalies.push(HistoryAnomaly::IllegalTransition {
                loan_id: old.id,
                from: old.status,
                to: new.status,
            });
        }
        if !new.payments.starts_with(&old.payments) {
            anomalies.push(HistoryAnomaly::PaymentsRewritten { loan_id: old.id });
        }
    }
    anomalies
}
