use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use lendline_ledger::{LedgerClient, LedgerQueries, QueryError};
use lendline_projection::{Loan, LoanProjector};
use lendline_types::LoanId;

use crate::error::CacheResult;
use crate::retry::RetryPolicy;
use crate::snapshot::{MyLoans, SkippedLoan, Snapshot};

/// Builds complete snapshots from the ledger.
///
/// Reads the loan count, then every loan with its payments, then the bound
/// identity's two index lists. Transient read failures are retried under
/// the configured policy; once retries run out the rebuild fails and the
/// installed snapshot stays as it was. A loan whose record is malformed or
/// cannot be projected is skipped and reported.
#[derive(Clone, Debug, Default)]
pub struct Reconciler {
    retry: RetryPolicy,
}

impl Reconciler {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub async fn rebuild(&self, client: &dyn LedgerClient, epoch: u64) -> CacheResult<Snapshot> {
        let identity = client.caller();
        let count = self.retry.run("loanCount()", || client.loan_count()).await?;
        let expected = usize::try_from(count).map_err(|_| QueryError::Malformed {
            query: "loanCount()".into(),
            reason: format!("count {count} exceeds addressable memory"),
        })?;
        debug!(count, epoch, identity = %identity, "rebuilding loan snapshot");

        let mut loans = Vec::with_capacity(expected.min(PREALLOCATE_LIMIT));
        let mut skipped = Vec::new();
        for raw_id in 0..count {
            let id = LoanId(raw_id);
            match self.read_loan(client, id).await? {
                Ok(loan) => loans.push(loan),
                Err(reason) => {
                    warn!(loan_id = %id, reason = %reason, "skipping unprojectable loan");
                    skipped.push(SkippedLoan {
                        loan_id: id,
                        reason,
                    });
                }
            }
        }

        let as_borrower: BTreeSet<LoanId> = self
            .retry
            .run("getBorrowerLoans", || client.get_borrower_loans(identity))
            .await?
            .into_iter()
            .collect();
        let as_lender: BTreeSet<LoanId> = self
            .retry
            .run("getLenderLoans", || client.get_lender_loans(identity))
            .await?
            .into_iter()
            .collect();

        info!(
            epoch,
            loans = loans.len(),
            skipped = skipped.len(),
            borrowed = as_borrower.len(),
            lent = as_lender.len(),
            "loan snapshot rebuilt"
        );

        Ok(Snapshot {
            identity: Some(identity),
            epoch,
            loans,
            my_loans: MyLoans {
                as_borrower,
                as_lender,
            },
            skipped,
        })
    }

    /// Read and project one loan. Exhausted transient failures abort the
    /// rebuild; a malformed or unprojectable record is the inner skip reason.
    async fn read_loan(
        &self,
        client: &dyn LedgerClient,
        id: LoanId,
    ) -> CacheResult<Result<Loan, String>> {
        let record = match self.retry.run("getLoan", || client.get_loan(id)).await {
            Ok(record) => record,
            Err(e) => return skip_or_abort(e),
        };
        let payments = match self
            .retry
            .run("getLoanPayments", || client.get_loan_payments(id))
            .await
        {
            Ok(payments) => payments,
            Err(e) => return skip_or_abort(e),
        };
        Ok(LoanProjector::project(id, &record, &payments).map_err(|e| e.to_string()))
    }
}

/// Loans beyond this are still read; the vector just grows as it goes.
const PREALLOCATE_LIMIT: usize = 1_024;

fn skip_or_abort(e: QueryError) -> CacheResult<Result<Loan, String>> {
    if e.is_retryable() {
        Err(e.into())
    } else {
        Ok(Err(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use lendline_ledger::{
        FinalityError, FinalityReceipt, InMemoryLedger, InMemoryLedgerClient, LedgerCall,
        LedgerClient, LedgerOperation, LedgerQuery, PendingTx, QueryResponse, SubmissionError,
    };
    use lendline_types::{Address, Amount, LoanStatus};

    use proptest::prelude::*;

    use super::*;
    use crate::cache::ReconciliationCache;
    use crate::error::CacheError;

    /// In-memory client that can misreport the loan count and fail every
    /// `getLoan` read.
    struct Scripted {
        inner: InMemoryLedgerClient,
        count: Option<u64>,
        loan_reads_fail: bool,
    }

    impl Scripted {
        fn new(inner: InMemoryLedgerClient) -> Self {
            Self {
                inner,
                count: None,
                loan_reads_fail: false,
            }
        }
    }

    #[async_trait]
    impl LedgerClient for Scripted {
        fn caller(&self) -> Address {
            self.inner.caller()
        }

        async fn submit(&self, call: LedgerCall) -> Result<PendingTx, SubmissionError> {
            self.inner.submit(call).await
        }

        async fn await_finality(
            &self,
            pending: &PendingTx,
        ) -> Result<FinalityReceipt, FinalityError> {
            self.inner.await_finality(pending).await
        }

        async fn query(&self, query: &LedgerQuery) -> Result<QueryResponse, QueryError> {
            match query {
                LedgerQuery::LoanCount => {
                    if let Some(n) = self.count {
                        return Ok(QueryResponse::Count(n));
                    }
                }
                LedgerQuery::GetLoan(_) if self.loan_reads_fail => {
                    return Err(QueryError::Transient {
                        query: query.to_string(),
                        reason: "reset".into(),
                    });
                }
                _ => {}
            }
            self.inner.query(query).await
        }
    }

    async fn request(ledger: &InMemoryLedger, borrower: Address, units: u64) {
        let client = ledger.client(borrower);
        let pending = client
            .submit(
                LedgerCall::new(LedgerOperation::RequestLoan {
                    amount: Amount::from_units(units),
                    interest_bps: 500,
                    duration_secs: 30 * 86_400,
                    purpose: "stock".into(),
                })
                .with_value(Amount::from_units(1)),
            )
            .await
            .unwrap();
        client.await_finality(&pending).await.unwrap();
    }

    async fn fund(ledger: &InMemoryLedger, lender: Address, id: u64, units: u64) {
        let client = ledger.client(lender);
        let pending = client
            .submit(
                LedgerCall::new(LedgerOperation::FundLoan { loan_id: LoanId(id) })
                    .with_value(Amount::from_units(units)),
            )
            .await
            .unwrap();
        client.await_finality(&pending).await.unwrap();
    }

    #[tokio::test]
    async fn rebuild_reads_every_loan_and_index() {
        let ledger = InMemoryLedger::new();
        let alice = Address::derive("alice");
        let bob = Address::derive("bob");
        request(&ledger, alice, 100).await;
        request(&ledger, bob, 50).await;
        fund(&ledger, alice, 1, 50).await;

        let snap = Reconciler::default()
            .rebuild(&ledger.client(alice), 3)
            .await
            .unwrap();
        assert_eq!(snap.identity, Some(alice));
        assert_eq!(snap.epoch, 3);
        assert_eq!(snap.loans.len(), 2);
        assert_eq!(snap.loans[1].status, LoanStatus::Funded);
        assert!(snap.my_loans.as_borrower.contains(&LoanId(0)));
        assert!(snap.my_loans.as_lender.contains(&LoanId(1)));
        assert!(snap.skipped.is_empty());
    }

    #[tokio::test]
    async fn rebuild_is_idempotent() {
        let ledger = InMemoryLedger::new();
        let alice = Address::derive("alice");
        request(&ledger, alice, 100).await;
        fund(&ledger, Address::derive("bob"), 0, 100).await;

        let reconciler = Reconciler::default();
        let client = ledger.client(alice);
        let a = reconciler.rebuild(&client, 1).await.unwrap();
        let b = reconciler.rebuild(&client, 1).await.unwrap();
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[tokio::test]
    async fn unknown_status_skips_only_that_loan() {
        let ledger = InMemoryLedger::new();
        let alice = Address::derive("alice");
        request(&ledger, alice, 10).await;
        request(&ledger, alice, 20).await;
        ledger.override_status(LoanId(0), 9);

        let snap = Reconciler::default()
            .rebuild(&ledger.client(alice), 1)
            .await
            .unwrap();
        assert_eq!(snap.loans.len(), 1);
        assert_eq!(snap.loans[0].id, LoanId(1));
        assert_eq!(snap.skipped.len(), 1);
        assert_eq!(snap.skipped[0].loan_id, LoanId(0));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_reads_are_retried() {
        let ledger = InMemoryLedger::new();
        let alice = Address::derive("alice");
        request(&ledger, alice, 10).await;
        ledger.fail_next_queries(2);

        let snap = Reconciler::default()
            .rebuild(&ledger.client(alice), 1)
            .await
            .unwrap();
        assert_eq!(snap.loans.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_fail_the_rebuild() {
        let ledger = InMemoryLedger::new();
        ledger.fail_next_queries(10);
        let err = Reconciler::new(RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        })
        .rebuild(&ledger.client(Address::derive("alice")), 1)
        .await
        .unwrap_err();
        assert!(matches!(err, CacheError::Query(ref e) if e.is_retryable()));
    }

    #[tokio::test]
    async fn exhausted_loan_read_keeps_previous_snapshot() {
        let ledger = InMemoryLedger::new();
        let alice = Address::derive("alice");
        request(&ledger, alice, 10).await;
        let reconciler = Reconciler::new(RetryPolicy::none());
        let cache = ReconciliationCache::new();
        cache
            .refresh(&reconciler, &ledger.client(alice), 0)
            .await
            .unwrap();

        let mut flaky = Scripted::new(ledger.client(alice));
        flaky.loan_reads_fail = true;
        let err = cache.refresh(&reconciler, &flaky, 0).await.unwrap_err();
        assert!(matches!(err, CacheError::Query(ref e) if e.is_retryable()));

        let snap = cache.snapshot();
        assert_eq!(snap.loans.len(), 1);
        assert!(snap.skipped.is_empty());
    }

    #[tokio::test]
    async fn malformed_loan_read_skips_that_loan() {
        let ledger = InMemoryLedger::new();
        let alice = Address::derive("alice");
        request(&ledger, alice, 10).await;
        let mut overcounting = Scripted::new(ledger.client(alice));
        overcounting.count = Some(2);

        let snap = Reconciler::default()
            .rebuild(&overcounting, 1)
            .await
            .unwrap();
        assert_eq!(snap.loans.len(), 1);
        assert_eq!(snap.skipped.len(), 1);
        assert_eq!(snap.skipped[0].loan_id, LoanId(1));
    }

    #[tokio::test]
    async fn huge_count_is_not_preallocated() {
        let ledger = InMemoryLedger::new();
        let mut client = Scripted::new(ledger.client(Address::derive("alice")));
        client.count = Some(u64::MAX);
        client.loan_reads_fail = true;

        let err = Reconciler::new(RetryPolicy::none())
            .rebuild(&client, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Query(QueryError::Transient { .. })));
    }

    #[derive(Clone, Debug)]
    enum Step {
        Request { actor: usize, units: u64 },
        Fund { actor: usize, loan: u64 },
        PayPart { actor: usize, loan: u64, units: u64 },
        PayRest { actor: usize, loan: u64 },
        Default { actor: usize, loan: u64 },
        Cancel { actor: usize, loan: u64 },
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0..3usize, 1..200u64).prop_map(|(actor, units)| Step::Request { actor, units }),
            (0..3usize, 0..4u64).prop_map(|(actor, loan)| Step::Fund { actor, loan }),
            (0..3usize, 0..4u64, 1..150u64)
                .prop_map(|(actor, loan, units)| Step::PayPart { actor, loan, units }),
            (0..3usize, 0..4u64).prop_map(|(actor, loan)| Step::PayRest { actor, loan }),
            (0..3usize, 0..4u64).prop_map(|(actor, loan)| Step::Default { actor, loan }),
            (0..3usize, 0..4u64).prop_map(|(actor, loan)| Step::Cancel { actor, loan }),
        ]
    }

    /// Submit and await; the ledger is free to refuse.
    async fn attempt(ledger: &InMemoryLedger, caller: Address, call: LedgerCall) {
        let client = ledger.client(caller);
        if let Ok(pending) = client.submit(call).await {
            let _ = client.await_finality(&pending).await;
        }
    }

    async fn apply(ledger: &InMemoryLedger, actors: &[Address], step: Step) {
        let (actor, operation, value) = match step {
            Step::Request { actor, units } => (
                actor,
                LedgerOperation::RequestLoan {
                    amount: Amount::from_units(units),
                    interest_bps: 1_000,
                    duration_secs: 60 * 86_400,
                    purpose: "prop".into(),
                },
                Amount::from_units(1),
            ),
            Step::Fund { actor, loan } => {
                let principal = ledger
                    .export_state()
                    .loans
                    .get(loan as usize)
                    .map(|r| Amount::from_wei(r.amount))
                    .unwrap_or(Amount::ZERO);
                (actor, LedgerOperation::FundLoan { loan_id: LoanId(loan) }, principal)
            }
            Step::PayPart { actor, loan, units } => (
                actor,
                LedgerOperation::MakePayment { loan_id: LoanId(loan) },
                Amount::from_units(units),
            ),
            Step::PayRest { actor, loan } => {
                let rest = ledger
                    .export_state()
                    .loans
                    .get(loan as usize)
                    .map(|r| Amount::from_wei(r.total_amount_due - r.repaid_amount))
                    .unwrap_or(Amount::ZERO);
                (actor, LedgerOperation::MakePayment { loan_id: LoanId(loan) }, rest)
            }
            Step::Default { actor, loan } => (
                actor,
                LedgerOperation::DefaultLoan { loan_id: LoanId(loan) },
                Amount::ZERO,
            ),
            Step::Cancel { actor, loan } => (
                actor,
                LedgerOperation::CancelLoan { loan_id: LoanId(loan) },
                Amount::ZERO,
            ),
        };
        attempt(ledger, actors[actor], LedgerCall::new(operation).with_value(value)).await;
    }

    proptest! {
        #[test]
        fn rebuilt_loans_hold_lifecycle_invariants(steps in prop::collection::vec(step(), 1..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let snap = runtime.block_on(async {
                let ledger = InMemoryLedger::new();
                let actors: Vec<Address> = ["ana", "ben", "cy"].into_iter().map(Address::derive).collect();
                for step in steps {
                    apply(&ledger, &actors, step).await;
                }
                Reconciler::default().rebuild(&ledger.client(actors[0]), 1).await
            }).unwrap();

            prop_assert!(snap.skipped.is_empty());
            for loan in &snap.loans {
                if loan.status.is_active() {
                    prop_assert!(loan.repaid_amount <= loan.total_amount_due);
                }
                prop_assert_eq!(
                    loan.repaid_amount == loan.total_amount_due,
                    loan.status == LoanStatus::Completed
                );
                prop_assert_eq!(
                    loan.lender.is_none(),
                    matches!(loan.status, LoanStatus::Pending | LoanStatus::Cancelled)
                );
                prop_assert_eq!(loan.is_defaulted, loan.status == LoanStatus::Defaulted);
            }
        }
    }
}
