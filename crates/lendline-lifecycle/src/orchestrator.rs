use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use lendline_cache::{CacheError, CacheResult, Reconciler, ReconciliationCache, Snapshot};
use lendline_ledger::{LedgerCall, LedgerQueries, TxHash};
use lendline_projection::{Loan, LoanProjector};
use lendline_session::{Binding, SessionBinding};
use lendline_types::{Amount, IntentId, LoanId, LoanStatus};

use crate::error::{
    LifecycleError, LifecycleResult, PreconditionError, Reconciliation, StaleViewWarning,
};
use crate::guard::{InFlightLoans, IssuedIntents, LoanGuard};
use crate::intent::{LoanTerms, Mutation, MutationIntent, MutationOutcome};
use crate::validation::prepare_call;

/// Default bound on how long a caller waits for finality.
pub const DEFAULT_FINALITY_TIMEOUT: Duration = Duration::from_secs(60);

/// Drives loan mutations through validate, submit, finality and refresh.
pub struct LifecycleOrchestrator {
    session: Arc<SessionBinding>,
    cache: Arc<ReconciliationCache>,
    reconciler: Reconciler,
    finality_timeout: Duration,
    in_flight: InFlightLoans,
    intents: IssuedIntents,
}

/// A mutation that passed validation and may be submitted.
struct Prepared {
    binding: Binding,
    call: LedgerCall,
    _guard: Option<LoanGuard>,
}

impl LifecycleOrchestrator {
    pub fn new(
        session: Arc<SessionBinding>,
        cache: Arc<ReconciliationCache>,
        reconciler: Reconciler,
        finality_timeout: Duration,
    ) -> Self {
        Self {
            session,
            cache,
            reconciler,
            finality_timeout,
            in_flight: InFlightLoans::new(),
            intents: IssuedIntents::new(),
        }
    }

    pub fn finality_timeout(&self) -> Duration {
        self.finality_timeout
    }

    /// Whether a mutation of `loan_id` is between validation and refresh.
    pub fn is_busy(&self, loan_id: LoanId) -> bool {
        self.in_flight.is_busy(loan_id)
    }

    pub async fn request_loan(&self, terms: LoanTerms) -> LifecycleResult<MutationOutcome> {
        self.execute(MutationIntent::new(Mutation::Request(terms)))
            .await
    }

    pub async fn fund_loan(
        &self,
        loan_id: LoanId,
        amount: Amount,
    ) -> LifecycleResult<MutationOutcome> {
        self.execute(MutationIntent::new(Mutation::Fund { loan_id, amount }))
            .await
    }

    pub async fn make_payment(&self, loan_id: LoanId) -> LifecycleResult<MutationOutcome> {
        self.execute(MutationIntent::new(Mutation::MakePayment { loan_id }))
            .await
    }

    pub async fn default_loan(&self, loan_id: LoanId) -> LifecycleResult<MutationOutcome> {
        self.execute(MutationIntent::new(Mutation::Default { loan_id }))
            .await
    }

    pub async fn cancel_loan(&self, loan_id: LoanId) -> LifecycleResult<MutationOutcome> {
        self.execute(MutationIntent::new(Mutation::Cancel { loan_id }))
            .await
    }

    /// Run one intent to completion.
    ///
    /// Precondition failures return before any submission and leave the
    /// intent unused. Once submitted, the intent can never be executed
    /// again, whatever the outcome.
    pub async fn execute(&self, intent: MutationIntent) -> LifecycleResult<MutationOutcome> {
        let MutationIntent { id, action } = intent;
        self.intents.reserve(id)?;

        let prepared = match self.prepare(&action).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.intents.release(id);
                debug!(
                    intent = %id,
                    op = action.action().operation_name(),
                    error = %e,
                    "mutation not submitted"
                );
                return Err(e);
            }
        };
        self.commit(id, &action, prepared).await
    }

    async fn prepare(&self, mutation: &Mutation) -> LifecycleResult<Prepared> {
        let binding = self
            .session
            .current()
            .ok_or(PreconditionError::NotConnected)?;
        let caller = binding.identity;

        let (call, guard) = match mutation.loan_id() {
            None => (prepare_call(mutation, None, caller)?, None),
            Some(loan_id) => {
                let guard = self.in_flight.claim(loan_id)?;
                let cached = self.cache.snapshot().loan(loan_id).cloned();
                let loan = match cached {
                    Some(loan) => {
                        // Cheap rejection against the snapshot first.
                        let call = prepare_call(mutation, Some(&loan), caller)?;
                        if !matches!(mutation, Mutation::MakePayment { .. }) {
                            return self.prepared(binding, call, Some(guard));
                        }
                        self.read_loan(&binding, loan_id).await?
                    }
                    None => self.read_loan(&binding, loan_id).await?,
                };
                (prepare_call(mutation, loan.as_ref(), caller)?, Some(guard))
            }
        };
        self.prepared(binding, call, guard)
    }

    fn prepared(
        &self,
        binding: Binding,
        call: LedgerCall,
        guard: Option<LoanGuard>,
    ) -> LifecycleResult<Prepared> {
        if self.session.epoch() != binding.epoch {
            return Err(PreconditionError::SessionChanged.into());
        }
        Ok(Prepared {
            binding,
            call,
            _guard: guard,
        })
    }

    /// Latest ledger view of one loan; `None` if it does not exist.
    async fn read_loan(
        &self,
        binding: &Binding,
        loan_id: LoanId,
    ) -> LifecycleResult<Option<Loan>> {
        let client = binding.client.as_ref();
        let retry = self.reconciler.retry_policy();
        let count = retry.run("loanCount()", || client.loan_count()).await?;
        if loan_id.0 >= count {
            return Ok(None);
        }
        let record = retry.run("getLoan", || client.get_loan(loan_id)).await?;
        let payments = retry
            .run("getLoanPayments", || client.get_loan_payments(loan_id))
            .await?;
        Ok(Some(LoanProjector::project(loan_id, &record, &payments)?))
    }

    async fn commit(
        &self,
        intent: IntentId,
        mutation: &Mutation,
        prepared: Prepared,
    ) -> LifecycleResult<MutationOutcome> {
        let Prepared { binding, call, _guard } = prepared;
        let op = call.operation.name();
        let value = call.value;
        let target = mutation.loan_id();
        let client = binding.client.as_ref();

        let pending = match client.submit(call).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(
                    op,
                    loan_id = ?target,
                    identity = %binding.identity,
                    error = %e,
                    "submission rejected"
                );
                return Err(e.into());
            }
        };
        info!(
            op,
            loan_id = ?target,
            tx = %pending.hash,
            identity = %binding.identity,
            intent = %intent,
            value = %value,
            "submitted; awaiting finality"
        );

        match tokio::time::timeout(self.finality_timeout, client.await_finality(&pending)).await {
            Ok(Ok(receipt)) => {
                let loan_id = target.or_else(|| receipt.created_loan());
                info!(op, loan_id = ?loan_id, tx = %receipt.tx, block = receipt.block, "finalized");
                Ok(self.after_confirmed(intent, &binding, receipt.tx, loan_id).await)
            }
            Ok(Err(source)) => {
                warn!(
                    op,
                    loan_id = ?target,
                    tx = %pending.hash,
                    error = %source,
                    "finality failed; reconciling"
                );
                let reconciliation = self.after_unknown(&binding, target).await;
                Err(LifecycleError::Finality {
                    source,
                    reconciliation,
                })
            }
            Err(_) => {
                warn!(
                    op,
                    loan_id = ?target,
                    tx = %pending.hash,
                    waited_ms = self.finality_timeout.as_millis() as u64,
                    "stopped waiting for finality; reconciling"
                );
                let reconciliation = self.after_unknown(&binding, target).await;
                Err(LifecycleError::Indeterminate {
                    tx: pending.hash,
                    waited: self.finality_timeout,
                    reconciliation,
                })
            }
        }
    }

    async fn after_confirmed(
        &self,
        intent: IntentId,
        binding: &Binding,
        tx: TxHash,
        loan_id: Option<LoanId>,
    ) -> MutationOutcome {
        let (status, warning) = match self.refresh(binding).await {
            Ok(snapshot) => match skipped_reason(&snapshot, loan_id) {
                Some(reason) => {
                    warn!(loan_id = ?loan_id, tx = %tx, reason = %reason, "confirmed loan could not be re-read");
                    (
                        None,
                        Some(StaleViewWarning {
                            loan_id,
                            reason: reason.to_owned(),
                        }),
                    )
                }
                None => (status_of(&snapshot, loan_id), None),
            },
            Err(e) => {
                warn!(loan_id = ?loan_id, tx = %tx, error = %e, "confirmed write left a stale view");
                (
                    None,
                    Some(StaleViewWarning {
                        loan_id,
                        reason: e.to_string(),
                    }),
                )
            }
        };
        MutationOutcome {
            intent,
            tx,
            loan_id,
            status,
            warning,
        }
    }

    async fn after_unknown(&self, binding: &Binding, loan_id: Option<LoanId>) -> Reconciliation {
        match self.refresh(binding).await {
            Ok(snapshot) => Reconciliation {
                refreshed: true,
                status: status_of(&snapshot, loan_id),
            },
            Err(e) => {
                warn!(loan_id = ?loan_id, error = %e, "reconciliation after unknown outcome failed");
                Reconciliation {
                    refreshed: false,
                    status: None,
                }
            }
        }
    }

    /// Rebuild the cache under `binding`, unless the identity moved on.
    async fn refresh(&self, binding: &Binding) -> CacheResult<Arc<Snapshot>> {
        let current = self.session.epoch();
        if current != binding.epoch {
            return Err(CacheError::Superseded {
                built_for: binding.epoch,
                current,
            });
        }
        self.cache
            .refresh(&self.reconciler, binding.client.as_ref(), binding.epoch)
            .await
    }
}

fn status_of(snapshot: &Snapshot, loan_id: Option<LoanId>) -> Option<LoanStatus> {
    loan_id.and_then(|id| snapshot.loan(id)).map(|loan| loan.status)
}

fn skipped_reason(snapshot: &Snapshot, loan_id: Option<LoanId>) -> Option<&str> {
    let id = loan_id?;
    snapshot
        .skipped
        .iter()
        .find(|s| s.loan_id == id)
        .map(|s| s.reason.as_str())
}
