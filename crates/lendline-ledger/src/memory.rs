use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use lendline_types::{Address, Amount, LoanId, LoanStatus, SECONDS_PER_DAY};

use crate::error::{ClockError, ConnectError, FinalityError, QueryError, SubmissionError};
use crate::records::{
    FinalityReceipt, LedgerCall, LedgerEvent, LedgerOperation, LedgerQuery, PendingTx,
    QueryResponse, RawLoanRecord, RawPaymentRecord, Signer, TxHash,
};
use crate::traits::{LedgerClient, LedgerConnector};

/// Ledger clock at genesis (Unix seconds).
pub const GENESIS_TIME: u64 = 1_700_000_000;
/// Seconds the ledger clock advances per mined block.
pub const BLOCK_TIME_SECS: u64 = 12;
/// Spacing between installment due dates.
pub const PAYMENT_PERIOD_SECS: u64 = 30 * SECONDS_PER_DAY;

const BPS_DENOMINATOR: u128 = 10_000;

/// Injected outcome for the next finality wait.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinalityFault {
    /// The transaction reverts during confirmation; nothing is applied.
    Revert(String),
    /// The transaction is mined and applied but finality is never reported.
    TimeOut,
    /// The transaction is dropped by a reorganization; nothing is applied.
    Reorganize,
}

/// Durable contract state. Serializable so local tools can keep a ledger
/// in a file between runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    pub loans: Vec<RawLoanRecord>,
    pub payments: Vec<Vec<RawPaymentRecord>>,
    pub borrower_loans: BTreeMap<Address, Vec<u64>>,
    pub lender_loans: BTreeMap<Address, Vec<u64>>,
    pub block: u64,
    pub clock: u64,
    pub nonce: u64,
}

impl Default for LedgerState {
    fn default() -> Self {
        Self {
            loans: Vec::new(),
            payments: Vec::new(),
            borrower_loans: BTreeMap::new(),
            lender_loans: BTreeMap::new(),
            block: 0,
            clock: GENESIS_TIME,
            nonce: 0,
        }
    }
}

struct QueuedTx {
    call: LedgerCall,
    caller: Address,
}

#[derive(Default)]
struct Chain {
    state: LedgerState,
    queued: HashMap<TxHash, QueuedTx>,
    finalized: HashMap<TxHash, FinalityReceipt>,
}

#[derive(Default)]
struct Faults {
    transient_queries: usize,
    malformed_queries: usize,
    rejected_submissions: VecDeque<String>,
    finality: VecDeque<FinalityFault>,
    status_overrides: BTreeMap<u64, u8>,
    finality_delay: Duration,
}

#[derive(Default)]
struct Shared {
    chain: Mutex<Chain>,
    faults: Mutex<Faults>,
    submissions: AtomicU64,
    queries: AtomicU64,
}

/// In-memory loan ledger for tests, local demos, and embedding.
///
/// Behaves like the deployed lending contract: submissions are simulated
/// against current state and queued, and a queued transaction is mined and
/// applied when its finality is awaited. Cloning yields another handle to
/// the same ledger.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    shared: Arc<Shared>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume from previously exported state.
    pub fn from_state(state: LedgerState) -> Self {
        let ledger = Self::default();
        ledger.chain().state = state;
        ledger
    }

    /// Copy of the durable state. Queued transactions are not included.
    pub fn export_state(&self) -> LedgerState {
        self.chain().state.clone()
    }

    /// A client signing as `caller`.
    pub fn client(&self, caller: Address) -> InMemoryLedgerClient {
        InMemoryLedgerClient {
            ledger: self.clone(),
            caller,
        }
    }

    /// Current ledger clock (Unix seconds).
    pub fn now(&self) -> u64 {
        self.chain().state.clock
    }

    /// Move the ledger clock forward, returning the new time.
    pub fn advance_time(&self, secs: u64) -> Result<u64, ClockError> {
        let mut chain = self.chain();
        let clock = chain.state.clock;
        chain.state.clock = clock
            .checked_add(secs)
            .ok_or(ClockError::Overflow { clock, secs })?;
        Ok(chain.state.clock)
    }

    pub fn submission_count(&self) -> u64 {
        self.shared.submissions.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> u64 {
        self.shared.queries.load(Ordering::SeqCst)
    }

    /// Total submissions and queries seen.
    pub fn call_count(&self) -> u64 {
        self.submission_count() + self.query_count()
    }

    pub fn queued_count(&self) -> usize {
        self.chain().queued.len()
    }

    // ---- Fault injection ----

    /// The next `n` queries fail with a transient error.
    pub fn fail_next_queries(&self, n: usize) {
        self.faults().transient_queries = n;
    }

    /// The next `n` queries fail with a malformed-response error.
    pub fn malform_next_queries(&self, n: usize) {
        self.faults().malformed_queries = n;
    }

    /// The next submission is rejected by simulation with `reason`.
    pub fn reject_next_submission(&self, reason: impl Into<String>) {
        self.faults().rejected_submissions.push_back(reason.into());
    }

    /// Queue an outcome for the next finality wait.
    pub fn push_finality_fault(&self, fault: FinalityFault) {
        self.faults().finality.push_back(fault);
    }

    /// Report `code` as the status of `loan_id` in query responses.
    pub fn override_status(&self, loan_id: LoanId, code: u8) {
        self.faults().status_overrides.insert(loan_id.0, code);
    }

    pub fn clear_status_override(&self, loan_id: LoanId) {
        self.faults().status_overrides.remove(&loan_id.0);
    }

    /// Delay applied before every finality wait resolves.
    pub fn set_finality_delay(&self, delay: Duration) {
        self.faults().finality_delay = delay;
    }

    fn chain(&self) -> MutexGuard<'_, Chain> {
        self.shared
            .chain
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.shared
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn submit_as(&self, caller: Address, call: LedgerCall) -> Result<PendingTx, SubmissionError> {
        self.shared.submissions.fetch_add(1, Ordering::SeqCst);
        let operation = call.operation.name().to_string();

        if let Some(reason) = self.faults().rejected_submissions.pop_front() {
            return Err(SubmissionError::Rejected { operation, reason });
        }

        let mut chain = self.chain();
        let Some(now) = chain.state.clock.checked_add(BLOCK_TIME_SECS) else {
            return Err(SubmissionError::Rejected {
                operation,
                reason: "ledger clock exhausted".into(),
            });
        };
        let mut scratch = chain.state.clone();
        if let Err(reason) = execute(&mut scratch, caller, &call, now) {
            return Err(SubmissionError::Rejected { operation, reason });
        }

        chain.state.nonce += 1;
        let hash = tx_hash(&call, caller, chain.state.nonce).map_err(|reason| {
            SubmissionError::Malformed {
                operation: operation.clone(),
                reason,
            }
        })?;
        chain.queued.insert(
            hash,
            QueuedTx {
                call: call.clone(),
                caller,
            },
        );

        debug!(tx = %hash, op = %operation, caller = %caller, "transaction submitted");
        Ok(PendingTx {
            hash,
            operation: call.operation,
            caller,
        })
    }

    async fn finality_of(&self, pending: &PendingTx) -> Result<FinalityReceipt, FinalityError> {
        let delay = self.faults().finality_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let tx = pending.hash;
        let fault = {
            let chain = self.chain();
            if let Some(receipt) = chain.finalized.get(&tx) {
                return Ok(receipt.clone());
            }
            if !chain.queued.contains_key(&tx) {
                return Err(FinalityError::UnknownTransaction { tx });
            }
            drop(chain);
            self.faults().finality.pop_front()
        };

        let mut chain = self.chain();
        let queued = chain
            .queued
            .remove(&tx)
            .ok_or(FinalityError::UnknownTransaction { tx })?;

        match fault {
            Some(FinalityFault::Revert(reason)) => {
                debug!(tx = %tx, %reason, "transaction reverted");
                Err(FinalityError::Reverted { tx, reason })
            }
            Some(FinalityFault::Reorganize) => {
                debug!(tx = %tx, "transaction dropped by reorganization");
                Err(FinalityError::Reorganized { tx })
            }
            Some(FinalityFault::TimeOut) => {
                mine(&mut chain, tx, &queued)?;
                debug!(tx = %tx, "transaction mined; finality withheld");
                Err(FinalityError::TimedOut { tx })
            }
            None => mine(&mut chain, tx, &queued),
        }
    }

    fn answer(&self, query: &LedgerQuery) -> Result<QueryResponse, QueryError> {
        self.shared.queries.fetch_add(1, Ordering::SeqCst);
        {
            let mut faults = self.faults();
            if faults.transient_queries > 0 {
                faults.transient_queries -= 1;
                return Err(QueryError::Transient {
                    query: query.to_string(),
                    reason: "connection reset".into(),
                });
            }
            if faults.malformed_queries > 0 {
                faults.malformed_queries -= 1;
                return Err(QueryError::Malformed {
                    query: query.to_string(),
                    reason: "undecodable response".into(),
                });
            }
        }

        let chain = self.chain();
        let state = &chain.state;
        let response = match query {
            LedgerQuery::LoanCount => QueryResponse::Count(state.loans.len() as u64),
            LedgerQuery::GetLoan(id) => {
                let mut record = state
                    .loans
                    .get(id.0 as usize)
                    .cloned()
                    .ok_or_else(|| QueryError::Malformed {
                        query: query.to_string(),
                        reason: "loan does not exist".into(),
                    })?;
                if let Some(code) = self.faults().status_overrides.get(&id.0) {
                    record.status = *code;
                }
                QueryResponse::Loan(record)
            }
            LedgerQuery::GetLoanPayments(id) => QueryResponse::Payments(
                state.payments.get(id.0 as usize).cloned().unwrap_or_default(),
            ),
            LedgerQuery::GetBorrowerLoans(who) => QueryResponse::LoanIds(
                state.borrower_loans.get(who).cloned().unwrap_or_default(),
            ),
            LedgerQuery::GetLenderLoans(who) => QueryResponse::LoanIds(
                state.lender_loans.get(who).cloned().unwrap_or_default(),
            ),
        };
        Ok(response)
    }
}

#[async_trait]
impl LedgerConnector for InMemoryLedger {
    async fn bind(&self, signer: &Signer) -> Result<Arc<dyn LedgerClient>, ConnectError> {
        if signer.address().is_zero() {
            return Err(ConnectError::NoIdentity);
        }
        Ok(Arc::new(self.client(signer.address())))
    }
}

/// [`LedgerClient`] over an [`InMemoryLedger`], signing as one caller.
#[derive(Clone)]
pub struct InMemoryLedgerClient {
    ledger: InMemoryLedger,
    caller: Address,
}

impl InMemoryLedgerClient {
    pub fn ledger(&self) -> &InMemoryLedger {
        &self.ledger
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedgerClient {
    fn caller(&self) -> Address {
        self.caller
    }

    async fn submit(&self, call: LedgerCall) -> Result<PendingTx, SubmissionError> {
        self.ledger.submit_as(self.caller, call)
    }

    async fn await_finality(&self, pending: &PendingTx) -> Result<FinalityReceipt, FinalityError> {
        self.ledger.finality_of(pending).await
    }

    async fn query(&self, query: &LedgerQuery) -> Result<QueryResponse, QueryError> {
        self.ledger.answer(query)
    }
}

fn mine(chain: &mut Chain, tx: TxHash, queued: &QueuedTx) -> Result<FinalityReceipt, FinalityError> {
    let now = chain
        .state
        .clock
        .checked_add(BLOCK_TIME_SECS)
        .ok_or_else(|| FinalityError::Reverted {
            tx,
            reason: "ledger clock exhausted".into(),
        })?;
    chain.state.block += 1;
    chain.state.clock = now;

    let events = execute(&mut chain.state, queued.caller, &queued.call, now)
        .map_err(|reason| FinalityError::Reverted { tx, reason })?;

    let receipt = FinalityReceipt {
        tx,
        block: chain.state.block,
        events,
    };
    chain.finalized.insert(tx, receipt.clone());
    debug!(tx = %tx, block = receipt.block, "transaction final");
    Ok(receipt)
}

fn tx_hash(call: &LedgerCall, caller: Address, nonce: u64) -> Result<TxHash, String> {
    let encoded = bincode::serialize(call).map_err(|e| e.to_string())?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"lendline-tx-v1:");
    hasher.update(caller.as_bytes());
    hasher.update(&nonce.to_le_bytes());
    hasher.update(&encoded);
    Ok(TxHash(*hasher.finalize().as_bytes()))
}

/// Apply `call` to `state` with the lending contract's rules. On error the
/// state may be partially modified; callers run it on a scratch copy first.
fn execute(
    state: &mut LedgerState,
    caller: Address,
    call: &LedgerCall,
    now: u64,
) -> Result<Vec<LedgerEvent>, String> {
    let value = call.value.as_wei();
    match &call.operation {
        LedgerOperation::RequestLoan {
            amount,
            interest_bps,
            duration_secs,
            purpose,
        } => {
            let amount = amount.as_wei();
            if amount == 0 {
                return Err("loan amount must be positive".into());
            }
            if value == 0 {
                return Err("collateral is required".into());
            }
            if *duration_secs == 0 {
                return Err("duration must be positive".into());
            }
            let interest = amount
                .checked_mul(*interest_bps as u128)
                .map(|v| v / BPS_DENOMINATOR)
                .ok_or("interest overflow")?;
            let total = amount.checked_add(interest).ok_or("total overflow")?;
            let installments = duration_secs.div_ceil(PAYMENT_PERIOD_SECS).max(1) as u128;

            let id = state.loans.len() as u64;
            state.loans.push(RawLoanRecord {
                borrower: caller,
                amount,
                interest_bps: *interest_bps,
                duration_secs: *duration_secs,
                collateral_amount: value,
                lender: Address::ZERO,
                repaid_amount: 0,
                next_payment_due: 0,
                installment_amount: total.div_ceil(installments),
                total_amount_due: total,
                is_defaulted: false,
                status: LoanStatus::Pending.code(),
                purpose: purpose.clone(),
            });
            state.payments.push(Vec::new());
            state.borrower_loans.entry(caller).or_default().push(id);
            Ok(vec![LedgerEvent::LoanRequested {
                loan_id: LoanId(id),
                borrower: caller,
            }])
        }
        LedgerOperation::FundLoan { loan_id } => {
            let loan = loan_mut(state, *loan_id)?;
            if loan.status != LoanStatus::Pending.code() {
                return Err("loan is not pending".into());
            }
            if loan.borrower == caller {
                return Err("borrower cannot fund own loan".into());
            }
            if value != loan.amount {
                return Err("must send the exact loan amount".into());
            }
            loan.lender = caller;
            loan.status = LoanStatus::Funded.code();
            loan.next_payment_due = now
                .checked_add(loan.duration_secs.min(PAYMENT_PERIOD_SECS))
                .ok_or("payment schedule overflow")?;
            let lent = state.lender_loans.entry(caller).or_default();
            if !lent.contains(&loan_id.0) {
                lent.push(loan_id.0);
            }
            Ok(vec![LedgerEvent::LoanFunded {
                loan_id: *loan_id,
                lender: caller,
            }])
        }
        LedgerOperation::MakePayment { loan_id } => {
            let loan = loan_mut(state, *loan_id)?;
            if !is_active(loan.status) {
                return Err("loan is not active".into());
            }
            if loan.borrower != caller {
                return Err("only the borrower can repay".into());
            }
            if value == 0 {
                return Err("payment must be positive".into());
            }
            let remaining = loan
                .total_amount_due
                .checked_sub(loan.repaid_amount)
                .ok_or("repaid amount exceeds total due")?;
            if value > remaining {
                return Err("payment exceeds remaining balance".into());
            }
            let balance = remaining - value;
            loan.repaid_amount = loan.total_amount_due - balance;
            let mut events = vec![LedgerEvent::PaymentMade {
                loan_id: *loan_id,
                amount: Amount::from_wei(value),
            }];
            if balance == 0 {
                loan.status = LoanStatus::Completed.code();
                loan.next_payment_due = 0;
                events.push(LedgerEvent::LoanCompleted { loan_id: *loan_id });
            } else {
                loan.status = LoanStatus::Repaying.code();
                loan.next_payment_due = loan
                    .next_payment_due
                    .checked_add(PAYMENT_PERIOD_SECS)
                    .ok_or("payment schedule overflow")?;
            }
            if let Some(history) = state.payments.get_mut(loan_id.0 as usize) {
                history.push(RawPaymentRecord {
                    amount: value,
                    timestamp: now,
                    remaining_balance: balance,
                });
            }
            Ok(events)
        }
        LedgerOperation::DefaultLoan { loan_id } => {
            let loan = loan_mut(state, *loan_id)?;
            if !is_active(loan.status) {
                return Err("loan is not active".into());
            }
            if loan.lender != caller {
                return Err("only the lender can mark default".into());
            }
            if value != 0 {
                return Err("defaultLoan does not accept value".into());
            }
            loan.status = LoanStatus::Defaulted.code();
            loan.is_defaulted = true;
            loan.next_payment_due = 0;
            Ok(vec![LedgerEvent::LoanDefaulted { loan_id: *loan_id }])
        }
        LedgerOperation::CancelLoan { loan_id } => {
            let loan = loan_mut(state, *loan_id)?;
            if loan.status != LoanStatus::Pending.code() {
                return Err("loan is not pending".into());
            }
            if loan.borrower != caller {
                return Err("only the borrower can cancel".into());
            }
            if value != 0 {
                return Err("cancelLoan does not accept value".into());
            }
            loan.status = LoanStatus::Cancelled.code();
            Ok(vec![LedgerEvent::LoanCancelled { loan_id: *loan_id }])
        }
    }
}

fn loan_mut(state: &mut LedgerState, id: LoanId) -> Result<&mut RawLoanRecord, String> {
    state
        .loans
        .get_mut(id.0 as usize)
        .ok_or_else(|| "loan does not exist".to_string())
}

fn is_active(code: u8) -> bool {
    code == LoanStatus::Funded.code() || code == LoanStatus::Repaying.code()
}
