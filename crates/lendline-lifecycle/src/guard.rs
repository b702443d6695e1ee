use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use lendline_types::{IntentId, LoanId};

use crate::error::PreconditionError;

/// Loans with a mutation between validation and reconciliation.
#[derive(Clone, Default)]
pub struct InFlightLoans {
    loans: Arc<Mutex<HashSet<LoanId>>>,
}

/// Releases its loan when dropped.
pub struct LoanGuard {
    loans: Arc<Mutex<HashSet<LoanId>>>,
    loan_id: LoanId,
}

impl InFlightLoans {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `loan_id`, or fail if another mutation already holds it.
    pub fn claim(&self, loan_id: LoanId) -> Result<LoanGuard, PreconditionError> {
        if !lock(&self.loans).insert(loan_id) {
            debug!(loan_id = %loan_id, "mutation refused: loan busy");
            return Err(PreconditionError::OperationInFlight(loan_id));
        }
        Ok(LoanGuard {
            loans: Arc::clone(&self.loans),
            loan_id,
        })
    }

    pub fn is_busy(&self, loan_id: LoanId) -> bool {
        lock(&self.loans).contains(&loan_id)
    }
}

impl LoanGuard {
    pub fn loan_id(&self) -> LoanId {
        self.loan_id
    }
}

impl Drop for LoanGuard {
    fn drop(&mut self) {
        lock(&self.loans).remove(&self.loan_id);
    }
}

/// Issued intent ids remembered one by one before the oldest are folded
/// into the expiry floor.
pub const DEFAULT_INTENT_MEMORY: usize = 4_096;

/// Intent ids that have been handed to the ledger.
///
/// Holds at most `capacity` ids. Intent ids are time-ordered, so when the
/// set is full the oldest is dropped and becomes the floor: nothing at or
/// below it can be reserved again.
pub struct IssuedIntents {
    log: Mutex<IntentLog>,
    capacity: usize,
}

#[derive(Default)]
struct IntentLog {
    reserved: BTreeSet<IntentId>,
    floor: Option<IntentId>,
}

impl IntentLog {
    fn expired(&self, id: IntentId) -> bool {
        self.floor.is_some_and(|floor| id <= floor)
    }
}

impl Default for IssuedIntents {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_INTENT_MEMORY)
    }
}

impl IssuedIntents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            log: Mutex::default(),
            capacity: capacity.max(1),
        }
    }

    /// Reserve `id` for one execution.
    pub fn reserve(&self, id: IntentId) -> Result<(), PreconditionError> {
        let mut log = lock(&self.log);
        if log.expired(id) {
            return Err(PreconditionError::IntentExpired(id));
        }
        if !log.reserved.insert(id) {
            return Err(PreconditionError::IntentAlreadyIssued(id));
        }
        while log.reserved.len() > self.capacity {
            if let Some(oldest) = log.reserved.pop_first() {
                debug!(intent = %oldest, "oldest issued intent folded into floor");
                log.floor = Some(oldest);
            }
        }
        Ok(())
    }

    /// Give back a reservation that never reached the ledger.
    pub fn release(&self, id: IntentId) {
        lock(&self.log).reserved.remove(&id);
    }

    pub fn contains(&self, id: IntentId) -> bool {
        let log = lock(&self.log);
        log.reserved.contains(&id) || log.expired(id)
    }

    /// Ids currently remembered individually.
    pub fn len(&self) -> usize {
        lock(&self.log).reserved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
