//! Loan lifecycle orchestration for LendLine.
//!
//! Every mutation follows the same protocol: validate against the current
//! snapshot without touching the network, submit and wait for finality,
//! then rebuild the reconciliation cache. Local state is never updated
//! ahead of ledger confirmation, and nothing is resubmitted automatically.

pub mod error;
pub mod guard;
pub mod intent;
pub mod orchestrator;
pub mod validation;

pub use error::{
    LifecycleError, LifecycleResult, PreconditionError, Reconciliation, StaleViewWarning,
};
pub use guard::{InFlightLoans, IssuedIntents, LoanGuard, DEFAULT_INTENT_MEMORY};
pub use intent::{LoanTerms, Mutation, MutationIntent, MutationOutcome};
pub use orchestrator::LifecycleOrchestrator;
pub use validation::{available_actions, check_action, prepare_call};
