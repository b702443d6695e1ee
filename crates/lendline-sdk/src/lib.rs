//! # LendLine SDK
//!
//! [`LendingClient`] is the surface presentation layers talk to. It owns
//! the session binding, the reconciliation cache and the lifecycle
//! orchestrator, and wires identity changes from the provider into cache
//! resets and rebuilds.
//!
//! ```no_run
//! use std::sync::Arc;
//! use lendline_ledger::InMemoryLedger;
//! use lendline_sdk::{ClientConfig, LendingClient, LoanView};
//! use lendline_session::InMemoryWallet;
//! use lendline_types::Address;
//!
//! # async fn demo() -> lendline_sdk::SdkResult<()> {
//! let ledger = InMemoryLedger::new();
//! let wallet = Arc::new(InMemoryWallet::new(Address::derive("alice")));
//! let client = LendingClient::new(ClientConfig::default(), wallet, Arc::new(ledger));
//! client.connect().await?;
//! for loan in client.loans(LoanView::AsBorrower) {
//!     println!("{} {}", loan.id, loan.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;

pub use client::{LendingClient, LoanView};
pub use config::{ClientConfig, LedgerEndpoint};
pub use error::{SdkError, SdkResult};

pub use lendline_cache::{MyLoans, RetryPolicy, Snapshot};
pub use lendline_lifecycle::{
    LifecycleError, LoanTerms, Mutation, MutationIntent, MutationOutcome, PreconditionError,
    StaleViewWarning,
};
pub use lendline_projection::{Loan, Payment};
pub use lendline_types::{Address, Amount, LoanAction, LoanId, LoanStatus};
