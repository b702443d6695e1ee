//! Ledger client boundary for LendLine.
//!
//! The authoritative loan ledger is remote, append-only, and consensus
//! ordered. This crate provides:
//! - `LedgerClient` / `LedgerConnector` trait boundaries (submit, await
//!   finality, query; bind a client to a signing identity)
//! - Typed operations and queries whose names map 1:1 to the ledger's
//! - Raw loan and payment records as the ledger returns them
//! - `InMemoryLedger`, a simulated loan contract with fault injection for
//!   tests, local demos, and embedding

pub mod error;
pub mod memory;
pub mod records;
pub mod traits;

pub use error::{ClockError, ConnectError, FinalityError, QueryError, SubmissionError};
pub use memory::{FinalityFault, InMemoryLedger, InMemoryLedgerClient, LedgerState};
pub use records::{
    FinalityReceipt, LedgerCall, LedgerEvent, LedgerOperation, LedgerQuery, PendingTx,
    QueryResponse, RawLoanRecord, RawPaymentRecord, Signer, TxHash,
};
pub use traits::{LedgerClient, LedgerConnector, LedgerQueries};
