//! Reconciliation cache for LendLine.
//!
//! Holds the process-wide snapshot of every loan plus the caller's
//! borrower/lender index. Snapshots are rebuilt wholesale from the ledger
//! and swapped in atomically: readers see the old complete snapshot or the
//! new complete snapshot, never a mix.

pub mod cache;
pub mod error;
pub mod reconciler;
pub mod retry;
pub mod snapshot;

pub use cache::{LoadingGuard, ReconciliationCache};
pub use error::{CacheError, CacheResult};
pub use reconciler::Reconciler;
pub use retry::RetryPolicy;
pub use snapshot::{history_anomalies, HistoryAnomaly, MyLoans, SkippedLoan, Snapshot};
