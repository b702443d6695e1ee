//! Loan projection for LendLine.
//!
//! Converts raw ledger records into the canonical [`Loan`] entity:
//! smallest-unit integers become [`lendline_types::Amount`], Unix seconds
//! become absolute instants, and status codes become [`lendline_types::LoanStatus`].
//! Projection is deterministic and side-effect free.

pub mod error;
pub mod loan;
pub mod projector;

pub use error::ProjectionError;
pub use loan::{Loan, Payment};
pub use projector::LoanProjector;
