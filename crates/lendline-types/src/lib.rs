//! Foundation types for LendLine.
//!
//! This crate provides the identity, monetary, and lifecycle types shared by
//! every other LendLine crate. It has no knowledge of the ledger transport.
//!
//! # Key Types
//!
//! - [`Address`]: 20-byte ledger identity; [`Address::ZERO`] is the "unset" sentinel
//! - [`Amount`]: 18-decimal fixed-point amount held in the ledger's smallest unit
//! - [`LoanId`]: ledger-assigned loan sequence number
//! - [`LoanStatus`]: closed set of six lifecycle states
//! - [`LoanAction`]: the five mutating operations and their legality table
//! - [`IntentId`]: UUID v7 identity of one caller-initiated mutation

pub mod address;
pub mod amount;
pub mod error;
pub mod intent;
pub mod loan;

pub use address::Address;
pub use amount::Amount;
pub use error::TypeError;
pub use intent::IntentId;
pub use loan::{LoanAction, LoanId, LoanStatus, LEGAL_TRANSITIONS, SECONDS_PER_DAY};
