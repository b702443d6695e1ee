//! Session and identity binding for LendLine.
//!
//! Tracks which identity the process acts as and keeps exactly one ledger
//! client bound to it. Every rebind advances the session epoch so work
//! started under an earlier identity can detect that it is stale.

pub mod binding;
pub mod error;
pub mod store;
pub mod wallet;

pub use binding::{Binding, SessionBinding, SessionChange};
pub use error::{SessionError, SessionResult};
pub use store::IdentityStore;
pub use wallet::{IdentityEvent, InMemoryWallet, WalletProvider};
