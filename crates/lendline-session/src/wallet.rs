use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use lendline_ledger::Signer;
use lendline_types::Address;

use crate::error::{SessionError, SessionResult};

/// Notification that the provider's active identity changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdentityEvent {
    /// A different identity is now active.
    Changed(Signer),
    /// No identity is active any more.
    Disconnected,
}

/// The external identity and signing provider.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Ask for a signing identity. May prompt the user; fails when no
    /// provider is present or the user refuses.
    async fn connect(&self) -> SessionResult<Signer>;

    /// The already authorized identity, if any, without prompting.
    async fn authorized(&self) -> SessionResult<Option<Signer>>;

    fn subscribe(&self) -> broadcast::Receiver<IdentityEvent>;
}

const EVENT_CAPACITY: usize = 16;

#[derive(Debug)]
struct WalletState {
    present: bool,
    refuse: Option<String>,
    active: Option<Address>,
    authorized: bool,
}

/// Scriptable provider for tests and local tooling.
pub struct InMemoryWallet {
    name: String,
    state: Mutex<WalletState>,
    events: broadcast::Sender<IdentityEvent>,
}

impl InMemoryWallet {
    /// A provider whose active account has not yet been authorized.
    pub fn new(account: Address) -> Self {
        Self::build(true, Some(account), false)
    }

    /// A provider that already authorized `account` in an earlier session.
    pub fn authorized_as(account: Address) -> Self {
        Self::build(true, Some(account), true)
    }

    /// No provider installed; every connect fails.
    pub fn absent() -> Self {
        Self::build(false, None, false)
    }

    fn build(present: bool, active: Option<Address>, authorized: bool) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            name: "in-memory".into(),
            state: Mutex::new(WalletState {
                present,
                refuse: None,
                active,
                authorized,
            }),
            events,
        }
    }

    /// Refuse the next connection prompts with `reason`, or stop refusing.
    pub fn set_refusal(&self, reason: Option<&str>) {
        self.state().refuse = reason.map(str::to_string);
    }

    pub fn active(&self) -> Option<Address> {
        self.state().active
    }

    /// Switch the active account and notify subscribers.
    pub fn switch_account(&self, account: Address) {
        {
            let mut state = self.state();
            state.active = Some(account);
            state.authorized = true;
        }
        debug!(account = %account, "wallet account switched");
        let _ = self
            .events
            .send(IdentityEvent::Changed(self.signer(account)));
    }

    /// Change the account the next connection prompt hands out, without
    /// notifying anyone.
    pub fn select_account(&self, account: Address) {
        self.state().active = Some(account);
    }

    /// Drop the active account and notify subscribers.
    pub fn disconnect(&self) {
        {
            let mut state = self.state();
            state.active = None;
            state.authorized = false;
        }
        debug!("wallet disconnected");
        let _ = self.events.send(IdentityEvent::Disconnected);
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn signer(&self, account: Address) -> Signer {
        Signer::new(account, self.name.clone())
    }

    fn state(&self) -> MutexGuard<'_, WalletState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl WalletProvider for InMemoryWallet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> SessionResult<Signer> {
        let account = {
            let mut state = self.state();
            if !state.present {
                return Err(SessionError::NoProvider);
            }
            if let Some(reason) = &state.refuse {
                return Err(SessionError::Rejected(reason.clone()));
            }
            let account = state
                .active
                .ok_or_else(|| SessionError::Rejected("no account available".into()))?;
            state.authorized = true;
            account
        };
        Ok(self.signer(account))
    }

    async fn authorized(&self) -> SessionResult<Option<Signer>> {
        let state = self.state();
        if !state.present {
            return Err(SessionError::NoProvider);
        }
        let active = if state.authorized { state.active } else { None };
        drop(state);
        Ok(active.map(|a| self.signer(a)))
    }

    fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }
}
