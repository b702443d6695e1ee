use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tracing::{info, warn};

use lendline_ledger::{LedgerClient, LedgerConnector, Signer};
use lendline_types::Address;

use crate::error::{SessionError, SessionResult};
use crate::store::IdentityStore;
use crate::wallet::{IdentityEvent, WalletProvider};

/// The active identity and the one ledger client bound to it.
#[derive(Clone)]
pub struct Binding {
    pub identity: Address,
    pub client: Arc<dyn LedgerClient>,
    /// Session epoch this binding was established in.
    pub epoch: u64,
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("identity", &self.identity)
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

/// What an identity event did to the session.
#[derive(Clone, Debug)]
pub enum SessionChange {
    Bound(Binding),
    Unbound { epoch: u64 },
}

impl SessionChange {
    pub fn epoch(&self) -> u64 {
        match self {
            Self::Bound(binding) => binding.epoch,
            Self::Unbound { epoch } => *epoch,
        }
    }
}

#[derive(Default)]
struct State {
    binding: Option<Binding>,
    epoch: u64,
}

/// Owns the identity binding for the process.
///
/// Identity always comes from the provider's signer. The persisted store
/// only decides whether a silent reconnect is attempted.
pub struct SessionBinding {
    wallet: Arc<dyn WalletProvider>,
    connector: Arc<dyn LedgerConnector>,
    store: Option<IdentityStore>,
    state: RwLock<State>,
}

impl SessionBinding {
    pub fn new(
        wallet: Arc<dyn WalletProvider>,
        connector: Arc<dyn LedgerConnector>,
        store: Option<IdentityStore>,
    ) -> Self {
        Self {
            wallet,
            connector,
            store,
            state: RwLock::new(State::default()),
        }
    }

    /// Prompt the provider for an identity and bind to it.
    pub async fn connect(&self) -> SessionResult<Binding> {
        let signer = self.wallet.connect().await?;
        self.bind(&signer).await
    }

    /// Silent reconnect at startup.
    ///
    /// Only attempted when an identity was remembered; the bound identity is
    /// whatever the provider reports now, which may differ from the stored
    /// one. A stored identity the provider no longer authorizes is forgotten.
    pub async fn restore(&self) -> SessionResult<Option<Binding>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let Some(remembered) = store.load()? else {
            return Ok(None);
        };
        match self.wallet.authorized().await? {
            Some(signer) => {
                if signer.address() != remembered {
                    info!(
                        remembered = %remembered,
                        active = %signer.address(),
                        "provider identity differs from remembered identity"
                    );
                }
                self.bind(&signer).await.map(Some)
            }
            None => {
                info!(remembered = %remembered, "remembered identity no longer authorized");
                store.clear()?;
                Ok(None)
            }
        }
    }

    /// Apply a provider notification.
    pub async fn handle_event(&self, event: IdentityEvent) -> SessionResult<SessionChange> {
        match event {
            IdentityEvent::Changed(signer) => self.bind(&signer).await.map(SessionChange::Bound),
            IdentityEvent::Disconnected => Ok(SessionChange::Unbound {
                epoch: self.unbind(),
            }),
        }
    }

    /// Drop the binding and forget the remembered identity. Returns the new
    /// epoch.
    pub fn unbind(&self) -> u64 {
        let epoch = {
            let mut state = self.write();
            state.binding = None;
            state.epoch += 1;
            state.epoch
        };
        if let Some(store) = &self.store {
            if let Err(e) = store.clear() {
                warn!(error = %e, "failed to clear identity store");
            }
        }
        info!(epoch, "identity unbound");
        epoch
    }

    pub fn current(&self) -> Option<Binding> {
        self.read().binding.clone()
    }

    /// The current binding, or [`SessionError::NotConnected`].
    pub fn require(&self) -> SessionResult<Binding> {
        self.current().ok_or(SessionError::NotConnected)
    }

    pub fn identity(&self) -> Option<Address> {
        self.read().binding.as_ref().map(|b| b.identity)
    }

    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.wallet.subscribe()
    }

    async fn bind(&self, signer: &Signer) -> SessionResult<Binding> {
        let client = self.connector.bind(signer).await?;
        let identity = client.caller();
        let binding = {
            let mut state = self.write();
            state.epoch += 1;
            let binding = Binding {
                identity,
                client,
                epoch: state.epoch,
            };
            state.binding = Some(binding.clone());
            binding
        };
        if let Some(store) = &self.store {
            if let Err(e) = store.save(identity) {
                warn!(error = %e, "failed to persist identity");
            }
        }
        info!(
            identity = %identity,
            provider = signer.provider(),
            epoch = binding.epoch,
            "identity bound"
        );
        Ok(binding)
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
