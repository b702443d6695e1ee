use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lendline_cache::{MyLoans, Reconciler, ReconciliationCache, Snapshot};
use lendline_ledger::LedgerConnector;
use lendline_lifecycle::{
    available_actions, LifecycleOrchestrator, LoanTerms, MutationIntent, MutationOutcome,
};
use lendline_projection::Loan;
use lendline_session::{
    Binding, IdentityEvent, IdentityStore, SessionBinding, SessionChange, SessionError,
    WalletProvider,
};
use lendline_types::{Address, Amount, LoanAction, LoanId};

use crate::config::ClientConfig;
use crate::error::SdkResult;

/// Which loans a listing shows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanView {
    #[default]
    All,
    AsBorrower,
    AsLender,
}

/// Identity, loan views and lifecycle operations behind one handle.
pub struct LendingClient {
    config: ClientConfig,
    session: Arc<SessionBinding>,
    cache: Arc<ReconciliationCache>,
    reconciler: Reconciler,
    orchestrator: LifecycleOrchestrator,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl LendingClient {
    pub fn new(
        config: ClientConfig,
        wallet: Arc<dyn WalletProvider>,
        connector: Arc<dyn LedgerConnector>,
    ) -> Self {
        let store = config.identity_store.clone().map(IdentityStore::new);
        let session = Arc::new(SessionBinding::new(wallet, connector, store));
        let cache = Arc::new(ReconciliationCache::new());
        let reconciler = Reconciler::new(config.reconcile_retry.clone());
        let orchestrator = LifecycleOrchestrator::new(
            Arc::clone(&session),
            Arc::clone(&cache),
            reconciler.clone(),
            config.finality_timeout(),
        );
        Self {
            config,
            session,
            cache,
            reconciler,
            orchestrator,
            listener: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ---- Identity ----

    /// Ask the provider for an identity, bind it and load the ledger.
    pub async fn connect(&self) -> SdkResult<Address> {
        let binding = self.session.connect().await?;
        self.cache.reset(binding.epoch);
        self.listen();
        self.reload(&binding).await?;
        Ok(binding.identity)
    }

    /// Silent reconnect if an identity was remembered and the provider
    /// still authorizes one.
    pub async fn restore(&self) -> SdkResult<Option<Address>> {
        let Some(binding) = self.session.restore().await? else {
            return Ok(None);
        };
        self.cache.reset(binding.epoch);
        self.listen();
        self.reload(&binding).await?;
        Ok(Some(binding.identity))
    }

    /// Drop the identity and everything loaded under it.
    pub fn disconnect(&self) {
        let epoch = self.session.unbind();
        self.cache.reset(epoch);
    }

    pub fn identity(&self) -> Option<Address> {
        self.session.identity()
    }

    /// Apply an identity event. The background listener calls this for
    /// every provider notification.
    pub async fn handle_identity_event(&self, event: IdentityEvent) -> SdkResult<()> {
        apply_identity_event(&self.session, &self.cache, &self.reconciler, event).await
    }

    /// Follow provider identity events in the background.
    ///
    /// Subscribes at most once per client; later calls return `false`.
    pub fn listen(&self) -> bool {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.is_some() {
            return false;
        }
        let events = self.session.subscribe();
        let session = Arc::clone(&self.session);
        let cache = Arc::clone(&self.cache);
        let reconciler = self.reconciler.clone();
        *listener = Some(tokio::spawn(follow_identity(
            events, session, cache, reconciler,
        )));
        debug!("identity listener started");
        true
    }

    // ---- Reads ----

    /// The current complete snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.cache.snapshot()
    }

    /// Every loan, ordered by id.
    pub fn list_loans(&self) -> Vec<Loan> {
        self.cache.snapshot().loans.clone()
    }

    pub fn my_loans(&self) -> MyLoans {
        self.cache.snapshot().my_loans.clone()
    }

    pub fn loans(&self, view: LoanView) -> Vec<Loan> {
        let snapshot = self.cache.snapshot();
        match view {
            LoanView::All => snapshot.loans.clone(),
            LoanView::AsBorrower => snapshot.borrowed().cloned().collect(),
            LoanView::AsLender => snapshot.lent().cloned().collect(),
        }
    }

    pub fn loan(&self, id: LoanId) -> Option<Loan> {
        self.cache.snapshot().loan(id).cloned()
    }

    /// Actions the connected identity may take on `id` right now.
    pub fn available_actions(&self, id: LoanId) -> Vec<LoanAction> {
        match (self.identity(), self.loan(id)) {
            (Some(who), Some(loan)) => available_actions(&loan, who),
            _ => Vec::new(),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.cache.is_loading()
    }

    /// Rebuild the snapshot from the ledger now.
    pub async fn refresh(&self) -> SdkResult<Arc<Snapshot>> {
        let binding = self.session.require()?;
        self.reload(&binding).await
    }

    // ---- Mutations ----

    pub async fn execute(&self, intent: MutationIntent) -> SdkResult<MutationOutcome> {
        Ok(self.orchestrator.execute(intent).await?)
    }

    pub async fn request_loan(&self, terms: LoanTerms) -> SdkResult<MutationOutcome> {
        Ok(self.orchestrator.request_loan(terms).await?)
    }

    pub async fn fund_loan(&self, id: LoanId, amount: Amount) -> SdkResult<MutationOutcome> {
        Ok(self.orchestrator.fund_loan(id, amount).await?)
    }

    pub async fn make_payment(&self, id: LoanId) -> SdkResult<MutationOutcome> {
        Ok(self.orchestrator.make_payment(id).await?)
    }

    pub async fn default_loan(&self, id: LoanId) -> SdkResult<MutationOutcome> {
        Ok(self.orchestrator.default_loan(id).await?)
    }

    pub async fn cancel_loan(&self, id: LoanId) -> SdkResult<MutationOutcome> {
        Ok(self.orchestrator.cancel_loan(id).await?)
    }

    async fn reload(&self, binding: &Binding) -> SdkResult<Arc<Snapshot>> {
        Ok(self
            .cache
            .refresh(&self.reconciler, binding.client.as_ref(), binding.epoch)
            .await?)
    }
}

impl Drop for LendingClient {
    fn drop(&mut self) {
        let listener = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = listener.take() {
            handle.abort();
        }
    }
}

async fn follow_identity(
    mut events: tokio::sync::broadcast::Receiver<IdentityEvent>,
    session: Arc<SessionBinding>,
    cache: Arc<ReconciliationCache>,
    reconciler: Reconciler,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Err(e) = apply_identity_event(&session, &cache, &reconciler, event).await {
                    warn!(error = %e, "identity change not fully applied");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "identity events dropped; latest event still applies");
            }
            Err(RecvError::Closed) => {
                debug!("identity provider closed its event stream");
                break;
            }
        }
    }
}

async fn apply_identity_event(
    session: &SessionBinding,
    cache: &ReconciliationCache,
    reconciler: &Reconciler,
    event: IdentityEvent,
) -> SdkResult<()> {
    match session.handle_event(event).await {
        Ok(SessionChange::Bound(binding)) => {
            info!(identity = %binding.identity, epoch = binding.epoch, "identity changed; reloading");
            cache.reset(binding.epoch);
            cache
                .refresh(reconciler, binding.client.as_ref(), binding.epoch)
                .await?;
            Ok(())
        }
        Ok(SessionChange::Unbound { epoch }) => {
            cache.reset(epoch);
            Ok(())
        }
        Err(e @ SessionError::Connect(_)) => {
            // The old binding is gone from the provider's side; do not keep
            // acting as it.
            let epoch = session.unbind();
            cache.reset(epoch);
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}
