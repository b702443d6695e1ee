use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use lendline_ledger::LedgerClient;

use crate::error::{CacheError, CacheResult};
use crate::reconciler::Reconciler;
use crate::snapshot::{history_anomalies, Snapshot};

struct Slot {
    snapshot: Arc<Snapshot>,
    /// Ticket of the load that produced `snapshot`.
    ticket: u64,
}

/// Process-wide holder of the current [`Snapshot`].
///
/// Replacement is copy-on-write: readers clone the `Arc` and keep a
/// complete snapshot for as long as they hold it. A snapshot built for an
/// older session epoch, or by a load that started before the installed
/// one, is refused.
pub struct ReconciliationCache {
    slot: RwLock<Slot>,
    next_ticket: AtomicU64,
    loading: AtomicUsize,
}

/// Marks a load in progress for [`ReconciliationCache::is_loading`].
pub struct LoadingGuard<'a> {
    cache: &'a ReconciliationCache,
    ticket: u64,
}

impl LoadingGuard<'_> {
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.cache.loading.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for ReconciliationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconciliationCache {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Slot {
                snapshot: Arc::new(Snapshot::empty(0)),
                ticket: 0,
            }),
            next_ticket: AtomicU64::new(1),
            loading: AtomicUsize::new(0),
        }
    }

    /// The current complete snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.read().snapshot)
    }

    pub fn epoch(&self) -> u64 {
        self.read().snapshot.epoch
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst) > 0
    }

    pub fn begin_load(&self) -> LoadingGuard<'_> {
        self.loading.fetch_add(1, Ordering::SeqCst);
        LoadingGuard {
            cache: self,
            ticket: self.next_ticket.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Drop everything and start over empty for `epoch`.
    ///
    /// Any load still running for an earlier epoch will be refused when it
    /// tries to install.
    pub fn reset(&self, epoch: u64) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let mut slot = self.write();
        if epoch < slot.snapshot.epoch {
            return;
        }
        slot.snapshot = Arc::new(Snapshot::empty(epoch));
        slot.ticket = ticket;
        debug!(epoch, "reconciliation cache reset");
    }

    /// Install a snapshot produced outside [`refresh`](Self::refresh).
    pub fn install(&self, snapshot: Snapshot) -> CacheResult<Arc<Snapshot>> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        self.install_as(ticket, snapshot)
    }

    /// Rebuild from `client` for `epoch` and install the result.
    ///
    /// If a load for the same epoch that began later has already installed,
    /// that snapshot is at least as fresh as this one and is returned
    /// instead.
    pub async fn refresh(
        &self,
        reconciler: &Reconciler,
        client: &dyn LedgerClient,
        epoch: u64,
    ) -> CacheResult<Arc<Snapshot>> {
        let guard = self.begin_load();
        let snapshot = reconciler.rebuild(client, epoch).await?;
        match self.install_as(guard.ticket(), snapshot) {
            Err(CacheError::Superseded { built_for, current }) if built_for == current => {
                let installed = self.snapshot();
                if installed.epoch != epoch {
                    return Err(CacheError::Superseded {
                        built_for: epoch,
                        current: installed.epoch,
                    });
                }
                debug!(epoch, ticket = guard.ticket(), "newer load already installed");
                Ok(installed)
            }
            other => other,
        }
    }

    fn install_as(&self, ticket: u64, snapshot: Snapshot) -> CacheResult<Arc<Snapshot>> {
        let mut slot = self.write();
        let current = slot.snapshot.epoch;
        if snapshot.epoch < current || (snapshot.epoch == current && ticket < slot.ticket) {
            debug!(
                built_for = snapshot.epoch,
                current, ticket, "refusing superseded snapshot"
            );
            return Err(CacheError::Superseded {
                built_for: snapshot.epoch,
                current,
            });
        }

        if snapshot.epoch == current && snapshot.identity == slot.snapshot.identity {
            for anomaly in history_anomalies(&slot.snapshot, &snapshot) {
                warn!(?anomaly, "ledger history contradicts previous snapshot");
            }
        }

        let snapshot = Arc::new(snapshot);
        slot.snapshot = Arc::clone(&snapshot);
        slot.ticket = ticket;
        Ok(snapshot)
    }

    fn read(&self) -> RwLockReadGuard<'_, Slot> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slot> {
        self.slot.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use async_trait::async_trait;
    use lendline_ledger::{
        FinalityError, FinalityReceipt, InMemoryLedger, InMemoryLedgerClient, LedgerCall,
        LedgerOperation, LedgerQuery, PendingTx, QueryError, QueryResponse, SubmissionError,
    };
    use lendline_types::{Address, Amount, LoanId};
    use proptest::prelude::*;
    use tokio::sync::Notify;

    use super::*;
    use crate::snapshot::tests::loan;

    fn snapshot(epoch: u64, ids: &[u64]) -> Snapshot {
        Snapshot {
            loans: ids.iter().map(|id| loan(*id, 0, &[])).collect(),
            ..Snapshot::empty(epoch)
        }
    }

    #[test]
    fn starts_empty_and_idle() {
        let cache = ReconciliationCache::new();
        assert!(cache.snapshot().loans.is_empty());
        assert!(!cache.is_loading());
    }

    #[test]
    fn readers_keep_their_snapshot_across_replace() {
        let cache = ReconciliationCache::new();
        cache.install(snapshot(0, &[0])).unwrap();
        let held = cache.snapshot();
        cache.install(snapshot(0, &[0, 1])).unwrap();
        assert_eq!(held.loans.len(), 1);
        assert_eq!(cache.snapshot().loans.len(), 2);
    }

    #[test]
    fn older_epoch_is_refused() {
        let cache = ReconciliationCache::new();
        cache.reset(2);
        assert_eq!(
            cache.install(snapshot(1, &[0])),
            Err(CacheError::Superseded {
                built_for: 1,
                current: 2
            })
        );
        assert!(cache.snapshot().loans.is_empty());
    }

    #[test]
    fn older_load_loses_to_newer_install() {
        let cache = ReconciliationCache::new();
        let early = cache.begin_load();
        let late = cache.begin_load();
        assert!(cache.is_loading());
        cache.install_as(late.ticket(), snapshot(0, &[0, 1])).unwrap();
        assert!(cache.install_as(early.ticket(), snapshot(0, &[0])).is_err());
        assert_eq!(cache.snapshot().loans.len(), 2);
        drop(early);
        drop(late);
        assert!(!cache.is_loading());
    }

    #[test]
    fn reset_clears_for_new_epoch() {
        let cache = ReconciliationCache::new();
        cache.install(snapshot(0, &[0, 1])).unwrap();
        cache.reset(1);
        assert_eq!(cache.epoch(), 1);
        assert!(cache.snapshot().loans.is_empty());
    }

    #[tokio::test]
    async fn refresh_installs_rebuilt_snapshot() {
        let ledger = InMemoryLedger::new();
        let alice = Address::derive("alice");
        let client = ledger.client(alice);
        let pending = client
            .submit(
                LedgerCall::new(LedgerOperation::RequestLoan {
                    amount: Amount::from_units(5),
                    interest_bps: 0,
                    duration_secs: 86_400,
                    purpose: "seed".into(),
                })
                .with_value(Amount::from_units(1)),
            )
            .await
            .unwrap();
        client.await_finality(&pending).await.unwrap();

        let cache = ReconciliationCache::new();
        cache.reset(1);
        let snap = cache
            .refresh(&Reconciler::default(), &client, 1)
            .await
            .unwrap();
        assert_eq!(snap.loans.len(), 1);
        assert!(cache.snapshot().my_loans.as_borrower.contains(&LoanId(0)));
        assert!(!cache.is_loading());
    }

    /// Holds its first query until the gate opens.
    struct Gated {
        inner: InMemoryLedgerClient,
        gate: Notify,
        entered: AtomicBool,
    }

    #[async_trait]
    impl LedgerClient for Gated {
        fn caller(&self) -> Address {
            self.inner.caller()
        }

        async fn submit(&self, call: LedgerCall) -> Result<PendingTx, SubmissionError> {
            self.inner.submit(call).await
        }

        async fn await_finality(
            &self,
            pending: &PendingTx,
        ) -> Result<FinalityReceipt, FinalityError> {
            self.inner.await_finality(pending).await
        }

        async fn query(&self, query: &LedgerQuery) -> Result<QueryResponse, QueryError> {
            if !self.entered.swap(true, Ordering::SeqCst) {
                self.gate.notified().await;
            }
            self.inner.query(query).await
        }
    }

    #[tokio::test]
    async fn earlier_load_finishing_last_returns_newer_snapshot() {
        let ledger = InMemoryLedger::new();
        let alice = Address::derive("alice");
        let client = ledger.client(alice);
        let pending = client
            .submit(
                LedgerCall::new(LedgerOperation::RequestLoan {
                    amount: Amount::from_units(5),
                    interest_bps: 0,
                    duration_secs: 86_400,
                    purpose: "seed".into(),
                })
                .with_value(Amount::from_units(1)),
            )
            .await
            .unwrap();
        client.await_finality(&pending).await.unwrap();

        let slow = Gated {
            inner: ledger.client(alice),
            gate: Notify::new(),
            entered: AtomicBool::new(false),
        };
        let cache = ReconciliationCache::new();
        let reconciler = Reconciler::default();
        let (early, late) = tokio::join!(cache.refresh(&reconciler, &slow, 0), async {
            let installed = cache.refresh(&reconciler, &client, 0).await;
            slow.gate.notify_one();
            installed
        });

        let early = early.unwrap();
        let late = late.unwrap();
        assert!(Arc::ptr_eq(&early, &late));
        assert!(Arc::ptr_eq(&cache.snapshot(), &late));
        assert_eq!(early.loans.len(), 1);
        assert!(!cache.is_loading());
    }

    proptest! {
        #[test]
        fn installed_epoch_never_decreases(epochs in prop::collection::vec(0u64..6, 1..20)) {
            let cache = ReconciliationCache::new();
            let mut high = 0;
            for epoch in epochs {
                let accepted = cache.install(snapshot(epoch, &[])).is_ok();
                prop_assert_eq!(accepted, epoch >= high);
                high = high.max(epoch);
                prop_assert_eq!(cache.epoch(), high);
            }
        }
    }
}
