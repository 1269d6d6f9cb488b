//! Purchase lifecycle engine.
//!
//! One dispatcher task drains the store's event stream in order and hands each
//! event to a worker task owned by the event's item. Workers process their
//! queue sequentially, so an item never has two validations running, while
//! different items proceed concurrently. Entitlement writes are serialized.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::{Notify, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use entitle_catalog::PurchasableItem;
use entitle_core::{AggregateRoot, AttemptId, DomainError, ItemId, TransactionId, execute};
use entitle_events::{PurchaseEvent, PurchaseFailed, PurchaseUpdated, Subscription};
use entitle_infra::{
    CURRENT_SUBSCRIPTION_KEY, EntitlementStore, ManagementSurface, PurchaseRoute,
    ReceiptValidator, StoreClient, ValidationVerdict,
};

use crate::config::EngineConfig;
use crate::error::{PurchaseError, RejectionReason};
use crate::lifecycle::{
    AbandonRequest, BeginValidation, Cancel, Complete, Decision, Fail, LifecycleCommand,
    LifecycleEvent, LifecycleSnapshot, PurchaseLifecycle, PurchaseState, RequestPurchase, decide,
};
use crate::management::management_url;
use crate::notice::PurchaseNotice;

const NOTICE_CAPACITY: usize = 64;
const ACKNOWLEDGED_CAPACITY: usize = 256;

/// External collaborators the engine drives.
#[derive(Clone)]
pub struct EnginePorts {
    pub store: Arc<dyn StoreClient>,
    pub validator: Arc<dyn ReceiptValidator>,
    pub entitlements: Arc<dyn EntitlementStore>,
    pub surface: Arc<dyn ManagementSurface>,
}

/// Owns the purchase state machines and the current entitlement.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PurchaseEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    ports: EnginePorts,
    started: AtomicBool,
    lifecycles: Mutex<HashMap<ItemId, PurchaseLifecycle>>,
    acknowledged: Mutex<AcknowledgedTransactions>,
    entitlement_lock: tokio::sync::Mutex<()>,
    entitlement: watch::Sender<Option<ItemId>>,
    notices: broadcast::Sender<PurchaseNotice>,
}

/// Handle to a started engine.
///
/// Dropping the handle stops the dispatcher immediately; [`shutdown`](Self::shutdown)
/// lets queued events finish first.
#[derive(Debug)]
pub struct EngineHandle {
    shutdown: Arc<Notify>,
    join: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Detach from the store and wait for in-flight events to be processed.
    pub async fn shutdown(mut self) {
        self.shutdown.notify_one();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

impl PurchaseEngine {
    pub fn new(config: EngineConfig, ports: EnginePorts) -> Self {
        let (entitlement, _) = watch::channel(None);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        Self {
            inner: Arc::new(EngineInner {
                config,
                ports,
                started: AtomicBool::new(false),
                lifecycles: Mutex::new(HashMap::new()),
                acknowledged: Mutex::new(AcknowledgedTransactions::new(ACKNOWLEDGED_CAPACITY)),
                entitlement_lock: tokio::sync::Mutex::new(()),
                entitlement,
                notices,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Load the persisted entitlement, attach to the store and start
    /// processing its events.
    ///
    /// The listener is attached before connecting so transactions the store
    /// redelivers on connect are not missed. An engine (and its clones)
    /// starts once; later calls fail with [`PurchaseError::AlreadyStarted`].
    pub async fn start(&self) -> Result<EngineHandle, PurchaseError> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(PurchaseError::AlreadyStarted);
        }

        if let Err(e) = self.inner.load_entitlement().await {
            self.inner.started.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let subscription = self.inner.ports.store.subscribe();

        match self.inner.ports.store.connect().await {
            Ok(true) => tracing::info!("Store connected"),
            Ok(false) => tracing::warn!("Store reachable but purchases are unavailable"),
            Err(e) => tracing::warn!("Store connection failed: {}", e),
        }

        let shutdown = Arc::new(Notify::new());
        let join = tokio::spawn(run_dispatcher(
            Arc::clone(&self.inner),
            subscription,
            Arc::clone(&shutdown),
        ));

        tracing::info!(
            "Purchase engine started ({} build)",
            self.inner.config.environment
        );

        Ok(EngineHandle {
            shutdown,
            join: Some(join),
        })
    }

    pub fn current_entitlement(&self) -> Option<ItemId> {
        self.inner.entitlement.borrow().clone()
    }

    /// Ask the store to start a purchase of `item`.
    ///
    /// Fails with [`PurchaseError::DuplicateRequest`] (and no store call) while
    /// a purchase of the same item is in flight. The outcome arrives later as
    /// a notice and, on success, an entitlement change.
    pub async fn initiate_purchase(&self, item: &PurchasableItem) -> Result<AttemptId, PurchaseError> {
        let attempt_id = AttemptId::new();
        let span = tracing::info_span!("purchase", item_id = %item.id, attempt_id = %attempt_id);
        self.request(item, attempt_id).instrument(span).await
    }

    async fn request(
        &self,
        item: &PurchasableItem,
        attempt_id: AttemptId,
    ) -> Result<AttemptId, PurchaseError> {
        let command = LifecycleCommand::RequestPurchase(RequestPurchase {
            kind: item.kind,
            attempt_id,
            requested_at: Utc::now(),
            stale_after: self.inner.config.pending_ttl,
        });

        let events = self
            .inner
            .transition(&item.id, &command)
            .map_err(|e| lifecycle_error(&item.id, e))?;

        for event in &events {
            if let LifecycleEvent::PurchaseRequested(e) = event {
                if let Some(replaced) = e.replaced {
                    tracing::warn!(
                        "Replacing stale request {} for {}; the store never answered it",
                        replaced,
                        item.id
                    );
                    let _ = self.inner.notices.send(PurchaseNotice::Superseded {
                        item_id: item.id.clone(),
                        attempt_id: replaced,
                    });
                }
            }
        }

        let store = &self.inner.ports.store;
        let requested = match item.route() {
            PurchaseRoute::Subscription => store.request_subscription(&item.id).await,
            PurchaseRoute::OneTime => store.request_purchase(&item.id).await,
        };

        if let Err(e) = requested {
            tracing::warn!("Purchase request for {} failed: {}", item.id, e);
            let rollback = LifecycleCommand::AbandonRequest(AbandonRequest {
                attempt_id,
                occurred_at: Utc::now(),
            });
            if let Err(err) = self.inner.transition(&item.id, &rollback) {
                tracing::warn!("Could not roll back request for {}: {}", item.id, err);
            }
            return Err(PurchaseError::Store {
                item_id: item.id.clone(),
                message: e.to_string(),
            });
        }

        tracing::info!("Requested {} via {:?}", item.id, item.route());
        Ok(attempt_id)
    }

    /// Send the user to the platform's management page (production builds)
    /// and forget the locally cached entitlement.
    ///
    /// Billing is untouched; the store stays the source of truth. A page that
    /// cannot be opened is reported as a notice and does not stop the local
    /// clear.
    pub async fn cancel_subscription(&self) -> Result<(), PurchaseError> {
        let config = &self.inner.config;
        let current = self.current_entitlement();

        if config.environment.is_production() {
            let url = management_url(
                config.platform,
                config.android_package.as_deref(),
                current.as_ref(),
            );
            tracing::info!("Opening subscription management: {}", url);
            if let Err(e) = self.inner.ports.surface.open(&url).await {
                tracing::warn!("Could not open subscription management: {}", e);
                self.inner
                    .notify_error(&PurchaseError::Navigation(e.to_string()));
            }
        } else {
            tracing::debug!("Diagnostic build; skipping subscription management page");
        }

        self.inner.clear_entitlement().await
    }

    /// Entitlement changes, starting with the current value.
    pub fn subscribe_entitlement(&self) -> watch::Receiver<Option<ItemId>> {
        self.inner.entitlement.subscribe()
    }

    /// Purchase outcomes as they happen.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<PurchaseNotice> {
        self.inner.notices.subscribe()
    }

    pub fn lifecycle(&self, item_id: &ItemId) -> LifecycleSnapshot {
        self.inner
            .lifecycles()
            .get(item_id)
            .map(PurchaseLifecycle::snapshot)
            .unwrap_or_else(LifecycleSnapshot::idle)
    }
}

async fn run_dispatcher(
    engine: Arc<EngineInner>,
    mut subscription: Subscription<PurchaseEvent>,
    shutdown: Arc<Notify>,
) {
    tracing::info!("Purchase event dispatcher started");

    let mut workers: HashMap<ItemId, mpsc::UnboundedSender<PurchaseEvent>> = HashMap::new();
    let mut worker_tasks: Vec<JoinHandle<()>> = Vec::new();

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                tracing::info!("Purchase event dispatcher received shutdown signal");
                break;
            }
            event = subscription.recv() => {
                let Some(event) = event else {
                    tracing::info!("Store event stream closed");
                    break;
                };

                let event = if event.item_id().is_some() {
                    event
                } else {
                    match engine.single_pending_item() {
                        Some(item_id) => {
                            tracing::debug!("Attributing unlabelled failure to {}", item_id);
                            event.attributed_to(item_id)
                        }
                        None => {
                            engine.report_unattributed(event);
                            continue;
                        }
                    }
                };

                let Some(item_id) = event.item_id().cloned() else {
                    continue;
                };

                let sender = workers.entry(item_id.clone()).or_insert_with(|| {
                    let (tx, rx) = mpsc::unbounded_channel();
                    worker_tasks.push(tokio::spawn(run_item_worker(
                        Arc::clone(&engine),
                        item_id.clone(),
                        rx,
                    )));
                    tx
                });

                if sender.send(event).is_err() {
                    tracing::error!("Worker for {} is gone; event dropped", item_id);
                }
            }
        }
    }

    subscription.close();
    drop(workers);
    for task in worker_tasks {
        let _ = task.await;
    }

    tracing::info!("Purchase event dispatcher stopped");
}

async fn run_item_worker(
    engine: Arc<EngineInner>,
    item_id: ItemId,
    mut events: mpsc::UnboundedReceiver<PurchaseEvent>,
) {
    tracing::debug!("Worker for {} started", item_id);

    while let Some(event) = events.recv().await {
        match event {
            PurchaseEvent::Updated(update) => engine.handle_update(update).await,
            PurchaseEvent::Failed(failure) => engine.handle_failure(&item_id, failure),
        }
    }

    tracing::debug!("Worker for {} stopped", item_id);
}

impl EngineInner {
    fn lifecycles(&self) -> MutexGuard<'_, HashMap<ItemId, PurchaseLifecycle>> {
        self.lifecycles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a command against the item's lifecycle.
    ///
    /// The lock is released before returning; it is never held across an
    /// await.
    fn transition(
        &self,
        item_id: &ItemId,
        command: &LifecycleCommand,
    ) -> Result<Vec<LifecycleEvent>, DomainError> {
        let mut lifecycles = self.lifecycles();
        let lifecycle = lifecycles
            .entry(item_id.clone())
            .or_insert_with(|| PurchaseLifecycle::new(item_id.clone()));
        let events = execute(lifecycle, command)?;
        drop(lifecycles);

        for event in &events {
            tracing::debug!("{} {}", item_id, entitle_events::Event::event_type(event));
        }
        Ok(events)
    }

    fn attempt_of(&self, item_id: &ItemId) -> Option<AttemptId> {
        self.lifecycles()
            .get(item_id)
            .and_then(PurchaseLifecycle::attempt_id)
    }

    /// The only item with an unanswered request, if exactly one exists.
    fn single_pending_item(&self) -> Option<ItemId> {
        let lifecycles = self.lifecycles();
        let mut pending = lifecycles
            .values()
            .filter(|l| matches!(l.state(), PurchaseState::Pending(_)));
        match (pending.next(), pending.next()) {
            (Some(only), None) => Some(only.id().clone()),
            _ => None,
        }
    }

    async fn load_entitlement(&self) -> Result<(), PurchaseError> {
        let stored = self
            .ports
            .entitlements
            .get(CURRENT_SUBSCRIPTION_KEY)
            .await
            .map_err(|e| PurchaseError::Persistence(e.to_string()))?;

        let current = match stored {
            Some(raw) => match ItemId::parse(&raw) {
                Ok(item_id) => Some(item_id),
                Err(e) => {
                    tracing::warn!("Ignoring unreadable stored entitlement {:?}: {}", raw, e);
                    None
                }
            },
            None => None,
        };

        match &current {
            Some(item_id) => tracing::info!("Restored entitlement {}", item_id),
            None => tracing::info!("No stored entitlement"),
        }
        self.entitlement.send_replace(current);
        Ok(())
    }

    async fn handle_update(&self, update: PurchaseUpdated) {
        let item_id = update.item_id.clone();
        let span = tracing::info_span!(
            "purchase",
            item_id = %item_id,
            transaction_id = %update.transaction_id,
            attempt_id = tracing::field::Empty,
        );
        if let Some(attempt_id) = self.attempt_of(&item_id) {
            span.record("attempt_id", tracing::field::display(attempt_id));
        }

        self.validate_and_grant(update).instrument(span).await
    }

    async fn validate_and_grant(&self, update: PurchaseUpdated) {
        let PurchaseUpdated {
            item_id,
            transaction_id,
            receipt,
            ..
        } = update;

        let begin = LifecycleCommand::BeginValidation(BeginValidation {
            transaction_id: transaction_id.clone(),
            started_at: Utc::now(),
        });
        if let Err(e) = self.transition(&item_id, &begin) {
            let error = lifecycle_error(&item_id, e);
            tracing::warn!("Cannot validate {}: {}", transaction_id, error);
            self.notify_error(&error);
            return;
        }

        let environment = self.config.environment;
        let validation = tokio::time::timeout(
            self.config.validation_timeout,
            self.ports
                .validator
                .validate(&receipt, environment.uses_sandbox()),
        )
        .await;

        let verdict = match validation {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                tracing::warn!("Receipt validation failed: {}", e);
                self.reject(&item_id, RejectionReason::ServiceError(e.to_string()));
                return;
            }
            Err(_) => {
                tracing::warn!(
                    "Receipt validation timed out after {:?}",
                    self.config.validation_timeout
                );
                self.reject(
                    &item_id,
                    RejectionReason::ServiceError(format!(
                        "no verdict within {}s",
                        self.config.validation_timeout.as_secs_f64()
                    )),
                );
                return;
            }
        };

        match decide(verdict, environment) {
            Decision::Grant => {}
            Decision::GrantDiagnostic => tracing::warn!(
                "Granting {} despite InvalidReceiptData ({} build)",
                item_id,
                environment
            ),
            Decision::Reject => {
                let reason = match verdict {
                    ValidationVerdict::InvalidReceiptData => RejectionReason::InvalidReceiptData,
                    _ => RejectionReason::ServiceError("validation service error".to_string()),
                };
                tracing::info!("Receipt for {} rejected: {}", item_id, reason);
                self.reject(&item_id, reason);
                return;
            }
        }

        if let Err(e) = self.ports.store.acknowledge(&transaction_id).await {
            tracing::warn!("Acknowledgment failed; entitlement not recorded: {}", e);
            self.fail(
                &item_id,
                PurchaseError::AcknowledgmentFailed {
                    item_id: item_id.clone(),
                    transaction_id: transaction_id.clone(),
                    message: e.to_string(),
                },
            );
            return;
        }

        let first_acknowledgment = self
            .acknowledged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(transaction_id.clone());

        // A replay must not touch the record: it may since have been cleared
        // or replaced by another item.
        let recorded = if first_acknowledgment {
            self.record_entitlement(&item_id).await
        } else {
            Ok(())
        };

        let complete = LifecycleCommand::Complete(Complete {
            transaction_id: transaction_id.clone(),
            occurred_at: Utc::now(),
        });
        if let Err(e) = self.transition(&item_id, &complete) {
            tracing::warn!("Could not complete lifecycle for {}: {}", item_id, e);
        }

        if first_acknowledgment {
            tracing::info!("Entitled to {}", item_id);
            let _ = self.notices.send(PurchaseNotice::Entitled {
                item_id: item_id.clone(),
            });
        } else {
            tracing::debug!("Transaction {} replayed; entitlement left as is", transaction_id);
        }

        if let Err(error) = recorded {
            self.notify_error(&error);
        }
    }

    fn handle_failure(&self, item_id: &ItemId, failure: PurchaseFailed) {
        let _entered = tracing::info_span!("purchase", item_id = %item_id).entered();

        if failure.reason.is_user_cancelled() {
            let cancel = LifecycleCommand::Cancel(Cancel {
                occurred_at: Utc::now(),
            });
            if let Err(e) = self.transition(item_id, &cancel) {
                tracing::warn!("Could not cancel lifecycle for {}: {}", item_id, e);
            }
            tracing::info!("Purchase of {} cancelled by user", item_id);
            let _ = self.notices.send(PurchaseNotice::Cancelled {
                item_id: Some(item_id.clone()),
            });
            return;
        }

        tracing::warn!(
            "Store reported failure for {}: {} ({})",
            item_id,
            failure.message,
            failure.reason.code()
        );
        self.fail(
            item_id,
            PurchaseError::StoreFailure {
                item_id: Some(item_id.clone()),
                code: failure.reason.code().to_string(),
                message: failure.message,
            },
        );
    }

    /// A failure that names no item while zero or several purchases are
    /// pending: nothing to transition, only tell the user.
    fn report_unattributed(&self, event: PurchaseEvent) {
        let PurchaseEvent::Failed(failure) = event else {
            return;
        };

        if failure.reason.is_user_cancelled() {
            tracing::info!("Purchase cancelled by user");
            let _ = self.notices.send(PurchaseNotice::Cancelled { item_id: None });
        } else {
            tracing::warn!(
                "Store reported failure: {} ({})",
                failure.message,
                failure.reason.code()
            );
            self.notify_error(&PurchaseError::StoreFailure {
                item_id: None,
                code: failure.reason.code().to_string(),
                message: failure.message,
            });
        }
    }

    fn reject(&self, item_id: &ItemId, reason: RejectionReason) {
        self.fail(
            item_id,
            PurchaseError::ValidationRejected {
                item_id: item_id.clone(),
                reason,
            },
        );
    }

    fn fail(&self, item_id: &ItemId, error: PurchaseError) {
        let command = LifecycleCommand::Fail(Fail {
            error: error.clone(),
            occurred_at: Utc::now(),
        });
        if let Err(e) = self.transition(item_id, &command) {
            tracing::warn!("Could not record failure for {}: {}", item_id, e);
        }
        self.notify_error(&error);
    }

    fn notify_error(&self, error: &PurchaseError) {
        let _ = self.notices.send(PurchaseNotice::from(error));
    }

    /// Persist `item_id` as the entitlement and publish it.
    ///
    /// The write is skipped when the store already holds the same item. A
    /// failed write still publishes: the store has finished the transaction
    /// and will not redeliver it.
    async fn record_entitlement(&self, item_id: &ItemId) -> Result<(), PurchaseError> {
        let _guard = self.entitlement_lock.lock().await;

        match self.ports.entitlements.get(CURRENT_SUBSCRIPTION_KEY).await {
            Ok(Some(stored)) if stored == item_id.as_str() => {
                tracing::debug!("Entitlement {} already recorded", item_id);
                self.publish_entitlement(Some(item_id.clone()));
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Could not read stored entitlement: {}", e),
        }

        let written = self
            .ports
            .entitlements
            .set(CURRENT_SUBSCRIPTION_KEY, item_id.as_str())
            .await;
        self.publish_entitlement(Some(item_id.clone()));

        written.map_err(|e| {
            tracing::error!("Failed to persist entitlement {}: {}", item_id, e);
            PurchaseError::Persistence(e.to_string())
        })
    }

    async fn clear_entitlement(&self) -> Result<(), PurchaseError> {
        let _guard = self.entitlement_lock.lock().await;

        let removed = self
            .ports
            .entitlements
            .remove(CURRENT_SUBSCRIPTION_KEY)
            .await;
        self.publish_entitlement(None);
        tracing::info!("Cleared cached entitlement");

        removed.map_err(|e| {
            tracing::error!("Failed to clear stored entitlement: {}", e);
            PurchaseError::Persistence(e.to_string())
        })
    }

    fn publish_entitlement(&self, value: Option<ItemId>) {
        self.entitlement.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }
}

fn lifecycle_error(item_id: &ItemId, error: DomainError) -> PurchaseError {
    if error.is_in_flight() {
        PurchaseError::DuplicateRequest {
            item_id: item_id.clone(),
        }
    } else {
        PurchaseError::Lifecycle {
            item_id: item_id.clone(),
            message: error.to_string(),
        }
    }
}

/// Transactions acknowledged this session, oldest evicted first.
#[derive(Debug)]
struct AcknowledgedTransactions {
    capacity: usize,
    order: VecDeque<TransactionId>,
    seen: HashSet<TransactionId>,
}

impl AcknowledgedTransactions {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Returns `false` if the transaction was already recorded.
    fn insert(&mut self, transaction_id: TransactionId) -> bool {
        if self.seen.contains(&transaction_id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(transaction_id.clone());
        self.order.push_back(transaction_id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(n: usize) -> TransactionId {
        TransactionId::parse(format!("tx-{n}")).unwrap()
    }

    #[test]
    fn acknowledged_set_detects_replays() {
        let mut acknowledged = AcknowledgedTransactions::new(4);
        assert!(acknowledged.insert(tx(1)));
        assert!(!acknowledged.insert(tx(1)));
    }

    #[test]
    fn acknowledged_set_evicts_oldest() {
        let mut acknowledged = AcknowledgedTransactions::new(2);
        acknowledged.insert(tx(1));
        acknowledged.insert(tx(2));
        acknowledged.insert(tx(3));

        assert!(acknowledged.insert(tx(1)));
        assert!(!acknowledged.insert(tx(3)));
        assert_eq!(acknowledged.order.len(), 2);
    }

    #[test]
    fn in_flight_becomes_duplicate_request() {
        let item_id = ItemId::parse("sub.a").unwrap();
        assert_eq!(
            lifecycle_error(&item_id, DomainError::in_flight("sub.a")),
            PurchaseError::DuplicateRequest { item_id: item_id.clone() }
        );
        assert_eq!(
            lifecycle_error(&item_id, DomainError::illegal_transition("bad")).kind(),
            crate::error::FailureKind::Lifecycle
        );
    }
}
