use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use entitle_core::{ItemId, TransactionId};
use entitle_events::{EventBus, InMemoryEventBus, PurchaseEvent, PurchaseUpdated, Subscription};

use super::r#trait::{
    AckError, CatalogKind, PurchaseRoute, StoreClient, StoreError, StoreProduct,
};

/// A purchase request the store received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRequest {
    pub item_id: ItemId,
    pub route: PurchaseRoute,
}

#[derive(Debug, Default)]
struct StoreLedger {
    products: HashMap<CatalogKind, Vec<StoreProduct>>,
    list_calls: Vec<(CatalogKind, Vec<ItemId>)>,
    requests: Vec<PurchaseRequest>,
    request_failures: VecDeque<StoreError>,
    /// Updates delivered but not yet finished (redelivered on connect).
    unfinished: Vec<PurchaseUpdated>,
    /// Finished transactions, in finishing order.
    finished: Vec<TransactionId>,
    acknowledge_calls: usize,
    ack_failures: VecDeque<String>,
}

/// Scripted in-memory store.
///
/// Intended for tests/dev. Behaves like a platform store for everything the
/// purchase engine depends on: it records requests, keeps unfinished
/// transactions and redelivers them on `connect`, and treats repeated
/// acknowledgments as no-ops. Tests drive outcomes with [`emit`](Self::emit).
#[derive(Debug)]
pub struct InMemoryStoreClient {
    reachable: AtomicBool,
    connected: AtomicBool,
    bus: InMemoryEventBus<PurchaseEvent>,
    ledger: Mutex<StoreLedger>,
}

impl Default for InMemoryStoreClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStoreClient {
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            bus: InMemoryEventBus::new(),
            ledger: Mutex::new(StoreLedger::default()),
        }
    }

    /// Register items the store will list for `kind`.
    pub fn with_products(self, kind: CatalogKind, products: Vec<StoreProduct>) -> Self {
        self.ledger().products.entry(kind).or_default().extend(products);
        self
    }

    /// Control what the next `connect` reports.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
        if !reachable {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    /// Push an event at every subscriber, the way the platform SDK would.
    ///
    /// `Updated` events are remembered as unfinished until acknowledged.
    pub fn emit(&self, event: PurchaseEvent) {
        if let PurchaseEvent::Updated(update) = &event {
            let mut ledger = self.ledger();
            let known = ledger
                .unfinished
                .iter()
                .any(|u| u.transaction_id == update.transaction_id);
            let finished = ledger.finished.contains(&update.transaction_id);
            if !known && !finished {
                ledger.unfinished.push(update.clone());
            }
        }

        if self.bus.publish(event).is_err() {
            tracing::warn!("in-memory store bus poisoned; event dropped");
        }
    }

    /// Make the next `acknowledge` call fail with `message`.
    pub fn fail_next_acknowledgment(&self, message: impl Into<String>) {
        self.ledger().ack_failures.push_back(message.into());
    }

    /// Make the next purchase request fail with `error`.
    pub fn fail_next_request(&self, error: StoreError) {
        self.ledger().request_failures.push_back(error);
    }

    pub fn requests(&self) -> Vec<PurchaseRequest> {
        self.ledger().requests.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.ledger().list_calls.len()
    }

    /// Distinct transactions finished so far.
    pub fn acknowledged(&self) -> Vec<TransactionId> {
        self.ledger().finished.clone()
    }

    /// Every `acknowledge` call, including failed and repeated ones.
    pub fn acknowledge_calls(&self) -> usize {
        self.ledger().acknowledge_calls
    }

    pub fn unfinished(&self) -> Vec<TransactionId> {
        self.ledger()
            .unfinished
            .iter()
            .map(|u| u.transaction_id.clone())
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    fn ledger(&self) -> MutexGuard<'_, StoreLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }

    fn record_request(&self, item_id: &ItemId, route: PurchaseRoute) -> Result<(), StoreError> {
        self.ensure_connected()?;
        let mut ledger = self.ledger();
        if let Some(err) = ledger.request_failures.pop_front() {
            return Err(err);
        }
        ledger.requests.push(PurchaseRequest {
            item_id: item_id.clone(),
            route,
        });
        Ok(())
    }
}

#[async_trait]
impl StoreClient for InMemoryStoreClient {
    async fn connect(&self) -> Result<bool, StoreError> {
        if !self.reachable.load(Ordering::SeqCst) {
            self.connected.store(false, Ordering::SeqCst);
            return Ok(false);
        }
        self.connected.store(true, Ordering::SeqCst);

        let redeliver = self.ledger().unfinished.clone();
        if !redeliver.is_empty() {
            tracing::debug!("redelivering {} unfinished transaction(s)", redeliver.len());
        }
        for update in redeliver {
            if self.bus.publish(PurchaseEvent::Updated(update)).is_err() {
                tracing::warn!("in-memory store bus poisoned; redelivery dropped");
            }
        }
        Ok(true)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn list_purchasable(
        &self,
        kind: CatalogKind,
        ids: &[ItemId],
    ) -> Result<Vec<StoreProduct>, StoreError> {
        self.ensure_connected()?;
        let mut ledger = self.ledger();
        ledger.list_calls.push((kind, ids.to_vec()));

        let listed = ledger.products.get(&kind).cloned().unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| listed.iter().find(|p| &p.id == id).cloned())
            .collect())
    }

    async fn request_subscription(&self, item_id: &ItemId) -> Result<(), StoreError> {
        self.record_request(item_id, PurchaseRoute::Subscription)
    }

    async fn request_purchase(&self, item_id: &ItemId) -> Result<(), StoreError> {
        self.record_request(item_id, PurchaseRoute::OneTime)
    }

    fn subscribe(&self) -> Subscription<PurchaseEvent> {
        self.bus.subscribe()
    }

    async fn acknowledge(&self, transaction_id: &TransactionId) -> Result<(), AckError> {
        let mut ledger = self.ledger();
        ledger.acknowledge_calls += 1;

        if let Some(message) = ledger.ack_failures.pop_front() {
            return Err(AckError::Failed {
                transaction_id: transaction_id.clone(),
                message,
            });
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(AckError::NotConnected);
        }
        if ledger.finished.contains(transaction_id) {
            return Ok(());
        }

        ledger.unfinished.retain(|u| &u.transaction_id != transaction_id);
        ledger.finished.push(transaction_id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitle_events::ReceiptBlob;

    fn item(raw: &str) -> ItemId {
        ItemId::parse(raw).unwrap()
    }

    fn tx(raw: &str) -> TransactionId {
        TransactionId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn requests_require_a_connection() {
        let store = InMemoryStoreClient::new();
        assert_eq!(
            store.request_purchase(&item("coins.100")).await,
            Err(StoreError::NotConnected)
        );

        assert!(store.connect().await.unwrap());
        store.request_subscription(&item("sub.a")).await.unwrap();
        assert_eq!(
            store.requests(),
            vec![PurchaseRequest {
                item_id: item("sub.a"),
                route: PurchaseRoute::Subscription,
            }]
        );
    }

    #[tokio::test]
    async fn unreachable_store_reports_not_connected() {
        let store = InMemoryStoreClient::new();
        store.set_reachable(false);
        assert!(!store.connect().await.unwrap());
        assert!(!store.is_connected());
    }

    #[tokio::test]
    async fn listing_follows_requested_ids() {
        let store = InMemoryStoreClient::new().with_products(
            CatalogKind::Subscriptions,
            vec![
                StoreProduct::new(item("sub.a"), "subs"),
                StoreProduct::new(item("sub.b"), "subs"),
            ],
        );
        store.connect().await.unwrap();

        let listed = store
            .list_purchasable(CatalogKind::Subscriptions, &[item("sub.b"), item("missing")])
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, item("sub.b"));
        assert_eq!(store.list_calls(), 1);
    }

    #[tokio::test]
    async fn repeated_acknowledgment_is_a_no_op() {
        let store = InMemoryStoreClient::new();
        store.connect().await.unwrap();
        store.emit(PurchaseEvent::updated(item("sub.a"), tx("t1"), ReceiptBlob::new("R1")));

        store.acknowledge(&tx("t1")).await.unwrap();
        store.acknowledge(&tx("t1")).await.unwrap();

        assert_eq!(store.acknowledged(), vec![tx("t1")]);
        assert_eq!(store.acknowledge_calls(), 2);
        assert!(store.unfinished().is_empty());
    }

    #[tokio::test]
    async fn unfinished_transactions_are_redelivered_on_connect() {
        let store = InMemoryStoreClient::new();
        store.connect().await.unwrap();
        store.emit(PurchaseEvent::updated(item("sub.a"), tx("t1"), ReceiptBlob::new("R1")));

        let mut listener = store.subscribe();
        store.connect().await.unwrap();

        match listener.recv().await {
            Some(PurchaseEvent::Updated(update)) => assert_eq!(update.transaction_id, tx("t1")),
            other => panic!("expected redelivered update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn scripted_ack_failure_keeps_transaction_unfinished() {
        let store = InMemoryStoreClient::new();
        store.connect().await.unwrap();
        store.emit(PurchaseEvent::updated(item("sub.a"), tx("t1"), ReceiptBlob::new("R1")));
        store.fail_next_acknowledgment("billing service hiccup");

        assert!(matches!(
            store.acknowledge(&tx("t1")).await,
            Err(AckError::Failed { .. })
        ));
        assert_eq!(store.unfinished(), vec![tx("t1")]);
        assert!(store.acknowledged().is_empty());
    }
}
