//! Scripted purchase session against the in-memory store.
//!
//! Wires the engine to scripted collaborators and walks through a session a
//! user might have: browse the catalog, buy a subscription, back out of a
//! one-time purchase, then cancel the subscription.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Serialize;
use tokio::sync::broadcast;

use entitle_catalog::{CatalogCoordinator, CatalogFetch, PurchasableItem};
use entitle_core::{ItemId, TransactionId};
use entitle_events::{PurchaseEvent, ReceiptBlob};
use entitle_infra::{
    CatalogKind, EntitlementStore, InMemoryStoreClient, RecordingSurface,
    ScriptedReceiptValidator, SqliteEntitlementStore, StoreProduct,
};
use entitle_purchases::{EngineConfig, EnginePorts, PurchaseEngine, PurchaseNotice};

/// Path of the SQLite entitlement database. Unset: in-memory database.
pub const ENV_DB: &str = "ENTITLE_SIMULATOR_DB";

const NOTICE_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub catalog: Vec<PurchasableItem>,
    pub rejected_items: Vec<ItemId>,
    pub notices: Vec<PurchaseNotice>,
    pub duplicate_rejected: bool,
    pub entitlement_after_purchase: Option<ItemId>,
    pub entitlement_at_end: Option<ItemId>,
    pub opened_urls: Vec<String>,
    pub acknowledged: Vec<TransactionId>,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary<'a> {
    pub catalog_size: usize,
    pub rejected_items: &'a [ItemId],
    pub duplicate_rejected: bool,
    pub entitlement_after_purchase: Option<&'a ItemId>,
    pub entitlement_at_end: Option<&'a ItemId>,
    pub opened_urls: &'a [String],
}

impl SessionReport {
    pub fn summary(&self) -> SessionSummary<'_> {
        SessionSummary {
            catalog_size: self.catalog.len(),
            rejected_items: &self.rejected_items,
            duplicate_rejected: self.duplicate_rejected,
            entitlement_after_purchase: self.entitlement_after_purchase.as_ref(),
            entitlement_at_end: self.entitlement_at_end.as_ref(),
            opened_urls: &self.opened_urls,
        }
    }
}

fn id(raw: &str) -> anyhow::Result<ItemId> {
    ItemId::parse(raw).with_context(|| format!("bad item id {raw:?}"))
}

fn scripted_store() -> anyhow::Result<InMemoryStoreClient> {
    Ok(InMemoryStoreClient::new()
        .with_products(
            CatalogKind::Subscriptions,
            vec![
                StoreProduct::new(id("sub.monthly")?, "subs")
                    .with_display("Monthly", "Every feature, billed monthly", "$4.99")
                    .with_introductory_offer("$0.99", "P1W"),
                StoreProduct::new(id("sub.legacy")?, "bundle")
                    .with_display("Legacy bundle", "No longer sold", "$9.99"),
            ],
        )
        .with_products(
            CatalogKind::Products,
            vec![StoreProduct::new(id("coins.100")?, "inapp")
                .with_display("100 coins", "A pile of coins", "$0.99")],
        ))
}

async fn open_entitlements(db_path: Option<&str>) -> anyhow::Result<Arc<dyn EntitlementStore>> {
    let store = match db_path {
        Some(path) => SqliteEntitlementStore::open(path).await?,
        None => SqliteEntitlementStore::in_memory().await?,
    };
    Ok(Arc::new(store))
}

async fn next_notice(
    notices: &mut broadcast::Receiver<PurchaseNotice>,
    seen: &mut Vec<PurchaseNotice>,
) -> anyhow::Result<PurchaseNotice> {
    let notice = tokio::time::timeout(NOTICE_WAIT, notices.recv())
        .await
        .context("no purchase notice within the wait window")?
        .context("notice stream closed")?;
    tracing::info!("notice: {:?}", notice);
    seen.push(notice.clone());
    Ok(notice)
}

fn find(catalog: &CatalogCoordinator, raw: &str) -> anyhow::Result<PurchasableItem> {
    let item_id = id(raw)?;
    catalog
        .find(&item_id)
        .with_context(|| format!("{item_id} missing from catalog"))
}

/// Run the scripted session and report what the engine did.
pub async fn run_session(config: EngineConfig, db_path: Option<&str>) -> anyhow::Result<SessionReport> {
    let store = Arc::new(scripted_store()?);
    let surface = Arc::new(RecordingSurface::new());
    let entitlements = open_entitlements(db_path).await?;

    let engine = PurchaseEngine::new(
        config,
        EnginePorts {
            store: store.clone(),
            validator: Arc::new(ScriptedReceiptValidator::default()),
            entitlements,
            surface: surface.clone(),
        },
    );
    let mut notices = engine.subscribe_notices();
    let handle = engine
        .start()
        .await
        .context("failed to start purchase engine")?;

    let catalog = CatalogCoordinator::new(store.clone());
    let subscriptions: CatalogFetch = catalog
        .fetch_catalog(CatalogKind::Subscriptions, &[id("sub.monthly")?, id("sub.legacy")?])
        .await?;
    let products = catalog
        .fetch_catalog(CatalogKind::Products, &[id("coins.100")?])
        .await?;

    let rejected_items: Vec<ItemId> = subscriptions
        .rejected
        .iter()
        .chain(products.rejected.iter())
        .map(|err| err.item_id.clone())
        .collect();
    let mut all_items: Vec<PurchasableItem> = subscriptions.items.iter().cloned().collect();
    all_items.extend(products.items.iter().cloned());

    let mut seen = Vec::new();

    // Subscription purchase, with an impatient second tap.
    let monthly = find(&catalog, "sub.monthly")?;
    engine.initiate_purchase(&monthly).await?;
    let duplicate_rejected = engine.initiate_purchase(&monthly).await.is_err();

    store.emit(PurchaseEvent::updated(
        monthly.id.clone(),
        TransactionId::parse("sim-tx-1")?,
        ReceiptBlob::new("c2ltdWxhdGVkLXJlY2VpcHQ="),
    ));
    match next_notice(&mut notices, &mut seen).await? {
        PurchaseNotice::Entitled { .. } => {}
        other => bail!("expected an entitlement, got {other:?}"),
    }
    let entitlement_after_purchase = engine.current_entitlement();

    // One-time purchase the user backs out of.
    let coins = find(&catalog, "coins.100")?;
    engine.initiate_purchase(&coins).await?;
    store.emit(PurchaseEvent::user_cancelled(Some(coins.id.clone())));
    next_notice(&mut notices, &mut seen).await?;

    engine.cancel_subscription().await?;
    let entitlement_at_end = engine.current_entitlement();

    handle.shutdown().await;

    Ok(SessionReport {
        catalog: all_items,
        rejected_items,
        notices: seen,
        duplicate_rejected,
        entitlement_after_purchase,
        entitlement_at_end,
        opened_urls: surface.opened(),
        acknowledged: store.acknowledged(),
    })
}
