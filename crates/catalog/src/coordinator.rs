//! Catalog fetching and caching.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;

use entitle_core::ItemId;
use entitle_infra::{CatalogKind, StoreClient};

use crate::error::{CatalogError, ClassificationError};
use crate::item::{PurchasableItem, classify};

/// How a fetch was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The store was asked and the cache replaced.
    Fetched,
    /// The listing was already cached; the store was not asked.
    AlreadyPopulated,
    /// No live store connection; the previous cache is returned unchanged.
    Offline,
}

/// Result of a catalog fetch.
#[derive(Debug, Clone)]
pub struct CatalogFetch {
    pub items: Arc<Vec<PurchasableItem>>,
    /// Items the store returned with a type tag we cannot classify.
    /// Only non-empty for [`FetchOutcome::Fetched`].
    pub rejected: Vec<ClassificationError>,
    pub outcome: FetchOutcome,
}

/// Fetches purchasable items from the store on demand and caches them per
/// listing.
///
/// Fetches are serialized, so concurrent callers for an empty listing issue a
/// single store call and the later ones see the populated cache.
pub struct CatalogCoordinator {
    store: Arc<dyn StoreClient>,
    fetch_lock: Mutex<()>,
    cache: RwLock<HashMap<CatalogKind, Arc<Vec<PurchasableItem>>>>,
}

impl CatalogCoordinator {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Self {
            store,
            fetch_lock: Mutex::new(()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Populate the `kind` listing if it is empty and the store is connected.
    pub async fn fetch_catalog(
        &self,
        kind: CatalogKind,
        ids: &[ItemId],
    ) -> Result<CatalogFetch, CatalogError> {
        self.fetch(kind, ids, false).await
    }

    /// Refetch the `kind` listing and replace it wholesale.
    pub async fn refresh_catalog(
        &self,
        kind: CatalogKind,
        ids: &[ItemId],
    ) -> Result<CatalogFetch, CatalogError> {
        self.fetch(kind, ids, true).await
    }

    /// Cached items for `kind` (empty until fetched).
    pub fn items(&self, kind: CatalogKind) -> Arc<Vec<PurchasableItem>> {
        self.cached(kind).unwrap_or_default()
    }

    /// Look an item up in either listing.
    pub fn find(&self, item_id: &ItemId) -> Option<PurchasableItem> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache
            .values()
            .flat_map(|items| items.iter())
            .find(|item| &item.id == item_id)
            .cloned()
    }

    pub fn is_populated(&self, kind: CatalogKind) -> bool {
        self.cached(kind).is_some_and(|items| !items.is_empty())
    }

    fn cached(&self, kind: CatalogKind) -> Option<Arc<Vec<PurchasableItem>>> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
    }

    async fn fetch(
        &self,
        kind: CatalogKind,
        ids: &[ItemId],
        force: bool,
    ) -> Result<CatalogFetch, CatalogError> {
        if ids.is_empty() {
            return Err(CatalogError::NoIdentifiers);
        }

        let _guard = self.fetch_lock.lock().await;

        if !force && self.is_populated(kind) {
            tracing::debug!("{kind} catalog already populated");
            return Ok(self.unchanged(kind, FetchOutcome::AlreadyPopulated));
        }

        if !self.store.is_connected() {
            tracing::debug!("store not connected; keeping cached {kind} catalog");
            return Ok(self.unchanged(kind, FetchOutcome::Offline));
        }

        let products = self.store.list_purchasable(kind, ids).await?;

        let mut items = Vec::with_capacity(products.len());
        let mut rejected = Vec::new();
        for product in products {
            match classify(product) {
                Ok(item) => items.push(item),
                Err(err) => {
                    tracing::warn!("excluding item from {kind} catalog: {err}");
                    rejected.push(err);
                }
            }
        }

        let items = Arc::new(items);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, Arc::clone(&items));

        tracing::info!(
            "fetched {kind} catalog: {} item(s), {} rejected",
            items.len(),
            rejected.len()
        );

        Ok(CatalogFetch {
            items,
            rejected,
            outcome: FetchOutcome::Fetched,
        })
    }

    fn unchanged(&self, kind: CatalogKind, outcome: FetchOutcome) -> CatalogFetch {
        CatalogFetch {
            items: self.items(kind),
            rejected: Vec::new(),
            outcome,
        }
    }
}
