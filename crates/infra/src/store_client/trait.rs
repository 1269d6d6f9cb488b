use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use entitle_core::{ItemId, TransactionId};
use entitle_events::{PurchaseEvent, Subscription};

/// Which of the store's two listings an item comes from.
///
/// Stores list one-time products (consumable / non-consumable) and
/// subscriptions through separate calls, and the client caches them
/// separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    Products,
    Subscriptions,
}

impl CatalogKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CatalogKind::Products => "products",
            CatalogKind::Subscriptions => "subscriptions",
        }
    }
}

impl core::fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which store call starts a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseRoute {
    /// `request_subscription`
    Subscription,
    /// `request_purchase`
    OneTime,
}

/// Item metadata exactly as the store reports it (before classification).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreProduct {
    pub id: ItemId,
    /// Platform type tag (e.g. `"inapp"`, `"subs"`, `"auto_renewable"`).
    pub type_tag: String,
    pub title: String,
    pub description: String,
    pub localized_price: String,
    pub introductory_price: Option<String>,
    /// ISO-8601 period of the introductory offer (e.g. `"P1W"`).
    pub introductory_period: Option<String>,
}

impl StoreProduct {
    pub fn new(id: ItemId, type_tag: impl Into<String>) -> Self {
        Self {
            id,
            type_tag: type_tag.into(),
            title: String::new(),
            description: String::new(),
            localized_price: String::new(),
            introductory_price: None,
            introductory_period: None,
        }
    }

    pub fn with_display(
        mut self,
        title: impl Into<String>,
        description: impl Into<String>,
        localized_price: impl Into<String>,
    ) -> Self {
        self.title = title.into();
        self.description = description.into();
        self.localized_price = localized_price.into();
        self
    }

    pub fn with_introductory_offer(
        mut self,
        price: impl Into<String>,
        period: impl Into<String>,
    ) -> Self {
        self.introductory_price = Some(price.into());
        self.introductory_period = Some(period.into());
        self
    }
}

/// Failure talking to the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store is not connected")]
    NotConnected,

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store rejected the request: {0}")]
    Rejected(String),
}

/// Failure finishing a transaction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AckError {
    #[error("store is not connected")]
    NotConnected,

    #[error("transaction {transaction_id} could not be finished: {message}")]
    Failed {
        transaction_id: TransactionId,
        message: String,
    },
}

/// Platform purchase API.
///
/// ## Contract
///
/// - `request_subscription` / `request_purchase` only *start* a purchase. The
///   outcome arrives later on the stream returned by `subscribe`.
/// - Every transaction that has not been acknowledged is redelivered as a
///   `PurchaseEvent::Updated` after the next successful `connect`.
/// - Acknowledging a transaction that is already finished succeeds without
///   doing anything.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Open the store connection. `Ok(false)` means the store is reachable in
    /// principle but purchases are unavailable (e.g. billing disabled).
    async fn connect(&self) -> Result<bool, StoreError>;

    /// Whether the last `connect` produced a live connection.
    fn is_connected(&self) -> bool;

    /// Fetch metadata for the given identifiers from one of the listings.
    /// Unknown identifiers are silently absent from the result.
    async fn list_purchasable(
        &self,
        kind: CatalogKind,
        ids: &[ItemId],
    ) -> Result<Vec<StoreProduct>, StoreError>;

    async fn request_subscription(&self, item_id: &ItemId) -> Result<(), StoreError>;

    async fn request_purchase(&self, item_id: &ItemId) -> Result<(), StoreError>;

    /// Attach a listener to the purchase event stream.
    fn subscribe(&self) -> Subscription<PurchaseEvent>;

    /// Finish a transaction so the store stops redelivering it.
    async fn acknowledge(&self, transaction_id: &TransactionId) -> Result<(), AckError>;
}
