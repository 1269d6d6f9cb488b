//! Purchasable-item catalog.
//!
//! Fetches item metadata from the store, classifies each item by its platform
//! type tag and caches the result per listing.

pub mod coordinator;
pub mod error;
pub mod item;

pub use coordinator::{CatalogCoordinator, CatalogFetch, FetchOutcome};
pub use error::{CatalogError, ClassificationError};
pub use item::{IntroductoryOffer, ItemKind, PurchasableItem, classify};
