//! Platform store boundary.
//!
//! Defines what the client needs from a store SDK (connection, listing,
//! purchase requests, the purchase event stream, transaction finishing)
//! without assuming any particular platform.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::{InMemoryStoreClient, PurchaseRequest};
pub use r#trait::{AckError, CatalogKind, PurchaseRoute, StoreClient, StoreError, StoreProduct};
