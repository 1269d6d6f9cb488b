//! Infrastructure layer: the platform store, the receipt validator, durable
//! entitlement storage and the subscription-management surface.
//!
//! Each collaborator is a trait (the boundary the purchase engine consumes)
//! next to the adapters shipped with it. The in-memory adapters are scripted
//! doubles for tests and the simulator; `SqliteEntitlementStore` is the durable
//! store for real clients.

pub mod entitlement_store;
pub mod store_client;
pub mod surface;
pub mod validator;

pub use entitlement_store::{
    CURRENT_SUBSCRIPTION_KEY, EntitlementStore, InMemoryEntitlementStore, PersistenceError,
};
#[cfg(feature = "sqlite")]
pub use entitlement_store::SqliteEntitlementStore;
pub use store_client::{
    AckError, CatalogKind, InMemoryStoreClient, PurchaseRequest, PurchaseRoute, StoreClient,
    StoreError, StoreProduct,
};
pub use surface::{ManagementSurface, NavigationError, RecordingSurface};
pub use validator::{
    ReceiptValidator, ScriptedReceiptValidator, ValidationCall, ValidationServiceError,
    ValidationVerdict,
};
