//! Purchase lifecycle engine.
//!
//! Drives each purchase from request to entitlement: listens to store events,
//! validates receipts, acknowledges transactions, persists the active
//! entitlement and tells observers what happened.
//!
//! Ordering guarantees:
//! - events for one item are processed in the order the store emitted them
//! - a transaction is acknowledged before its entitlement is persisted
//! - a failed acknowledgment never persists an entitlement

pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod management;
pub mod notice;

pub use config::{ConfigError, EngineConfig};
pub use engine::{EngineHandle, EnginePorts, PurchaseEngine};
pub use error::{FailureKind, PurchaseError, RejectionReason};
pub use lifecycle::{
    Decision, LifecycleSnapshot, PendingPurchase, PurchaseLifecycle, PurchaseOutcome,
    PurchaseState, decide,
};
pub use management::management_url;
pub use notice::PurchaseNotice;
