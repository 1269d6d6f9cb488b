use serde::{Deserialize, Serialize};
use thiserror::Error;

use entitle_core::{ItemId, TransactionId};

/// Why a validated purchase was not granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RejectionReason {
    InvalidReceiptData,
    ServiceError(String),
}

impl core::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RejectionReason::InvalidReceiptData => f.write_str("receipt could not be verified"),
            RejectionReason::ServiceError(detail) => {
                write!(f, "validation service error: {detail}")
            }
        }
    }
}

/// Purchase engine errors. None of them stop the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PurchaseError {
    #[error("a purchase of {item_id} is already in progress")]
    DuplicateRequest { item_id: ItemId },

    #[error("purchase of {item_id} rejected: {reason}")]
    ValidationRejected {
        item_id: ItemId,
        reason: RejectionReason,
    },

    /// The store did not finish the transaction; nothing was persisted and the
    /// store will redeliver it.
    #[error("transaction {transaction_id} for {item_id} was not acknowledged: {message}")]
    AcknowledgmentFailed {
        item_id: ItemId,
        transaction_id: TransactionId,
        message: String,
    },

    /// The store reported the purchase as failed.
    #[error("store reported {code}: {message}")]
    StoreFailure {
        item_id: Option<ItemId>,
        code: String,
        message: String,
    },

    /// The purchase request itself could not be issued.
    #[error("could not request {item_id}: {message}")]
    Store { item_id: ItemId, message: String },

    #[error("entitlement storage failed: {0}")]
    Persistence(String),

    #[error("purchase engine is already started")]
    AlreadyStarted,

    #[error("could not open subscription management: {0}")]
    Navigation(String),

    #[error("lifecycle error for {item_id}: {message}")]
    Lifecycle { item_id: ItemId, message: String },
}

/// Coarse classification of a [`PurchaseError`] for notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DuplicateRequest,
    ValidationRejected,
    AcknowledgmentFailed,
    StoreFailure,
    Store,
    Persistence,
    Navigation,
    Lifecycle,
    AlreadyStarted,
}

impl PurchaseError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PurchaseError::DuplicateRequest { .. } => FailureKind::DuplicateRequest,
            PurchaseError::ValidationRejected { .. } => FailureKind::ValidationRejected,
            PurchaseError::AcknowledgmentFailed { .. } => FailureKind::AcknowledgmentFailed,
            PurchaseError::StoreFailure { .. } => FailureKind::StoreFailure,
            PurchaseError::Store { .. } => FailureKind::Store,
            PurchaseError::Persistence(_) => FailureKind::Persistence,
            PurchaseError::Navigation(_) => FailureKind::Navigation,
            PurchaseError::Lifecycle { .. } => FailureKind::Lifecycle,
            PurchaseError::AlreadyStarted => FailureKind::AlreadyStarted,
        }
    }

    pub fn item_id(&self) -> Option<&ItemId> {
        match self {
            PurchaseError::DuplicateRequest { item_id }
            | PurchaseError::ValidationRejected { item_id, .. }
            | PurchaseError::AcknowledgmentFailed { item_id, .. }
            | PurchaseError::Store { item_id, .. }
            | PurchaseError::Lifecycle { item_id, .. } => Some(item_id),
            PurchaseError::StoreFailure { item_id, .. } => item_id.as_ref(),
            PurchaseError::Persistence(_)
            | PurchaseError::Navigation(_)
            | PurchaseError::AlreadyStarted => None,
        }
    }
}
