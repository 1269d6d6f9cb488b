use serde::Serialize;

use entitle_core::{AttemptId, ItemId};

use crate::error::{FailureKind, PurchaseError};

/// User-facing outcome of a purchase flow, in the order the engine reached it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum PurchaseNotice {
    Entitled {
        item_id: ItemId,
    },
    /// The user backed out. Informational, not an error.
    Cancelled {
        item_id: Option<ItemId>,
    },
    /// A new request replaced an attempt the store never answered. A late
    /// answer for the old attempt is processed against the new one.
    Superseded {
        item_id: ItemId,
        attempt_id: AttemptId,
    },
    Failed {
        item_id: Option<ItemId>,
        kind: FailureKind,
        message: String,
    },
}

impl From<&PurchaseError> for PurchaseNotice {
    fn from(error: &PurchaseError) -> Self {
        PurchaseNotice::Failed {
            item_id: error.item_id().cloned(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}
