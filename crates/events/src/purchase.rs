//! Purchase events emitted by the platform store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use entitle_core::{ItemId, TransactionId};

use crate::event::Event;

/// Reason code the store uses for a purchase sheet dismissed by the user.
pub const USER_CANCELLED_CODE: &str = "E_USER_CANCELLED";

/// Opaque proof-of-purchase issued by the store.
///
/// Receipts are credentials; `Debug` only reports their length.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReceiptBlob(String);

impl ReceiptBlob {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl core::fmt::Debug for ReceiptBlob {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ReceiptBlob(<{} bytes>)", self.0.len())
    }
}

/// Why the store reported a purchase as failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum FailureReason {
    /// The user dismissed the purchase sheet.
    UserCancelled,
    /// Any other store reason code, kept verbatim.
    Other(String),
}

impl FailureReason {
    pub fn from_code(code: impl AsRef<str>) -> Self {
        let code = code.as_ref().trim();
        if code.eq_ignore_ascii_case(USER_CANCELLED_CODE) {
            FailureReason::UserCancelled
        } else {
            FailureReason::Other(code.to_string())
        }
    }

    pub fn code(&self) -> &str {
        match self {
            FailureReason::UserCancelled => USER_CANCELLED_CODE,
            FailureReason::Other(code) => code,
        }
    }

    pub fn is_user_cancelled(&self) -> bool {
        matches!(self, FailureReason::UserCancelled)
    }
}

impl From<String> for FailureReason {
    fn from(value: String) -> Self {
        FailureReason::from_code(value)
    }
}

impl From<FailureReason> for String {
    fn from(value: FailureReason) -> Self {
        value.code().to_string()
    }
}

/// Event: the store completed a transaction and handed over its receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseUpdated {
    pub item_id: ItemId,
    pub transaction_id: TransactionId,
    pub receipt: ReceiptBlob,
    pub occurred_at: DateTime<Utc>,
}

/// Event: the store reported that a purchase did not go through.
///
/// Some stores do not say which item the failure belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseFailed {
    pub item_id: Option<ItemId>,
    pub reason: FailureReason,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Tagged union of everything the store pushes at the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PurchaseEvent {
    Updated(PurchaseUpdated),
    Failed(PurchaseFailed),
}

impl PurchaseEvent {
    pub fn updated(
        item_id: ItemId,
        transaction_id: TransactionId,
        receipt: ReceiptBlob,
    ) -> Self {
        PurchaseEvent::Updated(PurchaseUpdated {
            item_id,
            transaction_id,
            receipt,
            occurred_at: Utc::now(),
        })
    }

    pub fn failed(
        item_id: Option<ItemId>,
        reason_code: impl AsRef<str>,
        message: impl Into<String>,
    ) -> Self {
        PurchaseEvent::Failed(PurchaseFailed {
            item_id,
            reason: FailureReason::from_code(reason_code),
            message: message.into(),
            occurred_at: Utc::now(),
        })
    }

    pub fn user_cancelled(item_id: Option<ItemId>) -> Self {
        Self::failed(item_id, USER_CANCELLED_CODE, "Purchase Cancelled")
    }

    pub fn item_id(&self) -> Option<&ItemId> {
        match self {
            PurchaseEvent::Updated(e) => Some(&e.item_id),
            PurchaseEvent::Failed(e) => e.item_id.as_ref(),
        }
    }

    /// Attach an item to a failure that arrived without one.
    pub fn attributed_to(self, item_id: ItemId) -> Self {
        match self {
            PurchaseEvent::Failed(mut e) if e.item_id.is_none() => {
                e.item_id = Some(item_id);
                PurchaseEvent::Failed(e)
            }
            other => other,
        }
    }
}

impl Event for PurchaseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseEvent::Updated(_) => "store.purchase.updated",
            PurchaseEvent::Failed(_) => "store.purchase.failed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseEvent::Updated(e) => e.occurred_at,
            PurchaseEvent::Failed(e) => e.occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(raw: &str) -> ItemId {
        ItemId::parse(raw).unwrap()
    }

    #[test]
    fn cancellation_code_is_recognized() {
        assert!(FailureReason::from_code("E_USER_CANCELLED").is_user_cancelled());
        assert!(FailureReason::from_code(" e_user_cancelled ").is_user_cancelled());
        assert_eq!(
            FailureReason::from_code("E_NETWORK_ERROR"),
            FailureReason::Other("E_NETWORK_ERROR".to_string())
        );
    }

    #[test]
    fn receipts_are_not_logged() {
        let receipt = ReceiptBlob::new("MIIT-secret-receipt");
        let rendered = format!("{receipt:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("19 bytes"));
    }

    #[test]
    fn failures_without_item_can_be_attributed() {
        let event = PurchaseEvent::user_cancelled(None).attributed_to(item("sub.a"));
        assert_eq!(event.item_id(), Some(&item("sub.a")));

        // Already-attributed failures keep their item.
        let event = PurchaseEvent::user_cancelled(Some(item("sub.b"))).attributed_to(item("sub.a"));
        assert_eq!(event.item_id(), Some(&item("sub.b")));
    }

    #[test]
    fn wire_shape_is_tagged() {
        let event = PurchaseEvent::failed(Some(item("sub.a")), "E_USER_CANCELLED", "cancelled");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "failed");
        assert_eq!(json["reason"], "E_USER_CANCELLED");
        assert_eq!(event.event_type(), "store.purchase.failed");
    }
}
