use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use entitle_events::ReceiptBlob;

/// Outcome of validating a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationVerdict {
    /// The receipt is genuine and covers the purchase.
    Valid,
    /// The backend could not verify the receipt (malformed, unauthenticated,
    /// or from the other environment).
    InvalidReceiptData,
    /// The backend answered but could not make a decision.
    ServiceError,
}

/// The validation service could not be reached.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationServiceError {
    #[error("validation service unavailable: {0}")]
    Unavailable(String),
}

/// Receipt validation service.
///
/// `sandbox` selects the backend that accepts test receipts.
#[async_trait]
pub trait ReceiptValidator: Send + Sync {
    async fn validate(
        &self,
        receipt: &ReceiptBlob,
        sandbox: bool,
    ) -> Result<ValidationVerdict, ValidationServiceError>;
}
