//! Receipt validation boundary.

pub mod scripted;
pub mod r#trait;

pub use r#trait::{ReceiptValidator, ValidationServiceError, ValidationVerdict};
pub use scripted::{ScriptedReceiptValidator, ValidationCall};
