//! Errors raised by identifiers, flags and state machines.

use thiserror::Error;

/// Deterministic domain failure.
///
/// Store, validator and persistence failures are not domain errors; they
/// belong to the infrastructure ports.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input that cannot become a domain value (blank id, unknown flag).
    #[error("invalid {what}: {reason}")]
    InvalidValue { what: &'static str, reason: String },

    /// A purchase of this item is already pending or validating.
    #[error("purchase already in flight: {0}")]
    InFlight(String),

    /// The command does not apply to the current lifecycle state.
    #[error("illegal transition: {0}")]
    IllegalTransition(String),
}

impl DomainError {
    pub fn invalid_value(what: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            what,
            reason: reason.into(),
        }
    }

    pub fn in_flight(detail: impl Into<String>) -> Self {
        Self::InFlight(detail.into())
    }

    pub fn illegal_transition(detail: impl Into<String>) -> Self {
        Self::IllegalTransition(detail.into())
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::InFlight(_))
    }
}
