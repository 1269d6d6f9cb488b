//! `entitle-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no IO, no async, no store or
//! validator concerns).

pub mod aggregate;
pub mod environment;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, execute};
pub use environment::{BuildEnvironment, Platform};
pub use error::DomainError;
pub use id::{AttemptId, ItemId, TransactionId};
