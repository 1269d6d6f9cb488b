//! Store events and the subscription mechanics that carry them.

pub mod bus;
pub mod event;
pub mod in_memory_bus;
pub mod purchase;

pub use bus::{EventBus, Subscription};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use purchase::{FailureReason, PurchaseEvent, PurchaseFailed, PurchaseUpdated, ReceiptBlob};
