//! Event publishing/subscription abstraction (mechanics only).
//!
//! The store pushes purchase updates and purchase errors at the client; this
//! module turns those pushes into an ordered stream that a single consumer
//! task drains.
//!
//! - **FIFO per publisher**: messages arrive in the order they were published.
//! - **At-least-once**: a store may redeliver; consumers must be idempotent.
//! - **Scoped**: a subscription lives exactly as long as its value. Dropping it
//!   (or calling [`Subscription::close`]) detaches the listener; there is no
//!   process-wide registration to clean up.

use tokio::sync::mpsc::{UnboundedReceiver, error::TryRecvError};

/// A subscription to an event stream.
///
/// Each subscription gets a copy of every message published after it was
/// created (broadcast semantics).
///
/// ```ignore
/// let mut subscription = store.subscribe();
/// while let Some(event) = subscription.recv().await {
///     route(event);
/// }
/// // `None`: the publisher went away.
/// ```
///
/// Subscriptions are single-consumer. Fan out from the consuming task when
/// several workers need the messages.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message. `None` once the publisher is gone and the
    /// buffer is drained.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Take a buffered message without waiting.
    pub fn try_recv(&mut self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Stop accepting new messages; already buffered ones can still be read.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// ## Delivery guarantees
///
/// - Events may be delivered more than once (store redelivery)
/// - Events from one publisher keep their order
/// - Subscribers that went away are dropped silently
///
/// `publish()` is synchronous and never waits on subscribers, so it can be
/// called from store callbacks without an executor.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}
