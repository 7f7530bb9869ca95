//! Ledgerflow Queue
//!
//! Messages that drive the step machine, and the seams between the engine
//! and a message broker. Delivery is at-least-once: a message can arrive
//! more than once and at more than one worker.
//!
//! Key pieces:
//! - [`StepMessage`]: a validated "run this step" instruction
//! - [`WireMessage`]: the JSON shape on the wire, validated via `TryFrom`
//! - [`Publisher`] / [`Subscription`]: broker seams
//! - [`MemoryBroker`]: in-process broker with bounded prefetch

mod broker;
mod error;
mod message;

pub use broker::{Delivery, MemoryBroker, MemorySubscription};
pub use error::QueueError;
pub use message::{MessageTarget, StepMessage, WireMessage};

use async_trait::async_trait;

/// Publishes step messages.
#[async_trait]
pub trait Publisher: Send + Sync {
  async fn publish(&self, message: StepMessage) -> Result<(), QueueError>;
}

/// A consumer's view of the queue.
#[async_trait]
pub trait Subscription: Send + Sync {
  /// Wait for the next delivery. `None` once the queue is closed and drained.
  async fn next(&self) -> Option<Delivery>;

  /// Acknowledge a delivery; it will not be redelivered.
  async fn ack(&self, delivery: Delivery) -> Result<(), QueueError>;

  /// Reject a delivery; it is redelivered with its attempt count bumped.
  async fn nack(&self, delivery: Delivery) -> Result<(), QueueError>;
}
