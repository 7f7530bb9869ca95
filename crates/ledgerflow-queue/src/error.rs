use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
  /// The message is malformed and can never be processed.
  #[error("invalid message: {0}")]
  Invalid(String),

  #[error("message serialization failed: {0}")]
  Serialization(#[from] serde_json::Error),

  /// The queue no longer accepts messages.
  #[error("queue closed")]
  Closed,

  /// The broker rejected or failed to take the message.
  #[error("broker error: {0}")]
  Broker(String),
}
