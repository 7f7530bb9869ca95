use ledgerflow_chain::ChainError;
use ledgerflow_kv::KvError;
use ledgerflow_queue::QueueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PendingError {
  #[error("kv error: {0}")]
  Kv(#[from] KvError),

  /// The resume message could not be published; the record is kept for
  /// the retry sweep.
  #[error("resume publish failed: {0}")]
  Publish(#[from] QueueError),

  #[error("chain error: {0}")]
  Chain(#[from] ChainError),

  #[error("record serialization failed: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("{0} lock poisoned")]
  Poisoned(&'static str),
}
