use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
  /// The node could not answer.
  #[error("rpc error: {0}")]
  Rpc(String),

  #[error("unknown chain id {0}")]
  UnknownChain(u64),

  /// The node refused a transaction outright.
  #[error("transaction rejected: {0}")]
  Rejected(String),

  #[error("{0} lock poisoned")]
  Poisoned(&'static str),
}

/// How a submission attempt failed.
#[derive(Debug, Error)]
pub enum SubmitError<E> {
  /// The node definitely did not accept the transaction.
  #[error("rejected: {0}")]
  Rejected(E),

  /// The transaction may or may not have been accepted (timeout, dropped
  /// connection).
  #[error("outcome unknown: {0}")]
  Ambiguous(E),
}

#[derive(Debug, Error)]
pub enum NonceError<E> {
  /// The nonce could not be resolved against the chain.
  #[error("nonce lookup failed: {0}")]
  Chain(#[from] ChainError),

  /// Submission was rejected; the nonce was not consumed.
  #[error("submission rejected: {0}")]
  Rejected(E),

  /// Submission outcome unknown; the nonce is reconciled on next use.
  #[error("submission outcome unknown: {0}")]
  Ambiguous(E),
}
