use chrono::{DateTime, Utc};
use ledgerflow_chain::MinedTransaction;
use ledgerflow_queue::StepMessage;
use serde::{Deserialize, Serialize};

/// Where a tracked transaction is in its resume lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingState {
  /// Submitted; waiting for finalization.
  Submitted,
  /// Finalized and claimed by a finalizer that is publishing the resume.
  Publishing,
  /// Finalized, but publishing the resume failed.
  PublishFailed,
}

/// A submitted transaction awaiting finalization.
///
/// Stored as JSON under partition `chain_id`, range `transaction_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
  pub transaction_hash: String,
  pub chain_id: u64,
  pub from_address: String,
  pub to_address: String,
  pub nonce: u64,
  /// Published once the transaction is final.
  pub resume: StepMessage,
  pub state: PendingState,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub receipt: Option<MinedTransaction>,
  pub registered_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl PendingTransaction {
  pub fn new(
    chain_id: u64,
    transaction_hash: impl Into<String>,
    from_address: impl Into<String>,
    to_address: impl Into<String>,
    nonce: u64,
    resume: StepMessage,
  ) -> Self {
    let now = Utc::now();
    Self {
      transaction_hash: transaction_hash.into().to_lowercase(),
      chain_id,
      from_address: from_address.into(),
      to_address: to_address.into(),
      nonce,
      resume,
      state: PendingState::Submitted,
      receipt: None,
      registered_at: now,
      updated_at: now,
    }
  }
}
