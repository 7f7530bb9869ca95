use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use ledgerflow_chain::MinedTransaction;
use serde::{Deserialize, Serialize};

use crate::error::PendingError;

/// Chain-side status of a tracked transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
  /// Included in a block that is not yet final.
  Mined,
  FinalizedSuccess,
  FinalizedFailure,
}

impl TransactionStatus {
  fn rank(self) -> u8 {
    match self {
      Self::Mined => 0,
      Self::FinalizedSuccess | Self::FinalizedFailure => 1,
    }
  }

  pub fn is_final(self) -> bool {
    self.rank() > 0
  }

  /// Final status for a mined transaction.
  pub fn finalized(receipt: &MinedTransaction) -> Self {
    if receipt.success {
      Self::FinalizedSuccess
    } else {
      Self::FinalizedFailure
    }
  }
}

/// What the ledger knows about one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
  pub status: TransactionStatus,
  /// Receipt as last observed on chain.
  pub receipt: MinedTransaction,
}

/// Transaction-status ledger.
///
/// Statuses only move forward: once finalized, a transaction stays finalized.
#[async_trait]
pub trait TransactionLedger: Send + Sync {
  /// Record a status with the receipt it was derived from.
  ///
  /// Returns `false` if it would move the status backwards.
  async fn record(
    &self,
    chain_id: u64,
    receipt: &MinedTransaction,
    status: TransactionStatus,
  ) -> Result<bool, PendingError>;

  async fn entry(
    &self,
    chain_id: u64,
    transaction_hash: &str,
  ) -> Result<Option<LedgerEntry>, PendingError>;

  async fn status(
    &self,
    chain_id: u64,
    transaction_hash: &str,
  ) -> Result<Option<TransactionStatus>, PendingError> {
    Ok(self.entry(chain_id, transaction_hash).await?.map(|entry| entry.status))
  }

  /// The receipt, once the transaction is final.
  async fn final_receipt(
    &self,
    chain_id: u64,
    transaction_hash: &str,
  ) -> Result<Option<MinedTransaction>, PendingError> {
    Ok(
      self
        .entry(chain_id, transaction_hash)
        .await?
        .filter(|entry| entry.status.is_final())
        .map(|entry| entry.receipt),
    )
  }
}

/// In-memory ledger implementation.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
  entries: Mutex<HashMap<(u64, String), LedgerEntry>>,
}

impl InMemoryLedger {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl TransactionLedger for InMemoryLedger {
  async fn record(
    &self,
    chain_id: u64,
    receipt: &MinedTransaction,
    status: TransactionStatus,
  ) -> Result<bool, PendingError> {
    let mut entries = self.entries.lock().map_err(|_| PendingError::Poisoned("ledger"))?;
    let key = (chain_id, receipt.hash.to_lowercase());
    match entries.get(&key) {
      Some(current) if current.status.rank() >= status.rank() => Ok(false),
      _ => {
        entries.insert(
          key,
          LedgerEntry {
            status,
            receipt: receipt.clone(),
          },
        );
        Ok(true)
      }
    }
  }

  async fn entry(
    &self,
    chain_id: u64,
    transaction_hash: &str,
  ) -> Result<Option<LedgerEntry>, PendingError> {
    let entries = self.entries.lock().map_err(|_| PendingError::Poisoned("ledger"))?;
    Ok(entries.get(&(chain_id, transaction_hash.to_lowercase())).cloned())
  }
}

/// What a check-status step should do with a submitted transaction.
///
/// Every variant past `Unknown` carries the receipt the ledger holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
  /// Nothing recorded yet.
  Unknown,
  /// Mined but not final.
  Mined(MinedTransaction),
  Succeeded(MinedTransaction),
  Reverted(MinedTransaction),
}

impl Settlement {
  pub fn is_final(&self) -> bool {
    matches!(self, Self::Succeeded(_) | Self::Reverted(_))
  }

  pub fn receipt(&self) -> Option<&MinedTransaction> {
    match self {
      Self::Unknown => None,
      Self::Mined(receipt) | Self::Succeeded(receipt) | Self::Reverted(receipt) => Some(receipt),
    }
  }
}

/// Read the settlement of a transaction from the ledger.
pub async fn check_settlement(
  ledger: &dyn TransactionLedger,
  chain_id: u64,
  transaction_hash: &str,
) -> Result<Settlement, PendingError> {
  let Some(entry) = ledger.entry(chain_id, transaction_hash).await? else {
    return Ok(Settlement::Unknown);
  };
  Ok(match entry.status {
    TransactionStatus::Mined => Settlement::Mined(entry.receipt),
    TransactionStatus::FinalizedSuccess => Settlement::Succeeded(entry.receipt),
    TransactionStatus::FinalizedFailure => Settlement::Reverted(entry.receipt),
  })
}
