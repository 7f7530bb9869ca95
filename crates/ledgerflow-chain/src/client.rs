use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChainError;

/// A transaction included in a block, with its execution outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinedTransaction {
  pub hash: String,
  pub block_number: u64,
  /// Whether execution succeeded. A reverted transaction is still final.
  pub success: bool,
}

/// RPC seam to one chain's node.
#[async_trait]
pub trait ChainClient: Send + Sync {
  /// Transaction count for `address`, including the node's pending pool.
  async fn transaction_count(&self, address: &str) -> Result<u64, ChainError>;

  /// Latest block number.
  async fn head_block(&self) -> Result<u64, ChainError>;

  /// Transactions mined in blocks `from..=to`.
  async fn transactions_in_range(&self, from: u64, to: u64) -> Result<Vec<MinedTransaction>, ChainError>;

  /// Receipt of a mined transaction, or `None` while it is unmined.
  async fn transaction_receipt(&self, hash: &str) -> Result<Option<MinedTransaction>, ChainError>;
}

/// In-memory chain for tests and local runs.
///
/// Transaction counts only move through [`InMemoryChain::accept`] or
/// [`InMemoryChain::set_transaction_count`].
#[derive(Debug, Default)]
pub struct InMemoryChain {
  counts: Mutex<HashMap<String, u64>>,
  accepted: Mutex<Vec<(String, u64)>>,
  mined: Mutex<Vec<MinedTransaction>>,
  head: AtomicU64,
  count_queries: AtomicU64,
}

impl InMemoryChain {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set_transaction_count(&self, address: &str, count: u64) {
    if let Ok(mut counts) = self.counts.lock() {
      counts.insert(address.to_lowercase(), count);
    }
  }

  /// Accept a transaction from `address` if `nonce` is the next expected one.
  pub fn accept(&self, address: &str, nonce: u64) -> Result<(), ChainError> {
    let mut counts = self.counts.lock().map_err(|_| ChainError::Poisoned("chain counts"))?;
    let count = counts.entry(address.to_lowercase()).or_insert(0);
    if nonce != *count {
      return Err(ChainError::Rejected(format!(
        "nonce {nonce} does not match expected {count}"
      )));
    }
    *count += 1;
    if let Ok(mut accepted) = self.accepted.lock() {
      accepted.push((address.to_lowercase(), nonce));
    }
    Ok(())
  }

  /// Every (address, nonce) accepted so far, in acceptance order.
  pub fn accepted(&self) -> Vec<(String, u64)> {
    self.accepted.lock().map(|accepted| accepted.clone()).unwrap_or_default()
  }

  pub fn set_head(&self, block: u64) {
    self.head.store(block, Ordering::SeqCst);
  }

  /// Include a transaction in a block.
  pub fn mine(&self, transaction: MinedTransaction) {
    if let Ok(mut mined) = self.mined.lock() {
      mined.push(transaction);
    }
  }

  /// Number of `transaction_count` calls served.
  pub fn count_queries(&self) -> u64 {
    self.count_queries.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl ChainClient for InMemoryChain {
  async fn transaction_count(&self, address: &str) -> Result<u64, ChainError> {
    self.count_queries.fetch_add(1, Ordering::SeqCst);
    let counts = self.counts.lock().map_err(|_| ChainError::Poisoned("chain counts"))?;
    Ok(counts.get(&address.to_lowercase()).copied().unwrap_or(0))
  }

  async fn head_block(&self) -> Result<u64, ChainError> {
    Ok(self.head.load(Ordering::SeqCst))
  }

  async fn transactions_in_range(&self, from: u64, to: u64) -> Result<Vec<MinedTransaction>, ChainError> {
    let mined = self.mined.lock().map_err(|_| ChainError::Poisoned("chain blocks"))?;
    Ok(
      mined
        .iter()
        .filter(|tx| tx.block_number >= from && tx.block_number <= to)
        .cloned()
        .collect(),
    )
  }

  async fn transaction_receipt(&self, hash: &str) -> Result<Option<MinedTransaction>, ChainError> {
    let mined = self.mined.lock().map_err(|_| ChainError::Poisoned("chain blocks"))?;
    Ok(mined.iter().rev().find(|tx| tx.hash.eq_ignore_ascii_case(hash)).cloned())
  }
}
