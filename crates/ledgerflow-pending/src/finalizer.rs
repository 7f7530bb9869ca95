use std::sync::Arc;

use ledgerflow_chain::{ChainContext, MinedTransaction};
use tracing::{debug, info, instrument, warn};

use crate::error::PendingError;
use crate::ledger::{TransactionLedger, TransactionStatus};
use crate::record::PendingState;
use crate::store::{FinalizeOutcome, PendingTransactionStore};

/// Counts from one finalized range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeReport {
  /// Successful transactions whose resume was published.
  pub finalized: usize,
  /// Reverted transactions whose resume was published.
  pub reverted: usize,
  /// Resumes left for the retry sweep after a failed publish.
  pub deferred: usize,
  /// Untracked, already finalized, or held by another finalizer.
  pub skipped: usize,
}

/// Matches finalized blocks against tracked transactions.
///
/// The per-chain cursor is kept in the pending store's KV backend, so a
/// restarted finalizer carries on where the previous one stopped.
pub struct TransactionFinalizer {
  pending: Arc<PendingTransactionStore>,
  ledger: Arc<dyn TransactionLedger>,
}

impl TransactionFinalizer {
  pub fn new(pending: Arc<PendingTransactionStore>, ledger: Arc<dyn TransactionLedger>) -> Self {
    Self { pending, ledger }
  }

  /// Start finalizing `chain_id` at `block` on the next head.
  pub async fn resume_from(&self, chain_id: u64, block: u64) -> Result<(), PendingError> {
    self.pending.set_finalizer_cursor(chain_id, block).await
  }

  /// First block on `chain_id` not yet finalized, if any head was handled.
  pub async fn cursor(&self, chain_id: u64) -> Result<Option<u64>, PendingError> {
    self.pending.finalizer_cursor(chain_id).await
  }

  /// Finalize every tracked transaction mined in blocks `from..=to`.
  ///
  /// Reverted transactions are finalized too: the resumed check-status step
  /// decides what a revert means for its workflow.
  #[instrument(name = "finalize_range", skip(self, chain), fields(chain_id = chain.chain_id))]
  pub async fn finalize_range(
    &self,
    chain: &ChainContext,
    from: u64,
    to: u64,
  ) -> Result<FinalizeReport, PendingError> {
    let mut report = FinalizeReport::default();

    for tx in chain.client.transactions_in_range(from, to).await? {
      if self.pending.lookup_by_hash(chain.chain_id, &tx.hash).await?.is_none() {
        report.skipped += 1;
        continue;
      }
      self.settle(chain.chain_id, tx, &mut report).await?;
    }

    info!(
      from,
      to,
      finalized = report.finalized,
      reverted = report.reverted,
      deferred = report.deferred,
      skipped = report.skipped,
      "range_finalized"
    );
    Ok(report)
  }

  /// Finalize tracked transactions mined at or below `boundary`, whatever
  /// block they landed in.
  ///
  /// Used when a chain has no cursor yet: records registered before the
  /// first head are matched by receipt instead of by block range.
  #[instrument(name = "finalize_tracked", skip(self, chain), fields(chain_id = chain.chain_id))]
  pub async fn finalize_tracked(
    &self,
    chain: &ChainContext,
    boundary: u64,
  ) -> Result<FinalizeReport, PendingError> {
    let mut report = FinalizeReport::default();

    for record in self.pending.list(chain.chain_id).await? {
      // Claimed records belong to the retry sweep
      if record.state != PendingState::Submitted {
        report.skipped += 1;
        continue;
      }
      match chain.client.transaction_receipt(&record.transaction_hash).await? {
        Some(receipt) if receipt.block_number <= boundary => {
          self.settle(chain.chain_id, receipt, &mut report).await?;
        }
        _ => {}
      }
    }

    info!(
      boundary,
      finalized = report.finalized,
      reverted = report.reverted,
      deferred = report.deferred,
      "tracked_finalized"
    );
    Ok(report)
  }

  /// Record `tx` as final and publish its resume.
  async fn settle(
    &self,
    chain_id: u64,
    tx: MinedTransaction,
    report: &mut FinalizeReport,
  ) -> Result<(), PendingError> {
    let status = TransactionStatus::finalized(&tx);
    self.ledger.record(chain_id, &tx, status).await?;

    let success = tx.success;
    let hash = tx.hash.clone();
    match self.pending.finalize(chain_id, &hash, tx).await {
      Ok(FinalizeOutcome::Published) if success => report.finalized += 1,
      Ok(FinalizeOutcome::Published) => report.reverted += 1,
      Ok(FinalizeOutcome::NotTracked | FinalizeOutcome::InFlight) => report.skipped += 1,
      Err(PendingError::Publish(err)) => {
        warn!(transaction_hash = %hash, error = %err, "finalize_publish_deferred");
        report.deferred += 1;
      }
      Err(err) => return Err(err),
    }
    Ok(())
  }

  /// Handle a new chain head.
  ///
  /// Blocks deeper than the chain's finality depth are finalized from the
  /// cursor onwards, or through [`finalize_tracked`](Self::finalize_tracked)
  /// when the chain has no cursor. Tracked transactions in shallower blocks are recorded
  /// as mined. Returns `None` when no new block became final.
  #[instrument(name = "finalizer_new_head", skip(self, chain), fields(chain_id = chain.chain_id))]
  pub async fn on_new_head(
    &self,
    chain: &ChainContext,
    head: u64,
  ) -> Result<Option<FinalizeReport>, PendingError> {
    let Some(boundary) = head.checked_sub(chain.finality_depth) else {
      debug!(head, depth = chain.finality_depth, "chain_shallower_than_finality_depth");
      return Ok(None);
    };

    // Not yet final: mark as mined only
    if head > boundary {
      for tx in chain.client.transactions_in_range(boundary + 1, head).await? {
        if self.pending.lookup_by_hash(chain.chain_id, &tx.hash).await?.is_some() {
          self
            .ledger
            .record(chain.chain_id, &tx, TransactionStatus::Mined)
            .await?;
        }
      }
    }

    let report = match self.cursor(chain.chain_id).await? {
      Some(from) if from > boundary => return Ok(None),
      Some(from) => self.finalize_range(chain, from, boundary).await?,
      None => self.finalize_tracked(chain, boundary).await?,
    };
    self.resume_from(chain.chain_id, boundary + 1).await?;
    Ok(Some(report))
  }
}
