use std::sync::Arc;

use chrono::{Duration, Utc};
use ledgerflow_chain::MinedTransaction;
use ledgerflow_kv::KvStore;
use ledgerflow_queue::Publisher;
use tracing::{debug, info, instrument, warn};

use crate::error::PendingError;
use crate::ledger::TransactionLedger;
use crate::record::{PendingState, PendingTransaction};

/// Partition holding each chain's finalizer cursor, keyed by chain id.
const CURSOR_PARTITION: &str = "finalizer_cursor";

/// Result of [`PendingTransactionStore::finalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
  /// The resume message was published and the record removed.
  Published,
  /// No record: never tracked, or already finalized.
  NotTracked,
  /// Another finalizer holds the record.
  InFlight,
}

/// Result of a retry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
  pub republished: usize,
  pub failed: usize,
}

fn partition(chain_id: u64) -> String {
  chain_id.to_string()
}

fn range(transaction_hash: &str) -> String {
  transaction_hash.to_lowercase()
}

/// Tracks submitted transactions until their resume is published.
pub struct PendingTransactionStore {
  kv: Arc<dyn KvStore>,
  publisher: Arc<dyn Publisher>,
  ledger: Option<Arc<dyn TransactionLedger>>,
  stale_publish: Duration,
}

impl PendingTransactionStore {
  pub fn new(kv: Arc<dyn KvStore>, publisher: Arc<dyn Publisher>) -> Self {
    Self {
      kv,
      publisher,
      ledger: None,
      stale_publish: Duration::minutes(2),
    }
  }

  /// Ledger consulted by [`resume_if_final`](Self::resume_if_final).
  pub fn with_ledger(mut self, ledger: Arc<dyn TransactionLedger>) -> Self {
    self.ledger = Some(ledger);
    self
  }

  /// Receipt of a final transaction, from the attached ledger.
  ///
  /// Always `None` without a ledger.
  pub async fn final_receipt(
    &self,
    chain_id: u64,
    transaction_hash: &str,
  ) -> Result<Option<MinedTransaction>, PendingError> {
    match &self.ledger {
      Some(ledger) => ledger.final_receipt(chain_id, transaction_hash).await,
      None => Ok(None),
    }
  }

  /// Age after which a record stuck in `publishing` is retried by the sweep.
  pub fn with_stale_publish(mut self, stale_publish: Duration) -> Self {
    self.stale_publish = stale_publish;
    self
  }

  /// Start tracking a transaction. Returns `false` if it is already tracked.
  #[instrument(
    name = "pending_register",
    skip(self, tx),
    fields(chain_id = tx.chain_id, transaction_hash = %tx.transaction_hash)
  )]
  pub async fn register(&self, tx: &PendingTransaction) -> Result<bool, PendingError> {
    let value = serde_json::to_string(tx)?;
    let inserted = self
      .kv
      .put_if_absent(&partition(tx.chain_id), &range(&tx.transaction_hash), value)
      .await?;
    if inserted {
      info!(nonce = tx.nonce, "pending_registered");
    } else {
      debug!("pending_already_registered");
    }
    Ok(inserted)
  }

  pub async fn lookup_by_hash(
    &self,
    chain_id: u64,
    transaction_hash: &str,
  ) -> Result<Option<PendingTransaction>, PendingError> {
    match self.kv.get(&partition(chain_id), &range(transaction_hash)).await? {
      Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
      None => Ok(None),
    }
  }

  /// Every tracked transaction on a chain.
  pub async fn list(&self, chain_id: u64) -> Result<Vec<PendingTransaction>, PendingError> {
    let mut records = Vec::new();
    for (_, raw) in self.kv.scan(&partition(chain_id)).await? {
      records.push(serde_json::from_str(&raw)?);
    }
    Ok(records)
  }

  /// Publish the resume message for a finalized transaction and stop tracking it.
  ///
  /// A missing record means the transaction was already finalized, so
  /// nothing is published. If publishing fails the record stays as
  /// `publish_failed` for [`retry_unpublished`](Self::retry_unpublished).
  #[instrument(name = "pending_finalize", skip(self, receipt), fields(success = receipt.success))]
  pub async fn finalize(
    &self,
    chain_id: u64,
    transaction_hash: &str,
    receipt: MinedTransaction,
  ) -> Result<FinalizeOutcome, PendingError> {
    let Some(raw) = self.kv.get(&partition(chain_id), &range(transaction_hash)).await? else {
      debug!("pending_not_tracked");
      return Ok(FinalizeOutcome::NotTracked);
    };

    let mut record: PendingTransaction = serde_json::from_str(&raw)?;
    match record.state {
      PendingState::Publishing if !self.is_stale(&record) => {
        debug!("pending_in_flight");
        return Ok(FinalizeOutcome::InFlight);
      }
      _ => {}
    }

    record.receipt = Some(receipt);
    self.claim_and_publish(&raw, record).await
  }

  /// Publish `tx`'s resume now if the ledger already holds a final status.
  ///
  /// Called once the waiting step can accept its resume. The finalizer may
  /// have published and dropped an earlier record for the same hash while
  /// the step was still running, so a missing or in-flight record is
  /// answered with a direct publish. Returns whether a resume went out.
  #[instrument(
    name = "pending_resume_if_final",
    skip(self, tx),
    fields(chain_id = tx.chain_id, transaction_hash = %tx.transaction_hash)
  )]
  pub async fn resume_if_final(&self, tx: &PendingTransaction) -> Result<bool, PendingError> {
    let Some(receipt) = self.final_receipt(tx.chain_id, &tx.transaction_hash).await? else {
      return Ok(false);
    };

    match self.finalize(tx.chain_id, &tx.transaction_hash, receipt).await? {
      FinalizeOutcome::Published => {}
      FinalizeOutcome::NotTracked | FinalizeOutcome::InFlight => {
        self.publisher.publish(tx.resume.clone()).await?;
        info!(step_kind = %tx.resume.step_kind, "pending_resume_republished");
      }
    }
    Ok(true)
  }

  /// First block the finalizer has not yet finalized on `chain_id`.
  pub async fn finalizer_cursor(&self, chain_id: u64) -> Result<Option<u64>, PendingError> {
    match self.kv.get(CURSOR_PARTITION, &chain_id.to_string()).await? {
      Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
      None => Ok(None),
    }
  }

  pub async fn set_finalizer_cursor(&self, chain_id: u64, block: u64) -> Result<(), PendingError> {
    let range = chain_id.to_string();
    let value = serde_json::to_string(&block)?;
    loop {
      let written = match self.kv.get(CURSOR_PARTITION, &range).await? {
        Some(current) if current == value => true,
        Some(current) => {
          self
            .kv
            .compare_and_swap(CURSOR_PARTITION, &range, &current, Some(value.clone()))
            .await?
        }
        None => self.kv.put_if_absent(CURSOR_PARTITION, &range, value.clone()).await?,
      };
      if written {
        return Ok(());
      }
    }
  }

  /// Re-publish resumes whose publish failed or stalled mid-flight.
  #[instrument(name = "pending_retry_sweep", skip(self))]
  pub async fn retry_unpublished(&self, chain_id: u64) -> Result<RetryReport, PendingError> {
    let mut report = RetryReport::default();

    for (_, raw) in self.kv.scan(&partition(chain_id)).await? {
      let record: PendingTransaction = serde_json::from_str(&raw)?;
      let due = match record.state {
        PendingState::Submitted => false,
        PendingState::PublishFailed => true,
        PendingState::Publishing => self.is_stale(&record),
      };
      if !due {
        continue;
      }

      let transaction_hash = record.transaction_hash.clone();
      match self.claim_and_publish(&raw, record).await {
        Ok(FinalizeOutcome::Published) => report.republished += 1,
        Ok(_) => {}
        Err(err) => {
          warn!(transaction_hash = %transaction_hash, error = %err, "pending_retry_failed");
          report.failed += 1;
        }
      }
    }

    if report.republished > 0 || report.failed > 0 {
      info!(
        republished = report.republished,
        failed = report.failed,
        "pending_retry_sweep_done"
      );
    }
    Ok(report)
  }

  fn is_stale(&self, record: &PendingTransaction) -> bool {
    Utc::now() - record.updated_at >= self.stale_publish
  }

  /// CAS the record from `raw` to publishing, publish, then delete it.
  async fn claim_and_publish(
    &self,
    raw: &str,
    mut record: PendingTransaction,
  ) -> Result<FinalizeOutcome, PendingError> {
    let partition = partition(record.chain_id);
    let range = range(&record.transaction_hash);

    record.state = PendingState::Publishing;
    record.updated_at = Utc::now();
    let claimed = serde_json::to_string(&record)?;
    if !self
      .kv
      .compare_and_swap(&partition, &range, raw, Some(claimed.clone()))
      .await?
    {
      debug!(transaction_hash = %range, "pending_claim_lost");
      return Ok(FinalizeOutcome::InFlight);
    }

    if let Err(err) = self.publisher.publish(record.resume.clone()).await {
      record.state = PendingState::PublishFailed;
      record.updated_at = Utc::now();
      let failed = serde_json::to_string(&record)?;
      if !self
        .kv
        .compare_and_swap(&partition, &range, &claimed, Some(failed))
        .await?
      {
        warn!(transaction_hash = %range, "pending_record_changed_during_publish");
      }
      warn!(transaction_hash = %range, error = %err, "pending_publish_failed");
      return Err(err.into());
    }

    if !self.kv.compare_and_swap(&partition, &range, &claimed, None).await? {
      warn!(transaction_hash = %range, "pending_record_changed_during_publish");
    }
    info!(
      transaction_hash = %range,
      step_kind = %record.resume.step_kind,
      "pending_resume_published"
    );
    Ok(FinalizeOutcome::Published)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use ledgerflow_kv::InMemoryKvStore;
  use crate::ledger::{InMemoryLedger, TransactionStatus};
  use ledgerflow_queue::{MemoryBroker, QueueError, StepMessage};
  use std::sync::atomic::{AtomicBool, Ordering};

  /// Fails every publish while `down` is set.
  #[derive(Default)]
  struct FlakyPublisher {
    down: AtomicBool,
    inner: MemoryBroker,
  }

  #[async_trait]
  impl Publisher for FlakyPublisher {
    async fn publish(&self, message: StepMessage) -> Result<(), QueueError> {
      if self.down.load(Ordering::SeqCst) {
        return Err(QueueError::Broker("unreachable".to_string()));
      }
      self.inner.publish(message).await
    }
  }

  fn tracked(hash: &str) -> PendingTransaction {
    let resume = StepMessage::step("resume-1", "wf-1", "checkStakeStatus", "client", 3);
    PendingTransaction::new(3, hash, "0xB", "0xStaking", 10, resume)
  }

  fn receipt(hash: &str) -> MinedTransaction {
    MinedTransaction {
      hash: hash.to_string(),
      block_number: 100,
      success: true,
    }
  }

  #[tokio::test]
  async fn test_register_is_idempotent() {
    let store = PendingTransactionStore::new(Arc::new(InMemoryKvStore::new()), Arc::new(MemoryBroker::new()));

    assert!(store.register(&tracked("0xAA")).await.unwrap());
    assert!(!store.register(&tracked("0xaa")).await.unwrap());

    let found = store.lookup_by_hash(3, "0xAa").await.unwrap().unwrap();
    assert_eq!(found.state, PendingState::Submitted);
    assert_eq!(store.list(3).await.unwrap().len(), 1);
    assert!(store.list(1409).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_duplicate_finalize_publishes_once() {
    let broker = MemoryBroker::new();
    let store = PendingTransactionStore::new(Arc::new(InMemoryKvStore::new()), Arc::new(broker.clone()));
    store.register(&tracked("0xaa")).await.unwrap();

    let first = store.finalize(3, "0xaa", receipt("0xaa")).await.unwrap();
    let second = store.finalize(3, "0xaa", receipt("0xaa")).await.unwrap();

    assert_eq!(first, FinalizeOutcome::Published);
    assert_eq!(second, FinalizeOutcome::NotTracked);
    assert_eq!(broker.published(), 1);
    assert!(store.lookup_by_hash(3, "0xaa").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_failed_publish_is_retried_by_sweep() {
    let publisher = Arc::new(FlakyPublisher::default());
    let store = PendingTransactionStore::new(Arc::new(InMemoryKvStore::new()), publisher.clone());
    store.register(&tracked("0xaa")).await.unwrap();

    publisher.down.store(true, Ordering::SeqCst);
    let result = store.finalize(3, "0xaa", receipt("0xaa")).await;
    assert!(matches!(result, Err(PendingError::Publish(_))));

    let kept = store.lookup_by_hash(3, "0xaa").await.unwrap().unwrap();
    assert_eq!(kept.state, PendingState::PublishFailed);
    assert_eq!(kept.receipt, Some(receipt("0xaa")));

    // Still down: the sweep reports the failure and keeps the record
    let report = store.retry_unpublished(3).await.unwrap();
    assert_eq!(report, RetryReport { republished: 0, failed: 1 });

    publisher.down.store(false, Ordering::SeqCst);
    let report = store.retry_unpublished(3).await.unwrap();
    assert_eq!(report, RetryReport { republished: 1, failed: 0 });
    assert_eq!(publisher.inner.published(), 1);
    assert!(store.lookup_by_hash(3, "0xaa").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_sweep_skips_submitted_and_fresh_publishing() {
    let kv = Arc::new(InMemoryKvStore::new());
    let broker = MemoryBroker::new();
    let store = PendingTransactionStore::new(kv.clone(), Arc::new(broker.clone()));
    store.register(&tracked("0xaa")).await.unwrap();

    // Simulate a finalizer that claimed the record and is mid-publish
    let mut publishing = tracked("0xbb");
    publishing.state = PendingState::Publishing;
    kv.put_if_absent("3", "0xbb", serde_json::to_string(&publishing).unwrap())
      .await
      .unwrap();

    assert_eq!(store.retry_unpublished(3).await.unwrap(), RetryReport::default());
    assert_eq!(
      store.finalize(3, "0xbb", receipt("0xbb")).await.unwrap(),
      FinalizeOutcome::InFlight
    );

    // Once stale, the sweep takes it over
    let store = store.with_stale_publish(Duration::zero());
    assert_eq!(store.retry_unpublished(3).await.unwrap().republished, 1);
    assert_eq!(broker.published(), 1);
  }

  #[tokio::test]
  async fn test_resume_if_final_publishes_for_dropped_record() {
    let broker = MemoryBroker::new();
    let ledger = Arc::new(InMemoryLedger::new());
    let store = PendingTransactionStore::new(Arc::new(InMemoryKvStore::new()), Arc::new(broker.clone()))
      .with_ledger(ledger.clone());
    let tx = tracked("0xaa");

    // Not final yet: nothing to do
    store.register(&tx).await.unwrap();
    assert!(!store.resume_if_final(&tx).await.unwrap());
    assert!(broker.is_empty());

    // A finalizer already published and removed the record
    ledger
      .record(3, &receipt("0xaa"), TransactionStatus::FinalizedSuccess)
      .await
      .unwrap();
    store.finalize(3, "0xaa", receipt("0xaa")).await.unwrap();
    assert_eq!(broker.take_all().len(), 1);

    assert!(store.resume_if_final(&tx).await.unwrap());
    let resumed = broker.take_all();
    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0].step_kind, "checkStakeStatus");
  }

  #[tokio::test]
  async fn test_resume_if_final_finalizes_tracked_record() {
    let broker = MemoryBroker::new();
    let ledger = Arc::new(InMemoryLedger::new());
    let store = PendingTransactionStore::new(Arc::new(InMemoryKvStore::new()), Arc::new(broker.clone()))
      .with_ledger(ledger.clone());
    ledger
      .record(3, &receipt("0xaa"), TransactionStatus::FinalizedFailure)
      .await
      .unwrap();

    let tx = tracked("0xaa");
    store.register(&tx).await.unwrap();
    assert!(store.resume_if_final(&tx).await.unwrap());

    assert_eq!(broker.published(), 1);
    assert!(store.lookup_by_hash(3, "0xaa").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_finalizer_cursor_survives_new_store() {
    let kv = Arc::new(InMemoryKvStore::new());
    let store = PendingTransactionStore::new(kv.clone(), Arc::new(MemoryBroker::new()));
    assert_eq!(store.finalizer_cursor(3).await.unwrap(), None);

    store.set_finalizer_cursor(3, 12).await.unwrap();
    store.set_finalizer_cursor(3, 15).await.unwrap();

    let reopened = PendingTransactionStore::new(kv, Arc::new(MemoryBroker::new()));
    assert_eq!(reopened.finalizer_cursor(3).await.unwrap(), Some(15));
    assert_eq!(reopened.finalizer_cursor(1409).await.unwrap(), None);
    // Cursor keys never show up as tracked transactions
    assert!(reopened.list(3).await.unwrap().is_empty());
  }
}
