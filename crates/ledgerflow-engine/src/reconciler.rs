//! Re-publishes steps that were persisted but never delivered.
//!
//! A step row is written before its message is published. If the publish is
//! lost, or a worker dies holding a lease, the row sits still. The sweep
//! finds such rows and publishes them again; the step claim absorbs any
//! duplicate this creates.
//!
//! With a pending store attached, the sweep also looks at `pending` rows
//! whose transaction is final but no longer tracked, and publishes the
//! resume they are still waiting for.

use std::sync::Arc;

use chrono::{Duration, Utc};
use ledgerflow_config::EngineSettings;
use ledgerflow_pending::PendingTransactionStore;
use ledgerflow_queue::{Publisher, StepMessage};
use ledgerflow_store::{StepStatus, Store, Workflow, WorkflowStep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::EngineError;

/// Counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
  pub republished: usize,
  /// Resumes published for pending rows whose transaction is final.
  pub resumed: usize,
  /// Rows left alone: finished workflows, check steps whose transaction is
  /// still pending, or pending rows the finalizer still tracks.
  pub skipped: usize,
  pub failed: usize,
}

pub struct Reconciler {
  store: Arc<dyn Store>,
  publisher: Arc<dyn Publisher>,
  pending: Option<Arc<PendingTransactionStore>>,
  /// How long a queued or pending row may wait before it counts as lost.
  stale_after: Duration,
}

impl Reconciler {
  pub fn new(store: Arc<dyn Store>, publisher: Arc<dyn Publisher>, stale_after: Duration) -> Self {
    Self {
      store,
      publisher,
      pending: None,
      stale_after,
    }
  }

  /// Also sweep `pending` rows against this store and its ledger.
  pub fn with_pending(mut self, pending: Arc<PendingTransactionStore>) -> Self {
    self.pending = Some(pending);
    self
  }

  pub fn from_settings(
    store: Arc<dyn Store>,
    publisher: Arc<dyn Publisher>,
    settings: &EngineSettings,
  ) -> Self {
    Self::new(
      store,
      publisher,
      Duration::milliseconds(settings.reconcile_after_ms as i64),
    )
  }

  #[instrument(name = "reconcile_sweep", skip(self))]
  pub async fn sweep(&self) -> Result<ReconcileReport, EngineError> {
    let now = Utc::now();
    let stalled = self
      .store
      .list_stalled_steps(now - self.stale_after, now)
      .await?;

    let mut report = ReconcileReport::default();
    for step in stalled {
      if !self.should_republish(&step).await? {
        report.skipped += 1;
        continue;
      }

      let workflow = self.store.get_workflow(&step.workflow_id).await?;
      if self.publish(&workflow, &step.kind).await {
        report.republished += 1;
      } else {
        report.failed += 1;
      }
    }

    if let Some(pending) = &self.pending {
      for step in self.store.list_pending_steps(now - self.stale_after).await? {
        self.resume_settled(pending, &step, &mut report).await?;
      }
    }

    if report != ReconcileReport::default() {
      info!(
        republished = report.republished,
        resumed = report.resumed,
        skipped = report.skipped,
        failed = report.failed,
        "reconcile_completed"
      );
    }
    Ok(report)
  }

  /// Sweep every `interval` until cancelled.
  pub async fn run(&self, interval: std::time::Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
      tokio::select! {
          _ = cancel.cancelled() => break,
          _ = ticker.tick() => {
              if let Err(err) = self.sweep().await {
                  warn!(error = %err, "reconcile_failed");
              }
          }
      }
    }
  }

  async fn publish(&self, workflow: &Workflow, step_kind: &str) -> bool {
    let message = StepMessage::step(
      Uuid::new_v4().to_string(),
      &workflow.id,
      step_kind,
      &workflow.client_id,
      workflow.chain_id as u64,
    );
    match self.publisher.publish(message).await {
      Ok(()) => {
        debug!(workflow_id = %workflow.id, step_kind, "step_republished");
        true
      }
      Err(err) => {
        warn!(workflow_id = %workflow.id, step_kind, error = %err, "step_republish_failed");
        false
      }
    }
  }

  /// Publish the resume of a pending row whose transaction settled after
  /// its record was dropped.
  ///
  /// The resume goes to the row's unfinished check steps, or to the row
  /// itself when nothing checks it.
  async fn resume_settled(
    &self,
    pending: &PendingTransactionStore,
    step: &WorkflowStep,
    report: &mut ReconcileReport,
  ) -> Result<(), EngineError> {
    let workflow = self.store.get_workflow(&step.workflow_id).await?;
    let chain_id = workflow.chain_id as u64;
    let Some(hash) = step.transaction_hash.as_deref() else {
      report.skipped += 1;
      return Ok(());
    };
    if workflow.status.is_terminal() || pending.lookup_by_hash(chain_id, hash).await?.is_some() {
      report.skipped += 1;
      return Ok(());
    }

    if pending.final_receipt(chain_id, hash).await?.is_none() {
      warn!(
        workflow_id = %workflow.id,
        step_kind = %step.kind,
        transaction_hash = hash,
        "pending_step_untracked"
      );
      report.skipped += 1;
      return Ok(());
    }

    let mut targets: Vec<String> = self
      .store
      .list_steps(&workflow.id)
      .await?
      .into_iter()
      .filter(|s| s.parent_step_id.as_deref() == Some(step.id.as_str()) && !s.status.is_terminal())
      .map(|s| s.kind)
      .collect();
    if targets.is_empty() {
      targets.push(step.kind.clone());
    }

    for kind in targets {
      if self.publish(&workflow, &kind).await {
        info!(workflow_id = %workflow.id, step_kind = %kind, transaction_hash = hash, "pending_step_resumed");
        report.resumed += 1;
      } else {
        report.failed += 1;
      }
    }
    Ok(())
  }

  async fn should_republish(&self, step: &WorkflowStep) -> Result<bool, EngineError> {
    let workflow = self.store.get_workflow(&step.workflow_id).await?;
    if workflow.status.is_terminal() {
      return Ok(false);
    }
    if step.status != StepStatus::Queued {
      // Expired or released lease
      return Ok(true);
    }

    // A queued check step waits for its parent's transaction to finalize
    match &step.parent_step_id {
      None => Ok(true),
      Some(parent_id) => {
        let parent = self.store.get_step_by_id(parent_id).await?;
        Ok(parent.status.is_terminal())
      }
    }
  }
}
