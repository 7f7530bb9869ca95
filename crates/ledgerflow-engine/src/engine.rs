//! Step router.
//!
//! The `WorkflowEngine` runs one step of one workflow per call. Everything it
//! needs is reloaded from the store, so any worker can pick up any message.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use ledgerflow_chain::ChainContext;
use ledgerflow_config::{EngineSettings, ExhaustionPolicy, StepDef};
use ledgerflow_pending::{PendingTransaction, PendingTransactionStore};
use ledgerflow_queue::{MessageTarget, Publisher, StepMessage};
use ledgerflow_store::{StepClaim, StepStatus, Store, Workflow, WorkflowStatus, WorkflowStep};
use ledgerflow_workflow::{StepConfig, StepGraph};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{EngineError, HandlerError};
use crate::events::{NoopNotifier, StepEvent, StepNotifier};
use crate::handler::{HandlerRegistry, StepContext, StepHandler, StepOutcome, Submission};
use crate::report::{WorkflowReport, workflow_report};

/// How one routed step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepExecution {
  Completed,
  Pending { transaction_hash: String },
  Failed,
  /// Nothing to do: another worker holds the step, or it waits on its
  /// check step.
  Skipped,
}

/// The step router.
///
/// Generic over `N: StepNotifier` so tests and services can observe step
/// events. Use `WorkflowEngine::new()` to discard them.
pub struct WorkflowEngine<N: StepNotifier = NoopNotifier> {
  config: Arc<StepConfig>,
  handlers: HandlerRegistry,
  store: Arc<dyn Store>,
  publisher: Arc<dyn Publisher>,
  pending: Arc<PendingTransactionStore>,
  notifier: N,
  lease_timeout: Duration,
}

impl WorkflowEngine<NoopNotifier> {
  /// Create an engine. Fails if a configured step kind has no handler.
  pub fn new(
    config: Arc<StepConfig>,
    handlers: HandlerRegistry,
    store: Arc<dyn Store>,
    publisher: Arc<dyn Publisher>,
    pending: Arc<PendingTransactionStore>,
  ) -> Result<Self, EngineError> {
    Self::with_notifier(config, handlers, store, publisher, pending, NoopNotifier)
  }
}

impl<N: StepNotifier> WorkflowEngine<N> {
  pub fn with_notifier(
    config: Arc<StepConfig>,
    handlers: HandlerRegistry,
    store: Arc<dyn Store>,
    publisher: Arc<dyn Publisher>,
    pending: Arc<PendingTransactionStore>,
    notifier: N,
  ) -> Result<Self, EngineError> {
    handlers.ensure_covers(&config)?;
    Ok(Self {
      config,
      handlers,
      store,
      publisher,
      pending,
      notifier,
      lease_timeout: Duration::minutes(5),
    })
  }

  /// How long a claim stays exclusive before another worker may retake it.
  pub fn with_lease_timeout(mut self, lease_timeout: Duration) -> Self {
    self.lease_timeout = lease_timeout;
    self
  }

  pub fn with_settings(self, settings: &EngineSettings) -> Self {
    self.with_lease_timeout(Duration::milliseconds(settings.lease_timeout_ms as i64))
  }

  pub fn config(&self) -> &StepConfig {
    &self.config
  }

  pub fn store(&self) -> &Arc<dyn Store> {
    &self.store
  }

  /// Create a workflow with its init step and publish the init step.
  ///
  /// A failed publish is logged; the reconciler picks the queued row up.
  #[instrument(name = "start_workflow", skip(self, request_params), fields(workflow_kind = %workflow_kind))]
  pub async fn start_workflow(
    &self,
    workflow_kind: &str,
    request_params: Value,
    client_id: &str,
    chain_id: u64,
  ) -> Result<String, EngineError> {
    let graph = self.graph(workflow_kind)?;
    let workflow_id = new_id();
    let workflow = Workflow::new(
      &workflow_id,
      workflow_kind,
      request_params.clone(),
      chain_id as i64,
      client_id,
    );
    self.store.create_workflow(&workflow).await?;

    let init = WorkflowStep::new(new_id(), &workflow_id, None, graph.init_step(), request_params);
    self.store.insert_step(&init).await?;

    info!(workflow_id = %workflow_id, "workflow_started");
    self.notifier.notify(StepEvent::WorkflowStarted {
      workflow_id: workflow_id.clone(),
      workflow_kind: workflow_kind.to_string(),
    });

    if let Err(err) = self.publish_step(&workflow, graph.init_step()).await {
      warn!(workflow_id = %workflow_id, error = %err, "init_publish_failed");
    }
    Ok(workflow_id)
  }

  /// Route a queue message.
  ///
  /// Init messages create their workflow first, using the message id as the
  /// workflow id so a redelivered init message finds the same workflow.
  #[instrument(
    name = "handle_message",
    skip(self, chain, message),
    fields(message_id = %message.message_id, step_kind = %message.step_kind)
  )]
  pub async fn handle_message(
    &self,
    chain: &Arc<ChainContext>,
    message: &StepMessage,
  ) -> Result<StepExecution, EngineError> {
    match &message.target {
      MessageTarget::Workflow { workflow_id } => {
        self
          .execute_step(chain, workflow_id, &message.step_kind, None)
          .await
      }
      MessageTarget::Start {
        workflow_kind,
        request_params,
      } => {
        let graph = self.graph(workflow_kind)?;
        if graph.init_step() != message.step_kind {
          return Err(EngineError::UnknownStep {
            workflow_kind: workflow_kind.clone(),
            step_kind: message.step_kind.clone(),
          });
        }

        let workflow = Workflow::new(
          &message.message_id,
          workflow_kind,
          request_params.clone(),
          message.chain_id as i64,
          &message.client_id,
        );
        if self.store.create_workflow(&workflow).await? {
          info!(workflow_id = %workflow.id, "workflow_started");
          self.notifier.notify(StepEvent::WorkflowStarted {
            workflow_id: workflow.id.clone(),
            workflow_kind: workflow_kind.clone(),
          });
        }

        self
          .execute_step(chain, &message.message_id, &message.step_kind, None)
          .await
      }
    }
  }

  /// Run one step of a workflow.
  ///
  /// The step row is created on first sight. Terminal workflows, terminal
  /// steps and unmet prerequisites are rejected with non-retryable errors.
  /// A claim lost to another worker returns [`StepExecution::Skipped`].
  #[instrument(
    name = "execute_step",
    skip(self, chain, request_params),
    fields(chain_id = chain.chain_id, workflow_id = %workflow_id, step_kind = %step_kind)
  )]
  pub async fn execute_step(
    &self,
    chain: &Arc<ChainContext>,
    workflow_id: &str,
    step_kind: &str,
    request_params: Option<Value>,
  ) -> Result<StepExecution, EngineError> {
    let workflow = self.store.get_workflow(workflow_id).await?;
    if workflow.status.is_terminal() {
      return Err(EngineError::WorkflowFinished {
        workflow_id: workflow.id,
        status: workflow.status,
      });
    }

    let graph = self.graph(&workflow.kind)?;
    let def = step_def(graph, step_kind)?;
    let handler = self
      .handlers
      .get(step_kind)
      .cloned()
      .ok_or_else(|| EngineError::MissingHandler {
        workflow_kind: workflow.kind.clone(),
        step_kind: step_kind.to_string(),
      })?;

    // Before the row is created: an early join delivery must not leave a
    // queued row that blocks the real enqueue
    let missing = self.unmet_prerequisites(&workflow.id, def).await?;
    if !missing.is_empty() {
      return Err(EngineError::PrerequisitesUnmet {
        workflow_id: workflow.id,
        step_kind: step_kind.to_string(),
        missing,
      });
    }

    let step = self.load_or_create_step(&workflow, step_kind, request_params).await?;
    if step.status.is_terminal() {
      return Err(EngineError::StepFinished {
        workflow_id: workflow.id,
        step_kind: step.kind,
        status: step.status,
      });
    }
    if step.status == StepStatus::Pending && def.on_pending.is_some() {
      debug!("step_awaiting_check");
      return Ok(StepExecution::Skipped);
    }

    let claim = self.new_claim();
    let Some(step) = self.store.claim_step(&step.id, &claim).await? else {
      debug!("step_claim_lost");
      return Ok(StepExecution::Skipped);
    };
    self.store.advance_head(&workflow.id, &step.id).await?;

    let attempt = u32::try_from(step.attempts).unwrap_or_default();
    info!(attempt, "step_started");
    self.notifier.notify(StepEvent::StepStarted {
      workflow_id: workflow.id.clone(),
      step_kind: step.kind.clone(),
      attempt,
    });

    let result = self
      .run_claimed(chain, &workflow, graph, def, &step, &claim.lease_token, handler, attempt)
      .await;
    if result.is_err() {
      match self.store.release_step(&step.id, &claim.lease_token).await {
        Ok(released) => debug!(released, "step_lease_released"),
        Err(err) => warn!(error = %err, "step_lease_release_failed"),
      }
    }
    result
  }

  /// Settle a step whose message ran out of redeliveries.
  ///
  /// The step's exhaustion policy decides: `fail` fails it and routes to
  /// `on_failure`, `lenient` completes it with `{"exhausted": true}`.
  #[instrument(name = "exhaust_step", skip(self, reason), fields(workflow_id = %workflow_id, step_kind = %step_kind))]
  pub async fn exhaust_step(
    &self,
    workflow_id: &str,
    step_kind: &str,
    reason: &str,
  ) -> Result<StepExecution, EngineError> {
    let workflow = self.store.get_workflow(workflow_id).await?;
    if workflow.status.is_terminal() {
      return Ok(StepExecution::Skipped);
    }
    let graph = self.graph(&workflow.kind)?;
    let def = step_def(graph, step_kind)?;
    let step = self.load_or_create_step(&workflow, step_kind, None).await?;

    let busy = step.status == StepStatus::InProgress && !step.is_claimable(Utc::now());
    let awaiting_check = step.status == StepStatus::Pending && def.on_pending.is_some();
    if step.status.is_terminal() || busy || awaiting_check {
      debug!(status = ?step.status, "exhaust_skipped");
      return Ok(StepExecution::Skipped);
    }

    warn!(policy = ?def.on_exhaustion, reason, "step_exhausted");
    match def.on_exhaustion {
      ExhaustionPolicy::Lenient => {
        let data = json!({ "exhausted": true, "reason": reason });
        self.complete_step(&workflow, graph, def, &step, data, None).await
      }
      ExhaustionPolicy::Fail => {
        let data = json!({ "error": reason, "exhausted": true });
        self.fail_step(&workflow, graph, def, &step, data, None).await
      }
    }
  }

  /// [`exhaust_step`](Self::exhaust_step) for a queue message.
  pub async fn exhaust_message(
    &self,
    message: &StepMessage,
    reason: &str,
  ) -> Result<StepExecution, EngineError> {
    let workflow_id = message.workflow_id().unwrap_or(&message.message_id);
    match self.exhaust_step(workflow_id, &message.step_kind, reason).await {
      Err(EngineError::Store(ledgerflow_store::Error::NotFound(_))) => {
        warn!(workflow_id = %workflow_id, "exhausted_message_without_workflow");
        Ok(StepExecution::Skipped)
      }
      other => other,
    }
  }

  pub async fn workflow_report(&self, workflow_id: &str) -> Result<WorkflowReport, EngineError> {
    workflow_report(self.store.as_ref(), workflow_id).await
  }

  #[allow(clippy::too_many_arguments)]
  async fn run_claimed(
    &self,
    chain: &Arc<ChainContext>,
    workflow: &Workflow,
    graph: &StepGraph,
    def: &StepDef,
    step: &WorkflowStep,
    lease_token: &str,
    handler: Arc<dyn StepHandler>,
    attempt: u32,
  ) -> Result<StepExecution, EngineError> {
    let params = self.resolve_params(step, def).await?;
    let ctx = StepContext {
      chain: chain.clone(),
      workflow_id: workflow.id.clone(),
      workflow_kind: workflow.kind.clone(),
      step_kind: step.kind.clone(),
      client_id: workflow.client_id.clone(),
      attempt,
      previous_response: step.response().cloned(),
      pending: self.pending.clone(),
    };

    let outcome = match handler.execute(&ctx, params).await {
      Ok(outcome) => outcome,
      Err(HandlerError::Validation(message)) => {
        warn!(error = %message, "step_validation_failed");
        StepOutcome::Failed(json!({ "error": message }))
      }
      Err(HandlerError::Infrastructure(message)) => {
        warn!(error = %message, "step_infrastructure_error");
        return Err(EngineError::Infrastructure {
          step_kind: step.kind.clone(),
          message,
        });
      }
    };

    match outcome {
      StepOutcome::Done(data) => {
        self
          .complete_step(workflow, graph, def, step, data, Some(lease_token))
          .await
      }
      StepOutcome::Pending(submission) => {
        self
          .suspend_step(chain, workflow, def, step, submission, lease_token)
          .await
      }
      StepOutcome::Failed(data) => {
        self
          .fail_step(workflow, graph, def, step, data, Some(lease_token))
          .await
      }
    }
  }

  async fn complete_step(
    &self,
    workflow: &Workflow,
    graph: &StepGraph,
    def: &StepDef,
    step: &WorkflowStep,
    data: Value,
    lease_token: Option<&str>,
  ) -> Result<StepExecution, EngineError> {
    if !self
      .store
      .finish_step(&step.id, StepStatus::Completed, Some(&data), lease_token)
      .await?
    {
      warn!("step_lease_lost");
      return Ok(StepExecution::Skipped);
    }
    info!(workflow_id = %workflow.id, step_kind = %step.kind, "step_completed");
    self.notifier.notify(StepEvent::StepCompleted {
      workflow_id: workflow.id.clone(),
      step_kind: step.kind.clone(),
      data,
    });

    self.settle_parent(graph, step, StepStatus::Completed).await?;
    for next in &def.on_success {
      self.enqueue_successor(workflow, graph, step, next).await?;
    }
    self.finish_workflow_if_done(workflow, graph).await?;
    Ok(StepExecution::Completed)
  }

  async fn suspend_step(
    &self,
    chain: &ChainContext,
    workflow: &Workflow,
    def: &StepDef,
    step: &WorkflowStep,
    submission: Submission,
    lease_token: &str,
  ) -> Result<StepExecution, EngineError> {
    let resume_kind = def.on_pending.as_deref().unwrap_or(&step.kind);
    let resume = StepMessage::step(
      new_id(),
      &workflow.id,
      resume_kind,
      &workflow.client_id,
      chain.chain_id,
    );
    let tx = PendingTransaction::new(
      chain.chain_id,
      &submission.transaction_hash,
      &submission.from_address,
      &submission.to_address,
      submission.nonce,
      resume,
    );
    self.pending.register(&tx).await?;

    if !self
      .store
      .mark_step_pending(&step.id, &submission.transaction_hash, &submission.response(), lease_token)
      .await?
    {
      warn!("step_lease_lost");
      return Ok(StepExecution::Skipped);
    }

    if let Some(check_kind) = &def.on_pending {
      let check = WorkflowStep::new(
        new_id(),
        &workflow.id,
        Some(step.id.clone()),
        check_kind,
        workflow.request_params.0.clone(),
      );
      self.store.insert_step(&check).await?;
    }

    info!(
      transaction_hash = %submission.transaction_hash,
      nonce = submission.nonce,
      resume_kind,
      "step_pending"
    );
    self.notifier.notify(StepEvent::StepPending {
      workflow_id: workflow.id.clone(),
      step_kind: step.kind.clone(),
      transaction_hash: submission.transaction_hash.clone(),
    });

    // The finalizer may have settled this hash while the step was running,
    // with the resume delivered before the step could take it.
    match self.pending.resume_if_final(&tx).await {
      Ok(true) => debug!(transaction_hash = %submission.transaction_hash, "step_resume_already_final"),
      Ok(false) => {}
      // The reconciler's pending sweep picks this up
      Err(err) => warn!(error = %err, "step_resume_check_failed"),
    }

    Ok(StepExecution::Pending {
      transaction_hash: submission.transaction_hash,
    })
  }

  async fn fail_step(
    &self,
    workflow: &Workflow,
    graph: &StepGraph,
    def: &StepDef,
    step: &WorkflowStep,
    data: Value,
    lease_token: Option<&str>,
  ) -> Result<StepExecution, EngineError> {
    if !self
      .store
      .finish_step(&step.id, StepStatus::Failed, Some(&data), lease_token)
      .await?
    {
      warn!("step_lease_lost");
      return Ok(StepExecution::Skipped);
    }
    warn!(workflow_id = %workflow.id, step_kind = %step.kind, "step_failed");
    self.notifier.notify(StepEvent::StepFailed {
      workflow_id: workflow.id.clone(),
      step_kind: step.kind.clone(),
      data,
    });

    self.settle_parent(graph, step, StepStatus::Failed).await?;
    match &def.on_failure {
      Some(next) => {
        self.enqueue_successor(workflow, graph, step, next).await?;
      }
      None => {
        if self
          .store
          .update_workflow_status(&workflow.id, WorkflowStatus::Failed)
          .await?
        {
          info!(workflow_id = %workflow.id, failed_step = %step.kind, "workflow_failed");
          self.notifier.notify(StepEvent::WorkflowFailed {
            workflow_id: workflow.id.clone(),
          });
        }
      }
    }
    self.finish_workflow_if_done(workflow, graph).await?;
    Ok(StepExecution::Failed)
  }

  /// Finish the pending step a check step resumes.
  ///
  /// The parent may still be in progress when the resume outran its
  /// submitter; finishing it then makes the submitter's pending write a no-op.
  async fn settle_parent(
    &self,
    graph: &StepGraph,
    step: &WorkflowStep,
    status: StepStatus,
  ) -> Result<(), EngineError> {
    let Some(parent_id) = &step.parent_step_id else {
      return Ok(());
    };
    let parent = self.store.get_step_by_id(parent_id).await?;
    if parent.status.is_terminal() || !graph.resumes(&step.kind, &parent.kind) {
      return Ok(());
    }
    if self.store.finish_step(&parent.id, status, None, None).await? {
      info!(parent_kind = %parent.kind, status = ?status, "pending_step_settled");
    }
    Ok(())
  }

  /// Insert and publish `next` once its prerequisites are complete.
  ///
  /// Only the worker whose insert wins publishes, so a join step is
  /// published at most once.
  async fn enqueue_successor(
    &self,
    workflow: &Workflow,
    graph: &StepGraph,
    parent: &WorkflowStep,
    next: &str,
  ) -> Result<bool, EngineError> {
    let def = step_def(graph, next)?;
    let missing = self.unmet_prerequisites(&workflow.id, def).await?;
    if !missing.is_empty() {
      debug!(next, ?missing, "successor_waiting_on_prerequisites");
      return Ok(false);
    }

    let row = WorkflowStep::new(
      new_id(),
      &workflow.id,
      Some(parent.id.clone()),
      next,
      workflow.request_params.0.clone(),
    );
    if !self.store.insert_step(&row).await? {
      debug!(next, "successor_already_enqueued");
      return Ok(false);
    }

    if let Err(err) = self.publish_step(workflow, next).await {
      warn!(next, error = %err, "successor_publish_failed");
    }
    Ok(true)
  }

  /// Complete or fail the workflow once every step row is terminal and no
  /// ready successor is still to be inserted.
  async fn finish_workflow_if_done(
    &self,
    workflow: &Workflow,
    graph: &StepGraph,
  ) -> Result<(), EngineError> {
    let steps = self.store.list_steps(&workflow.id).await?;
    if steps.iter().any(|step| !step.status.is_terminal()) || has_unrouted_successor(graph, &steps) {
      return Ok(());
    }

    let failed = steps.iter().any(|step| step.status == StepStatus::Failed);
    let status = if failed {
      WorkflowStatus::Failed
    } else {
      WorkflowStatus::Completed
    };
    if !self.store.update_workflow_status(&workflow.id, status).await? {
      return Ok(());
    }

    if failed {
      info!(workflow_id = %workflow.id, "workflow_failed");
      self.notifier.notify(StepEvent::WorkflowFailed {
        workflow_id: workflow.id.clone(),
      });
    } else {
      info!(workflow_id = %workflow.id, "workflow_completed");
      self.notifier.notify(StepEvent::WorkflowCompleted {
        workflow_id: workflow.id.clone(),
      });
    }
    Ok(())
  }

  async fn load_or_create_step(
    &self,
    workflow: &Workflow,
    step_kind: &str,
    request_params: Option<Value>,
  ) -> Result<WorkflowStep, EngineError> {
    if let Some(step) = self.store.get_step(&workflow.id, step_kind).await? {
      return Ok(step);
    }

    let params = request_params.unwrap_or_else(|| workflow.request_params.0.clone());
    let step = WorkflowStep::new(
      new_id(),
      &workflow.id,
      workflow.current_step_id.clone(),
      step_kind,
      params,
    );
    if self.store.insert_step(&step).await? {
      return Ok(step);
    }

    // Another worker inserted it first
    self
      .store
      .get_step(&workflow.id, step_kind)
      .await?
      .ok_or_else(|| {
        ledgerflow_store::Error::NotFound(format!("step {step_kind} of workflow {}", workflow.id))
          .into()
      })
  }

  async fn unmet_prerequisites(
    &self,
    workflow_id: &str,
    def: &StepDef,
  ) -> Result<Vec<String>, EngineError> {
    let mut missing = Vec::new();
    for kind in &def.prerequisites {
      let completed = self
        .store
        .get_step(workflow_id, kind)
        .await?
        .is_some_and(|step| step.status == StepStatus::Completed);
      if !completed {
        missing.push(kind.clone());
      }
    }
    Ok(missing)
  }

  /// The step's request params with its `read_data_from` responses merged in.
  async fn resolve_params(&self, step: &WorkflowStep, def: &StepDef) -> Result<Value, EngineError> {
    let mut params = step.request_params.0.clone();
    if !params.is_object() && !params.is_null() && !def.read_data_from.is_empty() {
      warn!("request_params_not_an_object");
      return Ok(params);
    }

    for source in &def.read_data_from {
      let data = self
        .store
        .get_step(&step.workflow_id, source)
        .await?
        .and_then(|source_step| source_step.response_data.map(|data| data.0));
      match data {
        Some(data) => merge_response(&mut params, source, data),
        None => warn!(source = %source, "read_data_missing"),
      }
    }
    Ok(params)
  }

  async fn publish_step(&self, workflow: &Workflow, step_kind: &str) -> Result<(), EngineError> {
    let message = StepMessage::step(
      new_id(),
      &workflow.id,
      step_kind,
      &workflow.client_id,
      workflow.chain_id as u64,
    );
    self.publisher.publish(message).await?;
    Ok(())
  }

  fn graph(&self, workflow_kind: &str) -> Result<&StepGraph, EngineError> {
    self
      .config
      .get(workflow_kind)
      .ok_or_else(|| EngineError::UnknownWorkflowKind(workflow_kind.to_string()))
  }

  fn new_claim(&self) -> StepClaim {
    let now = Utc::now();
    StepClaim {
      lease_token: new_id(),
      now,
      expires_at: now + self.lease_timeout,
    }
  }
}

fn new_id() -> String {
  Uuid::new_v4().to_string()
}

fn step_def<'a>(graph: &'a StepGraph, step_kind: &str) -> Result<&'a StepDef, EngineError> {
  graph.step(step_kind).ok_or_else(|| EngineError::UnknownStep {
    workflow_kind: graph.kind().to_string(),
    step_kind: step_kind.to_string(),
  })
}

/// Shallow-merge `data` into `params`. Non-object data lands under `source`.
fn merge_response(params: &mut Value, source: &str, data: Value) {
  if params.is_null() {
    *params = Value::Object(Map::new());
  }
  let Some(target) = params.as_object_mut() else {
    return;
  };
  match data {
    Value::Object(fields) => target.extend(fields),
    Value::Null => {}
    other => {
      target.insert(source.to_string(), other);
    }
  }
}

/// Whether a finished step has a successor that is ready but has no row yet.
///
/// Covers the window between a step finishing and its enqueuer inserting
/// the successor. Steps resumed by a check step route through the check step.
fn has_unrouted_successor(graph: &StepGraph, steps: &[WorkflowStep]) -> bool {
  let by_kind: HashMap<&str, &WorkflowStep> = steps.iter().map(|step| (step.kind.as_str(), step)).collect();

  steps.iter().any(|step| {
    let Some(def) = graph.step(&step.kind) else {
      return false;
    };
    if def.on_pending.is_some() {
      return false;
    }
    let next: Vec<&String> = match step.status {
      StepStatus::Completed => def.on_success.iter().collect(),
      StepStatus::Failed => def.on_failure.iter().collect(),
      _ => Vec::new(),
    };
    next.into_iter().any(|kind| {
      if by_kind.contains_key(kind.as_str()) {
        return false;
      }
      graph.step(kind).is_some_and(|next_def| {
        next_def.prerequisites.iter().all(|prerequisite| {
          by_kind
            .get(prerequisite.as_str())
            .is_some_and(|row| row.status == StepStatus::Completed)
        })
      })
    })
  })
}
