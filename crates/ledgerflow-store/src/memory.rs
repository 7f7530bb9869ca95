use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;

use crate::{Error, StepClaim, StepStatus, Store, Workflow, WorkflowStatus, WorkflowStep};

#[derive(Debug, Default)]
struct Inner {
  workflows: HashMap<String, Workflow>,
  steps: HashMap<String, WorkflowStep>,
  /// (workflow_id, kind) -> step id
  step_index: HashMap<(String, String), String>,
  /// Insertion order of step ids, for stable listings.
  step_order: Vec<String>,
}

/// In-memory store with the same semantics as [`SqliteStore`](crate::SqliteStore).
///
/// Suitable for tests and single-process embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
  inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, Inner>, Error> {
    self.inner.lock().map_err(|_| Error::Poisoned)
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn create_workflow(&self, workflow: &Workflow) -> Result<bool, Error> {
    let mut inner = self.lock()?;
    if inner.workflows.contains_key(&workflow.id) {
      return Ok(false);
    }
    inner.workflows.insert(workflow.id.clone(), workflow.clone());
    Ok(true)
  }

  async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, Error> {
    self
      .lock()?
      .workflows
      .get(workflow_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(format!("workflow {workflow_id}")))
  }

  async fn list_workflows(&self, status: Option<WorkflowStatus>) -> Result<Vec<Workflow>, Error> {
    let inner = self.lock()?;
    let mut workflows: Vec<Workflow> = inner
      .workflows
      .values()
      .filter(|workflow| status.is_none_or(|status| workflow.status == status))
      .cloned()
      .collect();
    workflows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(workflows)
  }

  async fn update_workflow_status(
    &self,
    workflow_id: &str,
    status: WorkflowStatus,
  ) -> Result<bool, Error> {
    let mut inner = self.lock()?;
    match inner.workflows.get_mut(workflow_id) {
      Some(workflow) if !workflow.status.is_terminal() => {
        workflow.status = status;
        workflow.updated_at = Utc::now();
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn advance_head(&self, workflow_id: &str, step_id: &str) -> Result<(), Error> {
    let mut inner = self.lock()?;
    if let Some(workflow) = inner.workflows.get_mut(workflow_id) {
      if !workflow.status.is_terminal() {
        workflow.current_step_id = Some(step_id.to_string());
        workflow.status = WorkflowStatus::InProgress;
        workflow.updated_at = Utc::now();
      }
    }
    Ok(())
  }

  async fn insert_step(&self, step: &WorkflowStep) -> Result<bool, Error> {
    let mut inner = self.lock()?;
    let key = (step.workflow_id.clone(), step.kind.clone());
    if inner.step_index.contains_key(&key) || inner.steps.contains_key(&step.id) {
      return Ok(false);
    }
    inner.step_index.insert(key, step.id.clone());
    inner.step_order.push(step.id.clone());
    inner.steps.insert(step.id.clone(), step.clone());
    Ok(true)
  }

  async fn get_step(&self, workflow_id: &str, kind: &str) -> Result<Option<WorkflowStep>, Error> {
    let inner = self.lock()?;
    let key = (workflow_id.to_string(), kind.to_string());
    Ok(
      inner
        .step_index
        .get(&key)
        .and_then(|id| inner.steps.get(id))
        .cloned(),
    )
  }

  async fn get_step_by_id(&self, step_id: &str) -> Result<WorkflowStep, Error> {
    self
      .lock()?
      .steps
      .get(step_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(format!("step {step_id}")))
  }

  async fn list_steps(&self, workflow_id: &str) -> Result<Vec<WorkflowStep>, Error> {
    let inner = self.lock()?;
    Ok(
      inner
        .step_order
        .iter()
        .filter_map(|id| inner.steps.get(id))
        .filter(|step| step.workflow_id == workflow_id)
        .cloned()
        .collect(),
    )
  }

  async fn claim_step(&self, step_id: &str, claim: &StepClaim) -> Result<Option<WorkflowStep>, Error> {
    let mut inner = self.lock()?;
    let Some(step) = inner.steps.get_mut(step_id) else {
      return Ok(None);
    };
    if !step.is_claimable(claim.now) {
      return Ok(None);
    }
    step.status = StepStatus::InProgress;
    step.lease_token = Some(claim.lease_token.clone());
    step.lease_expires_at = Some(claim.expires_at);
    step.attempts += 1;
    step.updated_at = claim.now;
    Ok(Some(step.clone()))
  }

  async fn release_step(&self, step_id: &str, lease_token: &str) -> Result<bool, Error> {
    let mut inner = self.lock()?;
    match inner.steps.get_mut(step_id) {
      Some(step)
        if step.status == StepStatus::InProgress
          && step.lease_token.as_deref() == Some(lease_token) =>
      {
        step.lease_token = None;
        step.lease_expires_at = None;
        step.updated_at = Utc::now();
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn finish_step(
    &self,
    step_id: &str,
    status: StepStatus,
    response: Option<&serde_json::Value>,
    lease_token: Option<&str>,
  ) -> Result<bool, Error> {
    let mut inner = self.lock()?;
    let Some(step) = inner.steps.get_mut(step_id) else {
      return Ok(false);
    };
    if step.status.is_terminal() {
      return Ok(false);
    }
    if lease_token.is_some() && step.lease_token.as_deref() != lease_token {
      return Ok(false);
    }
    step.status = status;
    if let Some(response) = response {
      step.response_data = Some(Json(response.clone()));
    }
    step.lease_token = None;
    step.lease_expires_at = None;
    step.updated_at = Utc::now();
    Ok(true)
  }

  async fn mark_step_pending(
    &self,
    step_id: &str,
    transaction_hash: &str,
    response: &serde_json::Value,
    lease_token: &str,
  ) -> Result<bool, Error> {
    let mut inner = self.lock()?;
    match inner.steps.get_mut(step_id) {
      Some(step)
        if step.status == StepStatus::InProgress
          && step.lease_token.as_deref() == Some(lease_token) =>
      {
        step.status = StepStatus::Pending;
        step.transaction_hash = Some(transaction_hash.to_string());
        step.response_data = Some(Json(response.clone()));
        step.lease_token = None;
        step.lease_expires_at = None;
        step.updated_at = Utc::now();
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn list_stalled_steps(
    &self,
    queued_before: DateTime<Utc>,
    now: DateTime<Utc>,
  ) -> Result<Vec<WorkflowStep>, Error> {
    let inner = self.lock()?;
    let mut stalled: Vec<WorkflowStep> = inner
      .step_order
      .iter()
      .filter_map(|id| inner.steps.get(id))
      .filter(|step| match step.status {
        StepStatus::Queued => step.updated_at <= queued_before,
        StepStatus::InProgress => match (&step.lease_token, step.lease_expires_at) {
          (None, _) => step.updated_at <= queued_before,
          (Some(_), Some(expires_at)) => expires_at <= now,
          (Some(_), None) => false,
        },
        _ => false,
      })
      .cloned()
      .collect();
    stalled.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
    Ok(stalled)
  }

  async fn list_pending_steps(&self, updated_before: DateTime<Utc>) -> Result<Vec<WorkflowStep>, Error> {
    let inner = self.lock()?;
    let mut pending: Vec<WorkflowStep> = inner
      .step_order
      .iter()
      .filter_map(|id| inner.steps.get(id))
      .filter(|step| step.status == StepStatus::Pending && step.updated_at <= updated_before)
      .cloned()
      .collect();
    pending.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
    Ok(pending)
  }
}
