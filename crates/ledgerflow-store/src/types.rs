use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// Status of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum WorkflowStatus {
  Queued,
  InProgress,
  Completed,
  Failed,
}

impl WorkflowStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Failed)
  }
}

/// Status of a single step row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum StepStatus {
  Queued,
  InProgress,
  /// A transaction was submitted and is waiting for finalization.
  Pending,
  Completed,
  Failed,
}

impl StepStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Failed)
  }
}

/// A workflow as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Workflow {
  pub id: String,
  pub kind: String,
  /// Head pointer: the most recently claimed step.
  pub current_step_id: Option<String>,
  pub status: WorkflowStatus,
  pub request_params: Json<serde_json::Value>,
  pub chain_id: i64,
  pub client_id: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Workflow {
  /// A new queued workflow.
  pub fn new(
    id: impl Into<String>,
    kind: impl Into<String>,
    request_params: serde_json::Value,
    chain_id: i64,
    client_id: impl Into<String>,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: id.into(),
      kind: kind.into(),
      current_step_id: None,
      status: WorkflowStatus::Queued,
      request_params: Json(request_params),
      chain_id,
      client_id: client_id.into(),
      created_at: now,
      updated_at: now,
    }
  }
}

/// A step row as stored in the database. Unique per (workflow_id, kind).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WorkflowStep {
  pub id: String,
  pub workflow_id: String,
  pub parent_step_id: Option<String>,
  pub kind: String,
  pub status: StepStatus,
  pub request_params: Json<serde_json::Value>,
  pub response_data: Option<Json<serde_json::Value>>,
  pub transaction_hash: Option<String>,
  pub attempts: i32,
  pub lease_token: Option<String>,
  pub lease_expires_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl WorkflowStep {
  /// A new queued step.
  pub fn new(
    id: impl Into<String>,
    workflow_id: impl Into<String>,
    parent_step_id: Option<String>,
    kind: impl Into<String>,
    request_params: serde_json::Value,
  ) -> Self {
    let now = Utc::now();
    Self {
      id: id.into(),
      workflow_id: workflow_id.into(),
      parent_step_id,
      kind: kind.into(),
      status: StepStatus::Queued,
      request_params: Json(request_params),
      response_data: None,
      transaction_hash: None,
      attempts: 0,
      lease_token: None,
      lease_expires_at: None,
      created_at: now,
      updated_at: now,
    }
  }

  /// Response payload, if the step produced one.
  pub fn response(&self) -> Option<&serde_json::Value> {
    self.response_data.as_ref().map(|data| &data.0)
  }

  /// Whether a claim from `now` is allowed by the step's status and lease.
  pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
    match self.status {
      StepStatus::Queued | StepStatus::Pending => true,
      StepStatus::InProgress => match (&self.lease_token, self.lease_expires_at) {
        (None, _) => true,
        (Some(_), Some(expires_at)) => expires_at <= now,
        (Some(_), None) => false,
      },
      StepStatus::Completed | StepStatus::Failed => false,
    }
  }
}

/// Lease details for claiming a step.
#[derive(Debug, Clone)]
pub struct StepClaim {
  pub lease_token: String,
  pub now: DateTime<Utc>,
  pub expires_at: DateTime<Utc>,
}
