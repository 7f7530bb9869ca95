use ledgerflow_store::{StepStatus, Store, WorkflowStatus};
use serde::Serialize;

use crate::error::EngineError;

/// Point-in-time view of a workflow and its step log.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowReport {
  pub workflow_id: String,
  pub workflow_kind: String,
  pub status: WorkflowStatus,
  /// Kind of the step the head pointer names.
  pub current_step: Option<String>,
  pub steps: Vec<StepSummary>,
  /// The most recently created step that failed, with its response data.
  /// A check step that saw a revert is reported rather than the pending
  /// step it settled.
  pub failed_step: Option<FailedStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
  pub kind: String,
  pub status: StepStatus,
  pub attempts: i32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub transaction_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedStep {
  pub kind: String,
  pub data: Option<serde_json::Value>,
}

/// Build a report straight from the store.
pub async fn workflow_report(store: &dyn Store, workflow_id: &str) -> Result<WorkflowReport, EngineError> {
  let workflow = store.get_workflow(workflow_id).await?;
  let steps = store.list_steps(workflow_id).await?;

  let current_step = workflow.current_step_id.as_deref().and_then(|head| {
    steps
      .iter()
      .find(|step| step.id == head)
      .map(|step| step.kind.clone())
  });
  let failed_step = steps
    .iter()
    .rfind(|step| step.status == StepStatus::Failed)
    .map(|step| FailedStep {
      kind: step.kind.clone(),
      data: step.response().cloned(),
    });

  Ok(WorkflowReport {
    workflow_id: workflow.id,
    workflow_kind: workflow.kind,
    status: workflow.status,
    current_step,
    steps: steps
      .into_iter()
      .map(|step| StepSummary {
        kind: step.kind,
        status: step.status,
        attempts: step.attempts,
        transaction_hash: step.transaction_hash,
      })
      .collect(),
    failed_step,
  })
}
