//! Ledgerflow Store
//!
//! This crate provides the storage trait and implementations for workflows
//! and their steps. Data is persisted to SQLite, or kept in memory for tests
//! and embedded use.
//!
//! The [`Store`] trait defines operations for:
//! - Creating workflows and moving their head pointer
//! - Inserting step rows, at most one per (workflow, kind)
//! - Claiming, releasing and finishing steps under a lease
//! - Finding steps stuck between persistence and publication

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{StepClaim, StepStatus, Workflow, WorkflowStatus, WorkflowStep};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),

  /// The in-memory store's lock was poisoned by a panicking writer.
  #[error("store lock poisoned")]
  Poisoned,
}

/// Storage trait for workflows and steps.
#[async_trait]
pub trait Store: Send + Sync {
  /// Insert a workflow. Returns `false` if a workflow with this id exists.
  async fn create_workflow(&self, workflow: &Workflow) -> Result<bool, Error>;

  /// Get a workflow by ID.
  async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, Error>;

  /// List workflows, optionally filtered by status, newest first.
  async fn list_workflows(&self, status: Option<WorkflowStatus>) -> Result<Vec<Workflow>, Error>;

  /// Set a workflow's status. Terminal workflows are left untouched.
  ///
  /// Returns whether the status changed.
  async fn update_workflow_status(
    &self,
    workflow_id: &str,
    status: WorkflowStatus,
  ) -> Result<bool, Error>;

  /// Point the workflow head at `step_id` and mark it in progress.
  async fn advance_head(&self, workflow_id: &str, step_id: &str) -> Result<(), Error>;

  /// Insert a step row. Returns `false` if the (workflow, kind) row exists.
  async fn insert_step(&self, step: &WorkflowStep) -> Result<bool, Error>;

  /// Get the step of `kind` within a workflow.
  async fn get_step(&self, workflow_id: &str, kind: &str) -> Result<Option<WorkflowStep>, Error>;

  /// Get a step by ID.
  async fn get_step_by_id(&self, step_id: &str) -> Result<WorkflowStep, Error>;

  /// List steps for a workflow in creation order.
  async fn list_steps(&self, workflow_id: &str) -> Result<Vec<WorkflowStep>, Error>;

  /// Move a claimable step to in progress under a new lease.
  ///
  /// Returns the claimed row, or `None` when another worker holds the step
  /// or it is already terminal.
  async fn claim_step(&self, step_id: &str, claim: &StepClaim) -> Result<Option<WorkflowStep>, Error>;

  /// Drop a lease without changing the step's status.
  async fn release_step(&self, step_id: &str, lease_token: &str) -> Result<bool, Error>;

  /// Move a non-terminal step to a terminal status.
  ///
  /// `response` replaces the stored response data when given. When
  /// `lease_token` is given the update only applies while that lease is held.
  async fn finish_step(
    &self,
    step_id: &str,
    status: StepStatus,
    response: Option<&serde_json::Value>,
    lease_token: Option<&str>,
  ) -> Result<bool, Error>;

  /// Move a leased step to pending with its submitted transaction.
  async fn mark_step_pending(
    &self,
    step_id: &str,
    transaction_hash: &str,
    response: &serde_json::Value,
    lease_token: &str,
  ) -> Result<bool, Error>;

  /// Steps that may need re-publishing: queued rows untouched since
  /// `queued_before`, and in-progress rows whose lease expired by `now`.
  async fn list_stalled_steps(
    &self,
    queued_before: DateTime<Utc>,
    now: DateTime<Utc>,
  ) -> Result<Vec<WorkflowStep>, Error>;

  /// Pending rows untouched since `updated_before`, oldest first.
  async fn list_pending_steps(&self, updated_before: DateTime<Utc>) -> Result<Vec<WorkflowStep>, Error>;
}
