use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::types::Json;

use crate::{Error, StepClaim, StepStatus, Store, Workflow, WorkflowStatus, WorkflowStep};

const WORKFLOW_COLUMNS: &str =
  "id, kind, current_step_id, status, request_params, chain_id, client_id, created_at, updated_at";

const STEP_COLUMNS: &str = "id, workflow_id, parent_step_id, kind, status, request_params, \
   response_data, transaction_hash, attempts, lease_token, lease_expires_at, created_at, updated_at";

/// SQLite-based store implementation.
#[derive(Debug, Clone)]
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) the database at `database_url`.
  pub async fn connect(database_url: &str) -> Result<Self, Error> {
    if !sqlx::Sqlite::database_exists(database_url).await? {
      sqlx::Sqlite::create_database(database_url).await?;
    }
    let pool = SqlitePool::connect(database_url).await?;
    Ok(Self::new(pool))
  }

  /// A private in-memory database, already migrated.
  ///
  /// Limited to one connection: every connection to `sqlite::memory:` opens
  /// its own database.
  pub async fn in_memory() -> Result<Self, Error> {
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect("sqlite::memory:")
      .await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("./migrations").run(&self.pool).await?;
    Ok(())
  }

  pub fn pool(&self) -> &SqlitePool {
    &self.pool
  }
}

#[async_trait]
impl Store for SqliteStore {
  async fn create_workflow(&self, workflow: &Workflow) -> Result<bool, Error> {
    let result = sqlx::query(
      r#"
      INSERT INTO workflows (id, kind, current_step_id, status, request_params, chain_id, client_id, created_at, updated_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
      ON CONFLICT DO NOTHING
      "#,
    )
    .bind(&workflow.id)
    .bind(&workflow.kind)
    .bind(&workflow.current_step_id)
    .bind(workflow.status)
    .bind(&workflow.request_params)
    .bind(workflow.chain_id)
    .bind(&workflow.client_id)
    .bind(workflow.created_at)
    .bind(workflow.updated_at)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected() == 1)
  }

  async fn get_workflow(&self, workflow_id: &str) -> Result<Workflow, Error> {
    let sql = format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?");
    sqlx::query_as(&sql)
      .bind(workflow_id)
      .fetch_optional(&self.pool)
      .await?
      .ok_or_else(|| Error::NotFound(format!("workflow {workflow_id}")))
  }

  async fn list_workflows(&self, status: Option<WorkflowStatus>) -> Result<Vec<Workflow>, Error> {
    let sql = format!(
      "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at DESC"
    );
    Ok(sqlx::query_as(&sql).bind(status).fetch_all(&self.pool).await?)
  }

  async fn update_workflow_status(
    &self,
    workflow_id: &str,
    status: WorkflowStatus,
  ) -> Result<bool, Error> {
    let result = sqlx::query(
      r#"
      UPDATE workflows
      SET status = ?, updated_at = ?
      WHERE id = ? AND status NOT IN ('completed', 'failed')
      "#,
    )
    .bind(status)
    .bind(Utc::now())
    .bind(workflow_id)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected() == 1)
  }

  async fn advance_head(&self, workflow_id: &str, step_id: &str) -> Result<(), Error> {
    sqlx::query(
      r#"
      UPDATE workflows
      SET current_step_id = ?, status = 'in_progress', updated_at = ?
      WHERE id = ? AND status NOT IN ('completed', 'failed')
      "#,
    )
    .bind(step_id)
    .bind(Utc::now())
    .bind(workflow_id)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn insert_step(&self, step: &WorkflowStep) -> Result<bool, Error> {
    let result = sqlx::query(
      r#"
      INSERT INTO workflow_steps (id, workflow_id, parent_step_id, kind, status, request_params,
        response_data, transaction_hash, attempts, lease_token, lease_expires_at, created_at, updated_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      ON CONFLICT DO NOTHING
      "#,
    )
    .bind(&step.id)
    .bind(&step.workflow_id)
    .bind(&step.parent_step_id)
    .bind(&step.kind)
    .bind(step.status)
    .bind(&step.request_params)
    .bind(&step.response_data)
    .bind(&step.transaction_hash)
    .bind(step.attempts)
    .bind(&step.lease_token)
    .bind(step.lease_expires_at)
    .bind(step.created_at)
    .bind(step.updated_at)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected() == 1)
  }

  async fn get_step(&self, workflow_id: &str, kind: &str) -> Result<Option<WorkflowStep>, Error> {
    let sql = format!("SELECT {STEP_COLUMNS} FROM workflow_steps WHERE workflow_id = ? AND kind = ?");
    Ok(
      sqlx::query_as(&sql)
        .bind(workflow_id)
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?,
    )
  }

  async fn get_step_by_id(&self, step_id: &str) -> Result<WorkflowStep, Error> {
    let sql = format!("SELECT {STEP_COLUMNS} FROM workflow_steps WHERE id = ?");
    sqlx::query_as(&sql)
      .bind(step_id)
      .fetch_optional(&self.pool)
      .await?
      .ok_or_else(|| Error::NotFound(format!("step {step_id}")))
  }

  async fn list_steps(&self, workflow_id: &str) -> Result<Vec<WorkflowStep>, Error> {
    let sql = format!(
      "SELECT {STEP_COLUMNS} FROM workflow_steps WHERE workflow_id = ? ORDER BY created_at ASC, rowid ASC"
    );
    Ok(sqlx::query_as(&sql).bind(workflow_id).fetch_all(&self.pool).await?)
  }

  async fn claim_step(&self, step_id: &str, claim: &StepClaim) -> Result<Option<WorkflowStep>, Error> {
    let result = sqlx::query(
      r#"
      UPDATE workflow_steps
      SET status = 'in_progress', lease_token = ?, lease_expires_at = ?,
          attempts = attempts + 1, updated_at = ?
      WHERE id = ?
        AND (
          status IN ('queued', 'pending')
          OR (status = 'in_progress' AND (lease_token IS NULL OR lease_expires_at <= ?))
        )
      "#,
    )
    .bind(&claim.lease_token)
    .bind(claim.expires_at)
    .bind(claim.now)
    .bind(step_id)
    .bind(claim.now)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Ok(None);
    }
    self.get_step_by_id(step_id).await.map(Some)
  }

  async fn release_step(&self, step_id: &str, lease_token: &str) -> Result<bool, Error> {
    let result = sqlx::query(
      r#"
      UPDATE workflow_steps
      SET lease_token = NULL, lease_expires_at = NULL, updated_at = ?
      WHERE id = ? AND status = 'in_progress' AND lease_token = ?
      "#,
    )
    .bind(Utc::now())
    .bind(step_id)
    .bind(lease_token)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected() == 1)
  }

  async fn finish_step(
    &self,
    step_id: &str,
    status: StepStatus,
    response: Option<&serde_json::Value>,
    lease_token: Option<&str>,
  ) -> Result<bool, Error> {
    let result = sqlx::query(
      r#"
      UPDATE workflow_steps
      SET status = ?1, response_data = COALESCE(?2, response_data),
          lease_token = NULL, lease_expires_at = NULL, updated_at = ?3
      WHERE id = ?4
        AND status NOT IN ('completed', 'failed')
        AND (?5 IS NULL OR lease_token = ?5)
      "#,
    )
    .bind(status)
    .bind(response.map(Json))
    .bind(Utc::now())
    .bind(step_id)
    .bind(lease_token)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected() == 1)
  }

  async fn mark_step_pending(
    &self,
    step_id: &str,
    transaction_hash: &str,
    response: &serde_json::Value,
    lease_token: &str,
  ) -> Result<bool, Error> {
    let result = sqlx::query(
      r#"
      UPDATE workflow_steps
      SET status = 'pending', transaction_hash = ?, response_data = ?,
          lease_token = NULL, lease_expires_at = NULL, updated_at = ?
      WHERE id = ? AND status = 'in_progress' AND lease_token = ?
      "#,
    )
    .bind(transaction_hash)
    .bind(Json(response))
    .bind(Utc::now())
    .bind(step_id)
    .bind(lease_token)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected() == 1)
  }

  async fn list_stalled_steps(
    &self,
    queued_before: DateTime<Utc>,
    now: DateTime<Utc>,
  ) -> Result<Vec<WorkflowStep>, Error> {
    let sql = format!(
      r#"
      SELECT {STEP_COLUMNS} FROM workflow_steps
      WHERE (status = 'queued' AND updated_at <= ?1)
         OR (status = 'in_progress' AND lease_token IS NULL AND updated_at <= ?1)
         OR (status = 'in_progress' AND lease_expires_at <= ?2)
      ORDER BY updated_at ASC
      "#
    );
    Ok(
      sqlx::query_as(&sql)
        .bind(queued_before)
        .bind(now)
        .fetch_all(&self.pool)
        .await?,
    )
  }

  async fn list_pending_steps(&self, updated_before: DateTime<Utc>) -> Result<Vec<WorkflowStep>, Error> {
    let sql = format!(
      r#"
      SELECT {STEP_COLUMNS} FROM workflow_steps
      WHERE status = 'pending' AND updated_at <= ?
      ORDER BY updated_at ASC
      "#
    );
    Ok(
      sqlx::query_as(&sql)
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await?,
    )
  }
}
