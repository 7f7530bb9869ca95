//! Step handlers and their registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ledgerflow_chain::ChainContext;
use ledgerflow_pending::PendingTransactionStore;
use ledgerflow_workflow::StepConfig;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, HandlerError};

/// Everything a handler gets besides its input.
#[derive(Clone)]
pub struct StepContext {
  pub chain: Arc<ChainContext>,
  pub workflow_id: String,
  pub workflow_kind: String,
  pub step_kind: String,
  pub client_id: String,
  /// 1 on the first claim of this step.
  pub attempt: u32,
  /// Previous response of this step, set when it resumes itself after a
  /// pending submission.
  pub previous_response: Option<serde_json::Value>,
  /// Lets a handler check whether its transaction is already tracked
  /// before submitting it again.
  pub pending: Arc<PendingTransactionStore>,
}

impl fmt::Debug for StepContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StepContext")
      .field("chain_id", &self.chain.chain_id)
      .field("workflow_id", &self.workflow_id)
      .field("workflow_kind", &self.workflow_kind)
      .field("step_kind", &self.step_kind)
      .field("attempt", &self.attempt)
      .finish_non_exhaustive()
  }
}

/// A transaction a handler submitted and wants to wait on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
  pub transaction_hash: String,
  pub from_address: String,
  pub to_address: String,
  pub nonce: u64,
  /// Extra data stored alongside the submission.
  #[serde(default)]
  pub data: serde_json::Value,
}

impl Submission {
  pub fn new(
    transaction_hash: impl Into<String>,
    from_address: impl Into<String>,
    to_address: impl Into<String>,
    nonce: u64,
  ) -> Self {
    Self {
      transaction_hash: transaction_hash.into(),
      from_address: from_address.into(),
      to_address: to_address.into(),
      nonce,
      data: serde_json::Value::Null,
    }
  }

  pub fn with_data(mut self, data: serde_json::Value) -> Self {
    self.data = data;
    self
  }

  /// The step response recorded while the transaction is pending.
  pub fn response(&self) -> serde_json::Value {
    serde_json::json!({
      "transactionHash": self.transaction_hash,
      "from": self.from_address,
      "to": self.to_address,
      "nonce": self.nonce,
      "data": self.data,
    })
  }
}

/// What a handler decided.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
  /// Finished; `on_success` successors run next.
  Done(serde_json::Value),
  /// A transaction was submitted; the workflow resumes once it is final.
  Pending(Submission),
  /// A business failure; routes to `on_failure`.
  Failed(serde_json::Value),
}

impl StepOutcome {
  pub fn done() -> Self {
    Self::Done(serde_json::Value::Null)
  }
}

/// Executes one kind of step.
#[async_trait]
pub trait StepHandler: Send + Sync {
  async fn execute(
    &self,
    ctx: &StepContext,
    params: serde_json::Value,
  ) -> Result<StepOutcome, HandlerError>;
}

/// Handlers by step kind, fixed at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
  handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(mut self, step_kind: impl Into<String>, handler: Arc<dyn StepHandler>) -> Self {
    self.handlers.insert(step_kind.into(), handler);
    self
  }

  pub fn insert(&mut self, step_kind: impl Into<String>, handler: Arc<dyn StepHandler>) {
    self.handlers.insert(step_kind.into(), handler);
  }

  pub fn get(&self, step_kind: &str) -> Option<&Arc<dyn StepHandler>> {
    self.handlers.get(step_kind)
  }

  /// Fail on the first configured step kind without a handler.
  pub fn ensure_covers(&self, config: &StepConfig) -> Result<(), EngineError> {
    for graph in config.iter() {
      let mut kinds: Vec<&str> = graph.kinds().collect();
      kinds.sort_unstable();
      if let Some(missing) = kinds.into_iter().find(|kind| !self.handlers.contains_key(*kind)) {
        return Err(EngineError::MissingHandler {
          workflow_kind: graph.kind().to_string(),
          step_kind: missing.to_string(),
        });
      }
    }
    Ok(())
  }
}

impl fmt::Debug for HandlerRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut kinds: Vec<&String> = self.handlers.keys().collect();
    kinds.sort();
    f.debug_struct("HandlerRegistry").field("kinds", &kinds).finish()
  }
}

/// A handler built from an async closure.
pub struct FnHandler<F> {
  f: F,
}

impl<F, Fut> FnHandler<F>
where
  F: Fn(StepContext, serde_json::Value) -> Fut + Send + Sync,
  Fut: std::future::Future<Output = Result<StepOutcome, HandlerError>> + Send,
{
  pub fn new(f: F) -> Arc<Self> {
    Arc::new(Self { f })
  }
}

#[async_trait]
impl<F, Fut> StepHandler for FnHandler<F>
where
  F: Fn(StepContext, serde_json::Value) -> Fut + Send + Sync,
  Fut: std::future::Future<Output = Result<StepOutcome, HandlerError>> + Send,
{
  async fn execute(
    &self,
    ctx: &StepContext,
    params: serde_json::Value,
  ) -> Result<StepOutcome, HandlerError> {
    (self.f)(ctx.clone(), params).await
  }
}
