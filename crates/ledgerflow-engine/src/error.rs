use ledgerflow_chain::ChainError;
use ledgerflow_pending::PendingError;
use ledgerflow_queue::QueueError;
use ledgerflow_store::{StepStatus, WorkflowStatus};
use thiserror::Error;

/// Errors from routing a step.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error("store error: {0}")]
  Store(#[from] ledgerflow_store::Error),

  #[error("queue error: {0}")]
  Queue(#[from] QueueError),

  #[error("pending transaction error: {0}")]
  Pending(#[from] PendingError),

  #[error("chain error: {0}")]
  Chain(#[from] ChainError),

  #[error("unknown workflow kind: {0}")]
  UnknownWorkflowKind(String),

  #[error("step '{step_kind}' is not part of workflow '{workflow_kind}'")]
  UnknownStep {
    workflow_kind: String,
    step_kind: String,
  },

  #[error("no handler registered for step '{step_kind}' of workflow '{workflow_kind}'")]
  MissingHandler {
    workflow_kind: String,
    step_kind: String,
  },

  #[error("workflow {workflow_id} is already {status:?}")]
  WorkflowFinished {
    workflow_id: String,
    status: WorkflowStatus,
  },

  /// The step already reached a terminal status; redeliveries land here.
  #[error("step '{step_kind}' of workflow {workflow_id} is already {status:?}")]
  StepFinished {
    workflow_id: String,
    step_kind: String,
    status: StepStatus,
  },

  #[error("step '{step_kind}' of workflow {workflow_id} is waiting on {missing:?}")]
  PrerequisitesUnmet {
    workflow_id: String,
    step_kind: String,
    missing: Vec<String>,
  },

  /// The handler hit a transient failure. The step's lease was released.
  #[error("step '{step_kind}' failed transiently: {message}")]
  Infrastructure { step_kind: String, message: String },
}

impl EngineError {
  /// Whether redelivering the message may succeed.
  pub fn is_retryable(&self) -> bool {
    match self {
      Self::Store(ledgerflow_store::Error::NotFound(_)) => false,
      Self::Store(_) => true,
      Self::Queue(QueueError::Invalid(_) | QueueError::Serialization(_)) => false,
      Self::Queue(_) => true,
      Self::Pending(_) => true,
      Self::Chain(ChainError::UnknownChain(_)) => false,
      Self::Chain(_) => true,
      Self::Infrastructure { .. } => true,
      Self::UnknownWorkflowKind(_)
      | Self::UnknownStep { .. }
      | Self::MissingHandler { .. }
      | Self::WorkflowFinished { .. }
      | Self::StepFinished { .. }
      | Self::PrerequisitesUnmet { .. } => false,
    }
  }

  /// Whether the delivery lost a race another delivery already won:
  /// a redelivered finished step, a join branch arriving before the last
  /// one, or a message for a closed workflow.
  pub fn is_redundant_delivery(&self) -> bool {
    matches!(
      self,
      Self::StepFinished { .. } | Self::PrerequisitesUnmet { .. } | Self::WorkflowFinished { .. }
    )
  }
}

/// Errors a step handler may return.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
  /// The input can never succeed. The step fails and routes to `on_failure`.
  #[error("validation failed: {0}")]
  Validation(String),

  /// A dependency was unavailable. The step is retried on redelivery.
  #[error("infrastructure error: {0}")]
  Infrastructure(String),
}

/// Errors from running the consumer.
#[derive(Debug, Error)]
pub enum ConsumerError {
  #[error("worker {worker} stopped abnormally: {message}")]
  Worker { worker: usize, message: String },
}
