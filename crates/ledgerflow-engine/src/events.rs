//! Step events and notifiers for observability.
//!
//! Events are emitted as steps move through their lifecycle so consumers can
//! observe progress, feed dashboards, or assert on ordering in tests.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted while routing steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StepEvent {
  WorkflowStarted {
    workflow_id: String,
    workflow_kind: String,
  },

  /// A worker claimed a step.
  StepStarted {
    workflow_id: String,
    step_kind: String,
    attempt: u32,
  },

  StepCompleted {
    workflow_id: String,
    step_kind: String,
    data: serde_json::Value,
  },

  /// A step submitted a transaction and waits for its finalization.
  StepPending {
    workflow_id: String,
    step_kind: String,
    transaction_hash: String,
  },

  StepFailed {
    workflow_id: String,
    step_kind: String,
    data: serde_json::Value,
  },

  WorkflowCompleted { workflow_id: String },

  WorkflowFailed { workflow_id: String },
}

/// Receives step events.
///
/// The engine calls `notify` inline; implementations must not block.
pub trait StepNotifier: Send + Sync {
  fn notify(&self, event: StepEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl StepNotifier for NoopNotifier {
  fn notify(&self, _event: StepEvent) {}
}

/// Sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  // Unbounded so a slow reader never stalls a worker. Volume is a handful of
  // events per step.
  sender: mpsc::UnboundedSender<StepEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<StepEvent>) -> Self {
    Self { sender }
  }

  /// A notifier and the receiving end of its channel.
  pub fn channel() -> (Self, mpsc::UnboundedReceiver<StepEvent>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self::new(sender), receiver)
  }
}

impl StepNotifier for ChannelNotifier {
  fn notify(&self, event: StepEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
