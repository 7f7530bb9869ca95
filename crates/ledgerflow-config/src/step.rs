use serde::{Deserialize, Serialize};

use crate::enums::ExhaustionPolicy;

/// One step kind in a workflow graph.
///
/// ```json
/// {
///   "kind": "stakeInit",
///   "on_success": [],
///   "on_pending": "checkStakeStatus"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
  pub kind: String,
  /// Successors enqueued when this step completes (fan-out).
  #[serde(default)]
  pub on_success: Vec<String>,
  /// Successor enqueued when this step fails.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub on_failure: Option<String>,
  /// Kinds that must all be completed before this step may run (join).
  #[serde(default)]
  pub prerequisites: Vec<String>,
  /// Kinds whose response data is merged into this step's params, in order.
  #[serde(default)]
  pub read_data_from: Vec<String>,
  /// Check-status kind resumed once this step's transaction is finalized.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub on_pending: Option<String>,
  #[serde(default)]
  pub on_exhaustion: ExhaustionPolicy,
}

impl StepDef {
  /// A bare step with no edges.
  pub fn new(kind: impl Into<String>) -> Self {
    Self {
      kind: kind.into(),
      on_success: Vec::new(),
      on_failure: None,
      prerequisites: Vec::new(),
      read_data_from: Vec::new(),
      on_pending: None,
      on_exhaustion: ExhaustionPolicy::Fail,
    }
  }

  pub fn on_success<I, S>(mut self, kinds: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.on_success = kinds.into_iter().map(Into::into).collect();
    self
  }

  pub fn on_failure(mut self, kind: impl Into<String>) -> Self {
    self.on_failure = Some(kind.into());
    self
  }

  pub fn prerequisites<I, S>(mut self, kinds: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.prerequisites = kinds.into_iter().map(Into::into).collect();
    self
  }

  pub fn read_data_from<I, S>(mut self, kinds: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.read_data_from = kinds.into_iter().map(Into::into).collect();
    self
  }

  pub fn on_pending(mut self, kind: impl Into<String>) -> Self {
    self.on_pending = Some(kind.into());
    self
  }

  pub fn on_exhaustion(mut self, policy: ExhaustionPolicy) -> Self {
    self.on_exhaustion = policy;
    self
  }

  /// Every kind this step refers to, in declaration order.
  pub fn referenced_kinds(&self) -> impl Iterator<Item = &str> {
    self
      .on_success
      .iter()
      .chain(self.on_failure.iter())
      .chain(self.prerequisites.iter())
      .chain(self.read_data_from.iter())
      .chain(self.on_pending.iter())
      .map(String::as_str)
  }
}
