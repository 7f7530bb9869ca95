use serde::{Deserialize, Serialize};

use crate::step::StepDef;

/// A business operation's step graph, as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  /// Workflow kind, e.g. "simple-stake".
  pub kind: String,
  /// The step a new workflow of this kind starts with.
  pub init_step: String,
  pub steps: Vec<StepDef>,
}

impl WorkflowDef {
  pub fn new(kind: impl Into<String>, init_step: impl Into<String>, steps: Vec<StepDef>) -> Self {
    Self {
      kind: kind.into(),
      init_step: init_step.into(),
      steps,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ExhaustionPolicy;

  #[test]
  fn test_deserialize_with_defaults() {
    let json = r#"{
      "kind": "simple-stake",
      "init_step": "stakeInit",
      "steps": [
        { "kind": "stakeInit", "on_pending": "checkStakeStatus" },
        { "kind": "checkStakeStatus", "on_success": ["confirmStake"], "read_data_from": ["stakeInit"] },
        { "kind": "confirmStake", "on_exhaustion": "lenient" }
      ]
    }"#;

    let def: WorkflowDef = serde_json::from_str(json).unwrap();
    assert_eq!(def.kind, "simple-stake");
    assert_eq!(def.steps.len(), 3);
    assert!(def.steps[0].on_success.is_empty());
    assert_eq!(def.steps[0].on_pending.as_deref(), Some("checkStakeStatus"));
    assert_eq!(def.steps[0].on_exhaustion, ExhaustionPolicy::Fail);
    assert_eq!(def.steps[2].on_exhaustion, ExhaustionPolicy::Lenient);
  }

  #[test]
  fn test_referenced_kinds_order() {
    let step = StepDef::new("a")
      .on_success(["b", "c"])
      .on_failure("f")
      .prerequisites(["p"])
      .read_data_from(["r"]);

    let refs: Vec<&str> = step.referenced_kinds().collect();
    assert_eq!(refs, vec!["b", "c", "f", "p", "r"]);
  }
}
