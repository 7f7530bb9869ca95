use std::collections::HashMap;

use ledgerflow_config::{StepDef, WorkflowDef};

use crate::error::WorkflowError;
use crate::step_graph::StepGraph;

/// The static step registry: one compiled graph per workflow kind.
#[derive(Debug, Clone, Default)]
pub struct StepConfig {
  graphs: HashMap<String, StepGraph>,
}

impl StepConfig {
  /// Compile and register every workflow definition.
  ///
  /// Each workflow kind gets its own independent graph, so two kinds may
  /// reuse the same step kind names.
  pub fn new(defs: impl IntoIterator<Item = WorkflowDef>) -> Result<Self, WorkflowError> {
    let mut graphs = HashMap::new();
    for def in defs {
      if graphs.contains_key(&def.kind) {
        return Err(WorkflowError::DuplicateWorkflow(def.kind));
      }
      let graph = StepGraph::compile(def)?;
      graphs.insert(graph.kind().to_string(), graph);
    }
    Ok(Self { graphs })
  }

  /// Get the compiled graph for a workflow kind.
  pub fn get(&self, workflow_kind: &str) -> Option<&StepGraph> {
    self.graphs.get(workflow_kind)
  }

  /// Look up one step definition.
  pub fn step(&self, workflow_kind: &str, step_kind: &str) -> Option<&StepDef> {
    self.get(workflow_kind)?.step(step_kind)
  }

  pub fn iter(&self) -> impl Iterator<Item = &StepGraph> {
    self.graphs.values()
  }

  pub fn is_empty(&self) -> bool {
    self.graphs.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn single(kind: &str) -> WorkflowDef {
    WorkflowDef::new(kind, "start", vec![StepDef::new("start")])
  }

  #[test]
  fn test_duplicate_workflow_rejected() {
    let result = StepConfig::new([single("mint"), single("mint")]);
    assert!(matches!(result, Err(WorkflowError::DuplicateWorkflow(kind)) if kind == "mint"));
  }

  #[test]
  fn test_kinds_compile_independently() {
    let config = StepConfig::new([single("mint"), single("redeem")]).unwrap();

    assert!(config.step("mint", "start").is_some());
    assert!(config.step("redeem", "start").is_some());
    assert!(config.step("stake", "start").is_none());
    assert_eq!(config.iter().count(), 2);
  }
}
