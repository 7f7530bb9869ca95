use std::collections::{HashMap, HashSet};

use ledgerflow_config::{StepDef, WorkflowDef};

use crate::error::WorkflowError;
use crate::graph::Graph;

/// A validated step graph for one workflow kind.
#[derive(Debug, Clone)]
pub struct StepGraph {
  kind: String,
  init_step: String,
  steps: HashMap<String, StepDef>,
  /// Edges along which steps get enqueued: success, failure and resume.
  routing: Graph,
}

impl StepGraph {
  /// Validate a workflow definition and compile it.
  pub fn compile(def: WorkflowDef) -> Result<Self, WorkflowError> {
    let workflow = def.kind.clone();

    // Collect step kinds and check for duplicates
    let mut steps = HashMap::with_capacity(def.steps.len());
    let mut order = Vec::with_capacity(def.steps.len());
    for step in def.steps {
      if steps.contains_key(&step.kind) {
        return Err(WorkflowError::DuplicateStep {
          workflow,
          kind: step.kind,
        });
      }
      order.push(step.kind.clone());
      steps.insert(step.kind.clone(), step);
    }

    if !steps.contains_key(&def.init_step) {
      return Err(WorkflowError::MissingInitStep {
        workflow,
        kind: def.init_step,
      });
    }

    // Every referenced kind must exist
    for kind in &order {
      let step = &steps[kind];
      for target in step.referenced_kinds() {
        if !steps.contains_key(target) {
          return Err(WorkflowError::UnknownReference {
            workflow,
            from: kind.clone(),
            to: target.to_string(),
          });
        }
      }
    }

    let mut routing_edges = Vec::new();
    let mut prerequisite_edges = Vec::new();
    for kind in &order {
      let step = &steps[kind];
      for next in step.on_success.iter().chain(&step.on_failure).chain(&step.on_pending) {
        routing_edges.push((kind.clone(), next.clone()));
      }
      for prerequisite in &step.prerequisites {
        prerequisite_edges.push((prerequisite.clone(), kind.clone()));
      }
    }

    let routing = Graph::new(order.iter().map(String::as_str), &routing_edges);

    // Every kind must be reachable from the init step
    let reachable = routing.reachable_from(&def.init_step);
    if let Some(kind) = order.iter().find(|kind| !reachable.contains(*kind)) {
      return Err(WorkflowError::Unreachable {
        workflow,
        kind: kind.clone(),
      });
    }

    // Prerequisites order steps too, so a cycle through them is a deadlock
    let ordering_edges: Vec<(String, String)> = routing_edges
      .iter()
      .chain(prerequisite_edges.iter())
      .cloned()
      .collect();
    let ordering = Graph::new(order.iter().map(String::as_str), &ordering_edges);
    if let Some(kind) = ordering.find_cycle() {
      return Err(WorkflowError::CycleDetected { workflow, kind });
    }

    Ok(Self {
      kind: def.kind,
      init_step: def.init_step,
      steps,
      routing,
    })
  }

  /// The workflow kind this graph belongs to.
  pub fn kind(&self) -> &str {
    &self.kind
  }

  pub fn init_step(&self) -> &str {
    &self.init_step
  }

  /// Get a step definition by kind.
  pub fn step(&self, kind: &str) -> Option<&StepDef> {
    self.steps.get(kind)
  }

  /// All step kinds in this graph.
  pub fn kinds(&self) -> impl Iterator<Item = &str> {
    self.steps.keys().map(String::as_str)
  }

  /// The routing graph (success, failure and resume edges).
  pub fn graph(&self) -> &Graph {
    &self.routing
  }

  /// Whether `check_kind` is the check-status step that resumes `kind`.
  pub fn resumes(&self, check_kind: &str, kind: &str) -> bool {
    self
      .step(kind)
      .and_then(|step| step.on_pending.as_deref())
      .is_some_and(|resume| resume == check_kind)
  }

  /// Kinds that can be enqueued from more than one place.
  pub fn join_points(&self) -> &HashSet<String> {
    self.routing.join_points()
  }
}
