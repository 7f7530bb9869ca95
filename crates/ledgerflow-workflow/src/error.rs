use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("workflow '{workflow}': duplicate step kind '{kind}'")]
  DuplicateStep { workflow: String, kind: String },

  #[error("workflow '{workflow}': step '{from}' references unknown step '{to}'")]
  UnknownReference {
    workflow: String,
    from: String,
    to: String,
  },

  #[error("workflow '{workflow}': init step '{kind}' is not defined")]
  MissingInitStep { workflow: String, kind: String },

  #[error("workflow '{workflow}': step '{kind}' is unreachable from the init step")]
  Unreachable { workflow: String, kind: String },

  #[error("workflow '{workflow}': cycle detected through step '{kind}'")]
  CycleDetected { workflow: String, kind: String },

  #[error("duplicate workflow kind '{0}'")]
  DuplicateWorkflow(String),
}
