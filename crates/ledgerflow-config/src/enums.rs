use serde::{Deserialize, Serialize};

/// Which side of the bridged pair a chain is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainKind {
  Origin,
  Auxiliary,
}

impl ChainKind {
  /// Confirmations required before a block counts as final when the
  /// settings do not override it.
  pub fn default_finality_depth(self) -> u64 {
    match self {
      ChainKind::Origin => 24,
      ChainKind::Auxiliary => 6,
    }
  }
}

/// What happens to a step once the broker gives up redelivering it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
  /// Mark the step failed and follow its `on_failure` edge.
  #[default]
  Fail,
  /// Record the step as completed and keep going (best-effort steps).
  Lenient,
}
