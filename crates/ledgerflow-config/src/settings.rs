//! Service settings.
//!
//! ```json
//! {
//!   "database_url": "sqlite://ledgerflow.db",
//!   "chains": [
//!     { "chain_id": 3, "kind": "origin", "rpc_endpoint": "http://origin:8545" },
//!     { "chain_id": 1409, "kind": "auxiliary", "rpc_endpoint": "http://aux:8545", "finality_depth": 3 }
//!   ],
//!   "consumer": { "workers": 4, "prefetch": 16, "max_redeliveries": 5 }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::enums::ChainKind;
use crate::workflow::WorkflowDef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub database_url: Option<String>,
  #[serde(default)]
  pub chains: Vec<ChainSettings>,
  #[serde(default)]
  pub consumer: ConsumerSettings,
  #[serde(default)]
  pub engine: EngineSettings,
  #[serde(default)]
  pub finalizer: FinalizerSettings,
  /// Workflow graphs compiled at startup.
  #[serde(default)]
  pub workflows: Vec<WorkflowDef>,
}

/// Endpoints and addresses for one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSettings {
  pub chain_id: u64,
  pub kind: ChainKind,
  pub rpc_endpoint: String,
  /// Overrides the kind's default confirmation depth.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub finality_depth: Option<u64>,
  /// Named contract/account addresses handed to step handlers.
  #[serde(default)]
  pub addresses: BTreeMap<String, String>,
}

impl ChainSettings {
  pub fn finality_depth(&self) -> u64 {
    self
      .finality_depth
      .unwrap_or_else(|| self.kind.default_finality_depth())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
  /// Independent workers pulling from the shared queue.
  pub workers: usize,
  /// Deliveries a consumer may hold unacknowledged at once.
  pub prefetch: usize,
  /// Deliveries after which a step is handed to its exhaustion policy.
  pub max_redeliveries: u32,
}

impl Default for ConsumerSettings {
  fn default() -> Self {
    Self {
      workers: 4,
      prefetch: 16,
      max_redeliveries: 5,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
  /// How long a claimed step stays owned by one worker.
  pub lease_timeout_ms: u64,
  /// Age after which a queued row with a settled parent is re-published.
  pub reconcile_after_ms: u64,
}

impl Default for EngineSettings {
  fn default() -> Self {
    Self {
      lease_timeout_ms: 5 * 60 * 1000,
      reconcile_after_ms: 60 * 1000,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizerSettings {
  /// Age after which a record stuck mid-publish is retried by the sweep.
  pub stale_publish_ms: u64,
}

impl Default for FinalizerSettings {
  fn default() -> Self {
    Self {
      stale_publish_ms: 2 * 60 * 1000,
    }
  }
}
