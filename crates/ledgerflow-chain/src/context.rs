use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use ledgerflow_config::{ChainKind, ChainSettings};

use crate::client::ChainClient;
use crate::error::ChainError;

/// Everything a handler or engine call needs to know about one chain.
#[derive(Clone)]
pub struct ChainContext {
  pub chain_id: u64,
  pub kind: ChainKind,
  pub rpc_endpoint: String,
  /// Blocks after which a transaction is treated as reorg-safe.
  pub finality_depth: u64,
  pub addresses: BTreeMap<String, String>,
  pub client: Arc<dyn ChainClient>,
}

impl ChainContext {
  pub fn from_settings(settings: &ChainSettings, client: Arc<dyn ChainClient>) -> Self {
    Self {
      chain_id: settings.chain_id,
      kind: settings.kind,
      rpc_endpoint: settings.rpc_endpoint.clone(),
      finality_depth: settings.finality_depth(),
      addresses: settings.addresses.clone(),
      client,
    }
  }

  /// Look up a named address, e.g. the staking contract.
  pub fn address(&self, name: &str) -> Option<&str> {
    self.addresses.get(name).map(String::as_str)
  }
}

impl fmt::Debug for ChainContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ChainContext")
      .field("chain_id", &self.chain_id)
      .field("kind", &self.kind)
      .field("rpc_endpoint", &self.rpc_endpoint)
      .field("finality_depth", &self.finality_depth)
      .finish_non_exhaustive()
  }
}

/// Chain contexts by chain id.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
  chains: HashMap<u64, Arc<ChainContext>>,
}

impl ChainRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build contexts for every configured chain, creating clients with `connect`.
  pub fn from_settings<F>(settings: &[ChainSettings], mut connect: F) -> Self
  where
    F: FnMut(&ChainSettings) -> Arc<dyn ChainClient>,
  {
    let mut registry = Self::new();
    for chain in settings {
      registry.insert(ChainContext::from_settings(chain, connect(chain)));
    }
    registry
  }

  pub fn insert(&mut self, context: ChainContext) {
    self.chains.insert(context.chain_id, Arc::new(context));
  }

  pub fn get(&self, chain_id: u64) -> Result<Arc<ChainContext>, ChainError> {
    self
      .chains
      .get(&chain_id)
      .cloned()
      .ok_or(ChainError::UnknownChain(chain_id))
  }

  pub fn iter(&self) -> impl Iterator<Item = &Arc<ChainContext>> {
    self.chains.values()
  }
}
