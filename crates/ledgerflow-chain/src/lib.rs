//! Ledgerflow Chain
//!
//! Everything the engine knows about a blockchain:
//! - [`ChainContext`] / [`ChainRegistry`]: explicit per-chain configuration
//!   and client, resolved by chain id
//! - [`ChainClient`]: the RPC seam (transaction counts, heads, mined blocks)
//! - [`NonceSequencer`]: serialized nonce allocation per (chain, address)
//! - [`OrderedAdmission`]: arrival-order tickets per (chain, sender)
//!
//! The sequencer keeps no persistent state. Leases are rebuilt lazily from
//! the chain's reported transaction count after a restart.

mod admission;
mod client;
mod context;
mod error;
mod nonce;

pub use admission::{AdmissionTicket, OrderedAdmission};
pub use client::{ChainClient, InMemoryChain, MinedTransaction};
pub use context::{ChainContext, ChainRegistry};
pub use error::{ChainError, NonceError, SubmitError};
pub use nonce::{NonceSequencer, Reconciliation, reconcile};
