//! Per (chain, address) nonce allocation.
//!
//! Each key has one lease guarded by a FIFO-fair async mutex. The holder
//! resolves the next nonce (cached, or the chain's transaction count),
//! submits, and only then releases the lease to the next waiter. The cache
//! advances optimistically; an ambiguous submission leaves a tentative
//! nonce that the next allocation reconciles against the chain first.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, instrument, warn};

use crate::admission::AdmissionTicket;
use crate::context::ChainContext;
use crate::error::{ChainError, NonceError, SubmitError};

/// Outcome of checking a tentative nonce against the chain's count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
  /// The chain saw the tentative nonce; continue from its count.
  Consumed { next: u64 },
  /// The chain never saw it; reuse it rather than leave a gap.
  NotConsumed { next: u64 },
  /// The chain is behind the tentative nonce (dropped transactions);
  /// rewind to its count.
  Rewound { next: u64 },
}

impl Reconciliation {
  pub fn next(self) -> u64 {
    match self {
      Self::Consumed { next } | Self::NotConsumed { next } | Self::Rewound { next } => next,
    }
  }
}

/// Decide the next nonce after an ambiguous submission of `tentative`.
pub fn reconcile(tentative: u64, chain_count: u64) -> Reconciliation {
  if chain_count > tentative {
    Reconciliation::Consumed { next: chain_count }
  } else if chain_count == tentative {
    Reconciliation::NotConsumed { next: tentative }
  } else {
    Reconciliation::Rewound { next: chain_count }
  }
}

#[derive(Debug, Default)]
struct NonceLease {
  /// Next nonce to hand out; `None` until synced with the chain.
  next: Option<u64>,
  /// Nonce whose submission outcome is unknown.
  tentative: Option<u64>,
}

type LeaseKey = (u64, String);

/// Serialized nonce allocation per (chain, address).
#[derive(Debug, Default)]
pub struct NonceSequencer {
  leases: Mutex<HashMap<LeaseKey, Arc<AsyncMutex<NonceLease>>>>,
}

impl NonceSequencer {
  pub fn new() -> Self {
    Self::default()
  }

  fn lease(&self, chain_id: u64, address: &str) -> Result<Arc<AsyncMutex<NonceLease>>, ChainError> {
    let mut leases = self.leases.lock().map_err(|_| ChainError::Poisoned("nonce leases"))?;
    Ok(
      leases
        .entry((chain_id, address.to_lowercase()))
        .or_default()
        .clone(),
    )
  }

  async fn resolve(
    lease: &mut NonceLease,
    chain: &ChainContext,
    address: &str,
  ) -> Result<u64, ChainError> {
    if let Some(tentative) = lease.tentative {
      let count = chain.client.transaction_count(address).await?;
      let reconciliation = reconcile(tentative, count);
      match reconciliation {
        Reconciliation::Rewound { next } => warn!(
          chain_id = chain.chain_id,
          address = %address,
          tentative,
          chain_count = count,
          next,
          "nonce_rewound"
        ),
        _ => debug!(
          chain_id = chain.chain_id,
          address = %address,
          tentative,
          chain_count = count,
          ?reconciliation,
          "nonce_reconciled"
        ),
      }
      lease.tentative = None;
      lease.next = Some(reconciliation.next());
    }

    match lease.next {
      Some(next) => Ok(next),
      None => {
        let count = chain.client.transaction_count(address).await?;
        lease.next = Some(count);
        Ok(count)
      }
    }
  }

  /// Allocate the next nonce for `address` and run `submit` with it.
  ///
  /// Waiters for the same key run one at a time in arrival order. A
  /// rejected submission gives the nonce back; an ambiguous one is
  /// reconciled before the next allocation.
  #[instrument(
    name = "nonce_submit",
    skip(self, chain, submit),
    fields(chain_id = chain.chain_id, address = %address)
  )]
  pub async fn with_next_nonce<F, Fut, T, E>(
    &self,
    chain: &ChainContext,
    address: &str,
    submit: F,
  ) -> Result<T, NonceError<E>>
  where
    F: FnOnce(u64) -> Fut,
    Fut: Future<Output = Result<T, SubmitError<E>>>,
  {
    self.submit_inner(None, chain, address, submit).await
  }

  /// Like [`with_next_nonce`](Self::with_next_nonce), but allocation also
  /// waits for every earlier ticket of the same sender.
  #[instrument(
    name = "nonce_submit_ordered",
    skip(self, ticket, chain, submit),
    fields(chain_id = chain.chain_id, address = %address, ticket = ticket.number())
  )]
  pub async fn with_admitted_nonce<F, Fut, T, E>(
    &self,
    ticket: AdmissionTicket,
    chain: &ChainContext,
    address: &str,
    submit: F,
  ) -> Result<T, NonceError<E>>
  where
    F: FnOnce(u64) -> Fut,
    Fut: Future<Output = Result<T, SubmitError<E>>>,
  {
    ticket.wait_turn().await;
    self.submit_inner(Some(ticket), chain, address, submit).await
  }

  async fn submit_inner<F, Fut, T, E>(
    &self,
    ticket: Option<AdmissionTicket>,
    chain: &ChainContext,
    address: &str,
    submit: F,
  ) -> Result<T, NonceError<E>>
  where
    F: FnOnce(u64) -> Fut,
    Fut: Future<Output = Result<T, SubmitError<E>>>,
  {
    let lease = self.lease(chain.chain_id, address)?;
    let mut lease = lease.lock().await;

    let nonce = Self::resolve(&mut lease, chain, address).await?;
    if let Some(ticket) = ticket {
      ticket.admitted();
    }
    // Optimistic advance; undone below on a definite rejection
    lease.next = Some(nonce + 1);
    debug!(nonce, "nonce_allocated");

    match submit(nonce).await {
      Ok(value) => Ok(value),
      Err(SubmitError::Rejected(err)) => {
        lease.next = Some(nonce);
        debug!(nonce, "nonce_returned");
        Err(NonceError::Rejected(err))
      }
      Err(SubmitError::Ambiguous(err)) => {
        lease.tentative = Some(nonce);
        warn!(nonce, "nonce_outcome_unknown");
        Err(NonceError::Ambiguous(err))
      }
    }
  }

  /// Allocate and consume the next nonce without submitting anything.
  pub async fn get_nonce(&self, chain: &ChainContext, address: &str) -> Result<u64, ChainError> {
    let lease = self.lease(chain.chain_id, address)?;
    let mut lease = lease.lock().await;
    let nonce = Self::resolve(&mut lease, chain, address).await?;
    lease.next = Some(nonce + 1);
    Ok(nonce)
  }

  /// Forget the cached nonce so the next allocation re-syncs with the chain.
  pub async fn clear(&self, chain_id: u64, address: &str) -> Result<(), ChainError> {
    let lease = self.lease(chain_id, address)?;
    let mut lease = lease.lock().await;
    *lease = NonceLease::default();
    Ok(())
  }
}
