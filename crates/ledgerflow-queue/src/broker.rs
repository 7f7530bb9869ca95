//! In-process broker.
//!
//! A shared FIFO queue with redelivery on nack. Each subscription bounds the
//! number of unacknowledged deliveries its workers may hold with a semaphore,
//! the in-process counterpart of a broker's prefetch count.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::QueueError;
use crate::message::StepMessage;
use crate::{Publisher, Subscription};

/// A message handed to one consumer.
///
/// Holds one unit of its subscription's prefetch until acked or nacked.
#[derive(Debug)]
pub struct Delivery {
  pub id: u64,
  pub message: StepMessage,
  /// 1 on first delivery, bumped on every redelivery.
  pub attempt: u32,
  _permit: OwnedSemaphorePermit,
}

#[derive(Debug)]
struct Envelope {
  id: u64,
  message: StepMessage,
  attempt: u32,
}

#[derive(Debug, Default)]
struct Shared {
  queue: Mutex<VecDeque<Envelope>>,
  notify: Notify,
  closed: AtomicBool,
  next_id: AtomicU64,
  published: AtomicU64,
  acked: AtomicU64,
}

impl Shared {
  fn push(&self, envelope: Envelope) -> Result<(), QueueError> {
    self
      .queue
      .lock()
      .map_err(|_| QueueError::Broker("queue lock poisoned".to_string()))?
      .push_back(envelope);
    self.notify.notify_one();
    Ok(())
  }

  fn pop(&self) -> Result<Option<Envelope>, QueueError> {
    Ok(
      self
        .queue
        .lock()
        .map_err(|_| QueueError::Broker("queue lock poisoned".to_string()))?
        .pop_front(),
    )
  }
}

/// In-memory message broker.
///
/// Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
  shared: Arc<Shared>,
}

impl MemoryBroker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Subscribe with at most `prefetch` unacknowledged deliveries.
  ///
  /// Clones of the returned subscription share the same prefetch budget.
  pub fn subscribe(&self, prefetch: usize) -> MemorySubscription {
    MemorySubscription {
      shared: self.shared.clone(),
      prefetch: Arc::new(Semaphore::new(prefetch.max(1))),
    }
  }

  /// Stop accepting messages. Subscribers drain what is queued, then stop.
  pub fn close(&self) {
    self.shared.closed.store(true, Ordering::SeqCst);
    self.shared.notify.notify_waiters();
  }

  /// Messages waiting for delivery.
  pub fn len(&self) -> usize {
    self.shared.queue.lock().map(|queue| queue.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Total messages accepted by `publish`.
  pub fn published(&self) -> u64 {
    self.shared.published.load(Ordering::SeqCst)
  }

  /// Total deliveries acknowledged.
  pub fn acked(&self) -> u64 {
    self.shared.acked.load(Ordering::SeqCst)
  }

  /// Remove and return every queued message without delivering it.
  pub fn take_all(&self) -> Vec<StepMessage> {
    self
      .shared
      .queue
      .lock()
      .map(|mut queue| queue.drain(..).map(|envelope| envelope.message).collect())
      .unwrap_or_default()
  }
}

#[async_trait]
impl Publisher for MemoryBroker {
  async fn publish(&self, message: StepMessage) -> Result<(), QueueError> {
    if self.shared.closed.load(Ordering::SeqCst) {
      return Err(QueueError::Closed);
    }
    let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
    debug!(delivery_id = id, step_kind = %message.step_kind, "message_published");
    self.shared.push(Envelope {
      id,
      message,
      attempt: 1,
    })?;
    self.shared.published.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }
}

/// A subscription to a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemorySubscription {
  shared: Arc<Shared>,
  prefetch: Arc<Semaphore>,
}

impl MemorySubscription {
  /// Prefetch units not currently held by a delivery.
  pub fn available_prefetch(&self) -> usize {
    self.prefetch.available_permits()
  }
}

#[async_trait]
impl Subscription for MemorySubscription {
  async fn next(&self) -> Option<Delivery> {
    let permit = self.prefetch.clone().acquire_owned().await.ok()?;

    loop {
      let notified = self.shared.notify.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();

      match self.shared.pop() {
        Ok(Some(envelope)) => {
          return Some(Delivery {
            id: envelope.id,
            message: envelope.message,
            attempt: envelope.attempt,
            _permit: permit,
          });
        }
        Ok(None) => {}
        Err(_) => return None,
      }

      if self.shared.closed.load(Ordering::SeqCst) {
        return None;
      }

      notified.await;
    }
  }

  async fn ack(&self, delivery: Delivery) -> Result<(), QueueError> {
    self.shared.acked.fetch_add(1, Ordering::SeqCst);
    debug!(delivery_id = delivery.id, "message_acked");
    Ok(())
  }

  async fn nack(&self, delivery: Delivery) -> Result<(), QueueError> {
    debug!(
      delivery_id = delivery.id,
      attempt = delivery.attempt,
      "message_nacked"
    );
    self.shared.push(Envelope {
      id: delivery.id,
      message: delivery.message,
      attempt: delivery.attempt + 1,
    })
  }
}
