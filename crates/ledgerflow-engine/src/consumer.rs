//! Queue consumer.
//!
//! The `WorkflowConsumer` runs a fixed number of workers against one
//! subscription and hands every delivery to the `WorkflowEngine`.

use std::sync::Arc;

use ledgerflow_chain::ChainRegistry;
use ledgerflow_config::ConsumerSettings;
use ledgerflow_queue::{Delivery, Subscription};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::engine::{StepExecution, WorkflowEngine};
use crate::error::ConsumerError;
use crate::events::StepNotifier;

/// What became of one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
  Acked,
  /// Returned to the queue for redelivery.
  Requeued,
}

/// Pulls step messages and routes them.
///
/// # Usage
///
/// ```ignore
/// let consumer = WorkflowConsumer::new(engine, chains, Arc::new(broker.subscribe(16)));
/// let cancel = CancellationToken::new();
/// consumer.start(cancel).await?;
/// ```
pub struct WorkflowConsumer<N: StepNotifier> {
  engine: Arc<WorkflowEngine<N>>,
  chains: Arc<ChainRegistry>,
  subscription: Arc<dyn Subscription>,
  workers: usize,
  max_redeliveries: u32,
}

impl<N: StepNotifier + 'static> WorkflowConsumer<N> {
  pub fn new(
    engine: Arc<WorkflowEngine<N>>,
    chains: Arc<ChainRegistry>,
    subscription: Arc<dyn Subscription>,
  ) -> Self {
    Self::with_settings(engine, chains, subscription, &ConsumerSettings::default())
  }

  pub fn with_settings(
    engine: Arc<WorkflowEngine<N>>,
    chains: Arc<ChainRegistry>,
    subscription: Arc<dyn Subscription>,
    settings: &ConsumerSettings,
  ) -> Self {
    Self {
      engine,
      chains,
      subscription,
      workers: settings.workers.max(1),
      max_redeliveries: settings.max_redeliveries,
    }
  }

  /// Run the workers until `cancel` fires or the subscription ends.
  pub async fn start(self, cancel: CancellationToken) -> Result<(), ConsumerError> {
    info!(workers = self.workers, "starting workflow consumer");

    let this = Arc::new(self);
    let handles: Vec<_> = (0..this.workers)
      .map(|worker| {
        let this = this.clone();
        let cancel = cancel.clone();
        tokio::spawn(
          async move { this.work(cancel).await }.instrument(info_span!("consumer_worker", worker)),
        )
      })
      .collect();

    let mut failure = None;
    for (worker, result) in futures::future::join_all(handles).await.into_iter().enumerate() {
      if let Err(err) = result {
        error!(worker, error = %err, "consumer worker panicked");
        failure.get_or_insert(ConsumerError::Worker {
          worker,
          message: err.to_string(),
        });
      }
    }

    info!("workflow consumer stopped");
    failure.map_or(Ok(()), Err)
  }

  async fn work(&self, cancel: CancellationToken) {
    loop {
      tokio::select! {
          _ = cancel.cancelled() => {
              debug!("consumer worker cancelled");
              break;
          }
          delivery = self.subscription.next() => {
              match delivery {
                  Some(delivery) => {
                      self.process(delivery).await;
                  }
                  None => {
                      debug!("subscription closed");
                      break;
                  }
              }
          }
      }
    }
  }

  /// Route one delivery, then ack or requeue it.
  ///
  /// Successes, skips and non-retryable errors are acked. Retryable errors
  /// are requeued until the redelivery limit, after which the step's
  /// exhaustion policy settles it.
  pub async fn process(&self, delivery: Delivery) -> Disposition {
    let message = &delivery.message;
    let chain = match self.chains.get(message.chain_id) {
      Ok(chain) => chain,
      Err(err) => {
        error!(message_id = %message.message_id, error = %err, "message_for_unknown_chain");
        return self.ack(delivery).await;
      }
    };

    if delivery.attempt > self.max_redeliveries {
      let reason = format!("gave up after {} deliveries", delivery.attempt - 1);
      let exhausted = self.engine.exhaust_message(message, &reason).await;
      if let Err(err) = exhausted {
        if err.is_retryable() {
          warn!(message_id = %message.message_id, error = %err, "exhaust_failed");
          return self.nack(delivery).await;
        }
        error!(message_id = %message.message_id, error = %err, "exhaust_rejected");
      }
      return self.ack(delivery).await;
    }

    let result = self.engine.handle_message(&chain, message).await;
    match result {
      Ok(outcome) => {
        if outcome == StepExecution::Skipped {
          debug!(message_id = %message.message_id, "delivery_skipped");
        }
        self.ack(delivery).await
      }
      Err(err) if err.is_retryable() => {
        warn!(
          message_id = %message.message_id,
          attempt = delivery.attempt,
          error = %err,
          "delivery_requeued"
        );
        self.nack(delivery).await
      }
      Err(err) if err.is_redundant_delivery() => {
        debug!(message_id = %message.message_id, reason = %err, "delivery_redundant");
        self.ack(delivery).await
      }
      Err(err) => {
        error!(message_id = %message.message_id, error = %err, "delivery_dropped");
        self.ack(delivery).await
      }
    }
  }

  async fn ack(&self, delivery: Delivery) -> Disposition {
    if let Err(err) = self.subscription.ack(delivery).await {
      warn!(error = %err, "ack_failed");
    }
    Disposition::Acked
  }

  async fn nack(&self, delivery: Delivery) -> Disposition {
    if let Err(err) = self.subscription.nack(delivery).await {
      warn!(error = %err, "nack_failed");
    }
    Disposition::Requeued
  }
}
