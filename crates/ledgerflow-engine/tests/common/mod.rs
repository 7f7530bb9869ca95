#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ledgerflow_chain::{ChainContext, InMemoryChain};
use ledgerflow_config::{ChainKind, WorkflowDef};
use ledgerflow_engine::{
  ChannelNotifier, EngineError, FnHandler, HandlerError, HandlerRegistry, StepContext, StepEvent,
  StepExecution, StepHandler, StepOutcome, WorkflowEngine,
};
use ledgerflow_kv::InMemoryKvStore;
use ledgerflow_pending::{InMemoryLedger, PendingTransactionStore};
use ledgerflow_queue::{MemoryBroker, StepMessage};
use ledgerflow_store::{MemoryStore, Store};
use ledgerflow_workflow::StepConfig;
use tokio::sync::mpsc::UnboundedReceiver;

pub const CHAIN_ID: u64 = 1409;

pub struct Harness {
  pub engine: Arc<WorkflowEngine<ChannelNotifier>>,
  pub store: Arc<dyn Store>,
  pub broker: MemoryBroker,
  pub pending: Arc<PendingTransactionStore>,
  pub ledger: Arc<InMemoryLedger>,
  pub chain: Arc<InMemoryChain>,
  pub ctx: Arc<ChainContext>,
  pub events: UnboundedReceiver<StepEvent>,
}

pub fn harness(defs: Vec<WorkflowDef>, handlers: HandlerRegistry) -> Harness {
  harness_with_store(Arc::new(MemoryStore::new()), defs, handlers)
}

pub fn harness_with_store(
  store: Arc<dyn Store>,
  defs: Vec<WorkflowDef>,
  handlers: HandlerRegistry,
) -> Harness {
  harness_with(store, Arc::new(InMemoryLedger::new()), defs, handlers)
}

/// A harness whose pending store consults `ledger`, for handlers that
/// read the same ledger.
pub fn harness_with(
  store: Arc<dyn Store>,
  ledger: Arc<InMemoryLedger>,
  defs: Vec<WorkflowDef>,
  handlers: HandlerRegistry,
) -> Harness {
  let chain = Arc::new(InMemoryChain::new());
  let ctx = Arc::new(ChainContext {
    chain_id: CHAIN_ID,
    kind: ChainKind::Auxiliary,
    rpc_endpoint: "memory://aux".to_string(),
    finality_depth: 2,
    addresses: BTreeMap::from([("staking".to_string(), "0xstaking".to_string())]),
    client: chain.clone(),
  });
  let broker = MemoryBroker::new();
  let pending = Arc::new(
    PendingTransactionStore::new(Arc::new(InMemoryKvStore::new()), Arc::new(broker.clone()))
      .with_ledger(ledger.clone()),
  );
  let config = Arc::new(StepConfig::new(defs).unwrap());
  let (notifier, events) = ChannelNotifier::channel();
  let engine = WorkflowEngine::with_notifier(
    config,
    handlers,
    store.clone(),
    Arc::new(broker.clone()),
    pending.clone(),
    notifier,
  )
  .unwrap();

  Harness {
    engine: Arc::new(engine),
    store,
    broker,
    pending,
    ledger,
    chain,
    ctx,
    events,
  }
}

impl Harness {
  /// Route queued messages until the queue is empty.
  pub async fn drain(&self) -> Vec<(StepMessage, Result<StepExecution, EngineError>)> {
    let mut routed = Vec::new();
    loop {
      let batch = self.broker.take_all();
      if batch.is_empty() {
        return routed;
      }
      for message in batch {
        let result = self.engine.handle_message(&self.ctx, &message).await;
        routed.push((message, result));
      }
    }
  }

  pub fn start_message(&self, workflow_kind: &str, init_step: &str, params: serde_json::Value) -> StepMessage {
    StepMessage::start(
      uuid_like(workflow_kind),
      workflow_kind,
      init_step,
      params,
      "client-1",
      CHAIN_ID,
    )
  }

  pub fn take_events(&mut self) -> Vec<StepEvent> {
    let mut events = Vec::new();
    while let Ok(event) = self.events.try_recv() {
      events.push(event);
    }
    events
  }
}

fn uuid_like(prefix: &str) -> String {
  static NEXT: AtomicUsize = AtomicUsize::new(0);
  format!("{prefix}-{}", NEXT.fetch_add(1, Ordering::SeqCst))
}

/// A handler that always finishes with `data`, counting its calls.
pub fn done_with(data: serde_json::Value, calls: Arc<AtomicUsize>) -> Arc<dyn StepHandler> {
  FnHandler::new(move |_ctx: StepContext, _params| {
    let data = data.clone();
    let calls = calls.clone();
    async move {
      calls.fetch_add(1, Ordering::SeqCst);
      Ok::<_, HandlerError>(StepOutcome::Done(data))
    }
  })
}

pub fn noop() -> Arc<dyn StepHandler> {
  done_with(serde_json::Value::Null, Arc::new(AtomicUsize::new(0)))
}

pub fn always_infrastructure(calls: Arc<AtomicUsize>) -> Arc<dyn StepHandler> {
  FnHandler::new(move |_ctx: StepContext, _params| {
    let calls = calls.clone();
    async move {
      calls.fetch_add(1, Ordering::SeqCst);
      Err::<StepOutcome, _>(HandlerError::Infrastructure("rpc unavailable".to_string()))
    }
  })
}

pub fn counter() -> Arc<AtomicUsize> {
  Arc::new(AtomicUsize::new(0))
}

pub fn count(calls: &AtomicUsize) -> usize {
  calls.load(Ordering::SeqCst)
}
