//! Routing, idempotence and failure handling in the step router.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Duration as LeaseDuration;
use common::{CHAIN_ID, always_infrastructure, count, counter, done_with, harness, noop};
use ledgerflow_config::{ExhaustionPolicy, StepDef, WorkflowDef};
use ledgerflow_engine::{
  EngineError, FnHandler, HandlerError, HandlerRegistry, Reconciler, StepContext, StepEvent,
  StepExecution, StepOutcome,
};
use ledgerflow_store::{StepStatus, WorkflowStatus};
use serde_json::json;

fn linear() -> WorkflowDef {
  WorkflowDef::new(
    "linear",
    "first",
    vec![
      StepDef::new("first").on_success(["second"]),
      StepDef::new("second").on_success(["third"]),
      StepDef::new("third"),
    ],
  )
}

#[tokio::test]
async fn test_linear_workflow_completes() {
  let calls = counter();
  let handlers = HandlerRegistry::new()
    .register("first", done_with(json!({ "a": 1 }), calls.clone()))
    .register("second", done_with(json!({ "b": 2 }), calls.clone()))
    .register("third", done_with(json!({ "c": 3 }), calls.clone()));
  let mut h = harness(vec![linear()], handlers);

  let workflow_id = h
    .engine
    .start_workflow("linear", json!({ "amount": 5 }), "client-1", CHAIN_ID)
    .await
    .unwrap();
  let routed = h.drain().await;

  assert_eq!(routed.len(), 3);
  assert!(routed.iter().all(|(_, r)| matches!(r, Ok(StepExecution::Completed))));
  assert_eq!(count(&calls), 3);

  let workflow = h.store.get_workflow(&workflow_id).await.unwrap();
  assert_eq!(workflow.status, WorkflowStatus::Completed);
  let third = h.store.get_step(&workflow_id, "third").await.unwrap().unwrap();
  assert_eq!(workflow.current_step_id.as_deref(), Some(third.id.as_str()));

  let events = h.take_events();
  assert!(matches!(events.first(), Some(StepEvent::WorkflowStarted { .. })));
  assert!(matches!(events.last(), Some(StepEvent::WorkflowCompleted { .. })));
}

#[tokio::test]
async fn test_redelivered_message_after_completion_is_rejected() {
  let calls = counter();
  let handlers = HandlerRegistry::new()
    .register("first", done_with(json!({}), calls.clone()))
    .register("second", noop())
    .register("third", noop());
  let h = harness(vec![linear()], handlers);

  let message = h.start_message("linear", "first", json!({}));
  let first = h.engine.handle_message(&h.ctx, &message).await.unwrap();
  assert_eq!(first, StepExecution::Completed);

  // Init redelivery finds the same workflow and a finished step
  let err = h.engine.handle_message(&h.ctx, &message).await.unwrap_err();
  assert!(matches!(err, EngineError::StepFinished { .. }));
  assert!(!err.is_retryable());
  assert_eq!(count(&calls), 1);
  assert_eq!(h.store.list_workflows(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_deliveries_run_handler_once() {
  let calls = counter();
  let slow_calls = calls.clone();
  let slow = FnHandler::new(move |_ctx: StepContext, _params| {
    let calls = slow_calls.clone();
    async move {
      calls.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(Duration::from_millis(50)).await;
      Ok::<_, HandlerError>(StepOutcome::done())
    }
  });
  let handlers = HandlerRegistry::new()
    .register("first", slow)
    .register("second", noop())
    .register("third", noop());
  let h = harness(vec![linear()], handlers);

  let message = h.start_message("linear", "first", json!({}));
  let (a, b) = tokio::join!(
    h.engine.handle_message(&h.ctx, &message),
    h.engine.handle_message(&h.ctx, &message),
  );

  let results = [a, b];
  let completed = results
    .iter()
    .filter(|r| matches!(r, Ok(StepExecution::Completed)))
    .count();
  assert_eq!(completed, 1);
  assert!(
    results
      .iter()
      .any(|r| matches!(r, Ok(StepExecution::Skipped) | Err(EngineError::StepFinished { .. })))
  );
  assert_eq!(count(&calls), 1);
  // Exactly one successor message
  assert_eq!(h.broker.len(), 1);
}

#[tokio::test]
async fn test_fan_out_and_join_runs_join_once_with_merged_data() {
  let def = WorkflowDef::new(
    "onboard",
    "init",
    vec![
      StepDef::new("init").on_success(["kyc", "wallet"]),
      StepDef::new("kyc").on_success(["activate"]),
      StepDef::new("wallet").on_success(["activate"]),
      StepDef::new("activate")
        .prerequisites(["kyc", "wallet"])
        .read_data_from(["kyc", "wallet"]),
    ],
  );

  let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
  let seen_by_join = seen.clone();
  let join = FnHandler::new(move |_ctx: StepContext, params: serde_json::Value| {
    let seen = seen_by_join.clone();
    async move {
      seen.lock().unwrap().push(params);
      Ok::<_, HandlerError>(StepOutcome::done())
    }
  });

  let handlers = HandlerRegistry::new()
    .register("init", noop())
    .register("kyc", done_with(json!({ "kycLevel": 2, "source": "kyc" }), counter()))
    .register("wallet", done_with(json!({ "address": "0xB", "source": "wallet" }), counter()))
    .register("activate", join);
  let h = harness(vec![def], handlers);

  let workflow_id = h
    .engine
    .start_workflow("onboard", json!({ "user": "u1" }), "client-1", CHAIN_ID)
    .await
    .unwrap();
  let routed = h.drain().await;

  let join_messages = routed
    .iter()
    .filter(|(message, _)| message.step_kind == "activate")
    .count();
  assert_eq!(join_messages, 1);

  let seen = seen.lock().unwrap();
  assert_eq!(seen.len(), 1);
  assert_eq!(
    seen[0],
    json!({ "user": "u1", "kycLevel": 2, "address": "0xB", "source": "wallet" })
  );

  let workflow = h.store.get_workflow(&workflow_id).await.unwrap();
  assert_eq!(workflow.status, WorkflowStatus::Completed);
  assert_eq!(h.store.list_steps(&workflow_id).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_join_rejects_early_delivery() {
  let def = WorkflowDef::new(
    "onboard",
    "init",
    vec![
      StepDef::new("init").on_success(["kyc", "wallet"]),
      StepDef::new("kyc").on_success(["activate"]),
      StepDef::new("wallet").on_success(["activate"]),
      StepDef::new("activate").prerequisites(["kyc", "wallet"]),
    ],
  );
  let handlers = HandlerRegistry::new()
    .register("init", noop())
    .register("kyc", noop())
    .register("wallet", noop())
    .register("activate", noop());
  let h = harness(vec![def], handlers);

  let workflow_id = h
    .engine
    .start_workflow("onboard", json!({}), "client-1", CHAIN_ID)
    .await
    .unwrap();

  let err = h
    .engine
    .execute_step(&h.ctx, &workflow_id, "activate", None)
    .await
    .unwrap_err();
  match err {
    EngineError::PrerequisitesUnmet { ref missing, .. } => {
      assert_eq!(missing, &vec!["kyc".to_string(), "wallet".to_string()]);
    }
    other => panic!("unexpected error: {other}"),
  }
  assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_validation_error_routes_to_on_failure() {
  let def = WorkflowDef::new(
    "payout",
    "charge",
    vec![
      StepDef::new("charge").on_success(["send"]).on_failure("refund"),
      StepDef::new("send"),
      StepDef::new("refund"),
    ],
  );
  let charge = FnHandler::new(|_ctx: StepContext, _params| async {
    Err::<StepOutcome, _>(HandlerError::Validation("amount must be positive".to_string()))
  });
  let send_calls = counter();
  let refund_calls = counter();
  let handlers = HandlerRegistry::new()
    .register("charge", charge)
    .register("send", done_with(json!({}), send_calls.clone()))
    .register("refund", done_with(json!({ "refunded": true }), refund_calls.clone()));
  let h = harness(vec![def], handlers);

  let workflow_id = h
    .engine
    .start_workflow("payout", json!({ "amount": -1 }), "client-1", CHAIN_ID)
    .await
    .unwrap();
  let routed = h.drain().await;

  assert!(matches!(routed[0].1, Ok(StepExecution::Failed)));
  assert_eq!(count(&send_calls), 0);
  assert_eq!(count(&refund_calls), 1);

  let report = h.engine.workflow_report(&workflow_id).await.unwrap();
  assert_eq!(report.status, WorkflowStatus::Failed);
  let failed = report.failed_step.unwrap();
  assert_eq!(failed.kind, "charge");
  assert_eq!(failed.data, Some(json!({ "error": "amount must be positive" })));
}

#[tokio::test]
async fn test_failure_without_route_fails_workflow() {
  let def = WorkflowDef::new(
    "payout",
    "charge",
    vec![StepDef::new("charge").on_success(["send"]), StepDef::new("send")],
  );
  let charge = FnHandler::new(|_ctx: StepContext, _params| async {
    Ok::<_, HandlerError>(StepOutcome::Failed(json!({ "reason": "insufficient funds" })))
  });
  let handlers = HandlerRegistry::new()
    .register("charge", charge)
    .register("send", noop());
  let mut h = harness(vec![def], handlers);

  let workflow_id = h
    .engine
    .start_workflow("payout", json!({}), "client-1", CHAIN_ID)
    .await
    .unwrap();
  h.drain().await;

  let workflow = h.store.get_workflow(&workflow_id).await.unwrap();
  assert_eq!(workflow.status, WorkflowStatus::Failed);
  assert!(h.store.get_step(&workflow_id, "send").await.unwrap().is_none());

  let failures = h
    .take_events()
    .into_iter()
    .filter(|event| matches!(event, StepEvent::WorkflowFailed { .. }))
    .count();
  assert_eq!(failures, 1);
}

#[tokio::test]
async fn test_infrastructure_error_releases_lease_for_retry() {
  let calls = counter();
  let flaky_calls = calls.clone();
  let flaky = FnHandler::new(move |ctx: StepContext, _params| {
    let calls = flaky_calls.clone();
    async move {
      calls.fetch_add(1, Ordering::SeqCst);
      if ctx.attempt == 1 {
        Err(HandlerError::Infrastructure("rpc timeout".to_string()))
      } else {
        Ok(StepOutcome::done())
      }
    }
  });
  let handlers = HandlerRegistry::new()
    .register("first", flaky)
    .register("second", noop())
    .register("third", noop());
  let h = harness(vec![linear()], handlers);

  let message = h.start_message("linear", "first", json!({}));
  let err = h.engine.handle_message(&h.ctx, &message).await.unwrap_err();
  assert!(err.is_retryable());

  let step = h
    .store
    .get_step(&message.message_id, "first")
    .await
    .unwrap()
    .unwrap();
  assert_eq!(step.status, StepStatus::InProgress);
  assert!(step.lease_token.is_none());

  let retried = h.engine.handle_message(&h.ctx, &message).await.unwrap();
  assert_eq!(retried, StepExecution::Completed);
  let step = h
    .store
    .get_step(&message.message_id, "first")
    .await
    .unwrap()
    .unwrap();
  assert_eq!(step.attempts, 2);
  assert_eq!(count(&calls), 2);
}

#[tokio::test]
async fn test_exhaustion_policies() {
  let def = WorkflowDef::new(
    "stake",
    "notify",
    vec![
      StepDef::new("notify")
        .on_success(["stake"])
        .on_exhaustion(ExhaustionPolicy::Lenient),
      StepDef::new("stake").on_failure("markFailed"),
      StepDef::new("markFailed"),
    ],
  );
  let mark_calls = counter();
  let handlers = HandlerRegistry::new()
    .register("notify", always_infrastructure(counter()))
    .register("stake", always_infrastructure(counter()))
    .register("markFailed", done_with(json!({}), mark_calls.clone()));
  let h = harness(vec![def], handlers);

  let workflow_id = h
    .engine
    .start_workflow("stake", json!({}), "client-1", CHAIN_ID)
    .await
    .unwrap();
  let routed = h.drain().await;
  assert!(routed[0].1.as_ref().is_err_and(|err| err.is_retryable()));

  // Lenient: completes and continues
  let lenient = h
    .engine
    .exhaust_step(&workflow_id, "notify", "gave up after 5 deliveries")
    .await
    .unwrap();
  assert_eq!(lenient, StepExecution::Completed);
  let notify = h.store.get_step(&workflow_id, "notify").await.unwrap().unwrap();
  assert_eq!(notify.response().unwrap()["exhausted"], json!(true));

  let routed = h.drain().await;
  assert_eq!(routed[0].0.step_kind, "stake");
  assert!(routed[0].1.is_err());

  // Fail: routes to on_failure
  let failed = h
    .engine
    .exhaust_step(&workflow_id, "stake", "gave up after 5 deliveries")
    .await
    .unwrap();
  assert_eq!(failed, StepExecution::Failed);
  h.drain().await;
  assert_eq!(count(&mark_calls), 1);

  let workflow = h.store.get_workflow(&workflow_id).await.unwrap();
  assert_eq!(workflow.status, WorkflowStatus::Failed);

  // Exhausting a finished step is a no-op
  let again = h
    .engine
    .exhaust_step(&workflow_id, "stake", "late duplicate")
    .await
    .unwrap();
  assert_eq!(again, StepExecution::Skipped);
}

#[tokio::test]
async fn test_reconciler_republishes_lost_and_released_steps() {
  let infra_calls = counter();
  let handlers = HandlerRegistry::new()
    .register("first", noop())
    .register("second", always_infrastructure(infra_calls.clone()))
    .register("third", noop());
  let h = harness(vec![linear()], handlers);
  let reconciler = Reconciler::new(
    h.store.clone(),
    Arc::new(h.broker.clone()),
    LeaseDuration::zero(),
  );

  // Init publish lost
  let workflow_id = h
    .engine
    .start_workflow("linear", json!({}), "client-1", CHAIN_ID)
    .await
    .unwrap();
  assert_eq!(h.broker.take_all().len(), 1);

  let report = reconciler.sweep().await.unwrap();
  assert_eq!(report.republished, 1);

  // first completes, second releases its lease on an infrastructure error
  let routed = h.drain().await;
  assert_eq!(routed.len(), 2);
  assert_eq!(count(&infra_calls), 1);

  let report = reconciler.sweep().await.unwrap();
  assert_eq!(report.republished, 1);
  let republished = h.broker.take_all();
  assert_eq!(republished[0].step_kind, "second");
  assert_eq!(republished[0].workflow_id(), Some(workflow_id.as_str()));
}

#[tokio::test]
async fn test_unknown_workflow_kind_is_rejected() {
  let handlers = HandlerRegistry::new()
    .register("first", noop())
    .register("second", noop())
    .register("third", noop());
  let h = harness(vec![linear()], handlers);

  let err = h
    .engine
    .start_workflow("missing", json!({}), "client-1", CHAIN_ID)
    .await
    .unwrap_err();
  assert!(matches!(err, EngineError::UnknownWorkflowKind(ref kind) if kind == "missing"));
}
