//! Step graph validation against definitions loaded the way the service loads them.

use ledgerflow_config::WorkflowDef;
use ledgerflow_workflow::{StepConfig, WorkflowError};

fn parse(json: &str) -> WorkflowDef {
  serde_json::from_str(json).unwrap()
}

const ONBOARDING: &str = r#"{
  "kind": "wallet-onboarding",
  "init_step": "createWallet",
  "steps": [
    { "kind": "createWallet", "on_success": ["fundGas", "registerDevice"], "on_failure": "markFailed" },
    { "kind": "fundGas", "on_pending": "checkFunding", "on_failure": "markFailed" },
    { "kind": "checkFunding", "on_success": ["activate"], "on_failure": "markFailed", "read_data_from": ["fundGas"] },
    { "kind": "registerDevice", "on_success": ["activate"], "on_failure": "markFailed" },
    { "kind": "activate", "prerequisites": ["checkFunding", "registerDevice"], "read_data_from": ["createWallet", "registerDevice"] },
    { "kind": "markFailed" }
  ]
}"#;

#[test]
fn test_fan_out_and_join_compile() {
  let config = StepConfig::new([parse(ONBOARDING)]).unwrap();
  let graph = config.get("wallet-onboarding").unwrap();

  assert_eq!(graph.init_step(), "createWallet");
  assert_eq!(
    graph.graph().downstream("createWallet"),
    &["fundGas".to_string(), "registerDevice".to_string(), "markFailed".to_string()]
  );
  assert!(graph.graph().is_join_point("activate"));
  assert_eq!(graph.graph().entry_points(), &["createWallet".to_string()]);
  assert!(graph.resumes("checkFunding", "fundGas"));
}

#[test]
fn test_unreachable_branch_is_reported() {
  let def = parse(
    r#"{
      "kind": "redeem",
      "init_step": "burn",
      "steps": [
        { "kind": "burn", "on_success": ["release"] },
        { "kind": "release" },
        { "kind": "refund", "on_success": ["release"] }
      ]
    }"#,
  );

  let err = StepConfig::new([def]).unwrap_err();
  assert!(matches!(err, WorkflowError::Unreachable { ref kind, .. } if kind == "refund"));
  assert_eq!(
    err.to_string(),
    "workflow 'redeem': step 'refund' is unreachable from the init step"
  );
}

#[test]
fn test_on_pending_reference_must_exist() {
  let def = parse(
    r#"{
      "kind": "mint",
      "init_step": "mintInit",
      "steps": [ { "kind": "mintInit", "on_pending": "checkMint" } ]
    }"#,
  );

  assert!(matches!(
    StepConfig::new([def]),
    Err(WorkflowError::UnknownReference { from, to, .. }) if from == "mintInit" && to == "checkMint"
  ));
}
