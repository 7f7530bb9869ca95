use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Which workflow a message applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageTarget {
  /// Continue an existing workflow.
  Workflow { workflow_id: String },
  /// Create a workflow of this kind, then run its init step.
  Start {
    workflow_kind: String,
    request_params: serde_json::Value,
  },
}

/// A validated instruction to run one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub struct StepMessage {
  /// Unique per publish. Init messages reuse it as the new workflow's id.
  pub message_id: String,
  pub step_kind: String,
  pub target: MessageTarget,
  pub client_id: String,
  pub chain_id: u64,
}

impl StepMessage {
  /// A message that creates a workflow and runs `init_step`.
  pub fn start(
    message_id: impl Into<String>,
    workflow_kind: impl Into<String>,
    init_step: impl Into<String>,
    request_params: serde_json::Value,
    client_id: impl Into<String>,
    chain_id: u64,
  ) -> Self {
    Self {
      message_id: message_id.into(),
      step_kind: init_step.into(),
      target: MessageTarget::Start {
        workflow_kind: workflow_kind.into(),
        request_params,
      },
      client_id: client_id.into(),
      chain_id,
    }
  }

  /// A message that runs `step_kind` in an existing workflow.
  pub fn step(
    message_id: impl Into<String>,
    workflow_id: impl Into<String>,
    step_kind: impl Into<String>,
    client_id: impl Into<String>,
    chain_id: u64,
  ) -> Self {
    Self {
      message_id: message_id.into(),
      step_kind: step_kind.into(),
      target: MessageTarget::Workflow {
        workflow_id: workflow_id.into(),
      },
      client_id: client_id.into(),
      chain_id,
    }
  }

  /// The workflow this message continues, if it is not an init message.
  pub fn workflow_id(&self) -> Option<&str> {
    match &self.target {
      MessageTarget::Workflow { workflow_id } => Some(workflow_id),
      MessageTarget::Start { .. } => None,
    }
  }

  pub fn to_json(&self) -> Result<String, QueueError> {
    Ok(serde_json::to_string(self)?)
  }

  /// Parse and validate a message body.
  pub fn from_json(body: &str) -> Result<Self, QueueError> {
    let wire: WireMessage = serde_json::from_str(body)?;
    Self::try_from(wire)
  }
}

/// A step message as it appears on the wire.
///
/// ```json
/// { "messageId": "m-1", "stepKind": "checkStakeStatus", "workflowId": "wf-1",
///   "clientId": "client-a", "chainId": 3 }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub step_kind: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub workflow_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub workflow_kind: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub request_params: Option<serde_json::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub client_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub chain_id: Option<u64>,
}

fn required(field: Option<String>, name: &str) -> Result<String, QueueError> {
  match field {
    Some(value) if !value.is_empty() => Ok(value),
    _ => Err(QueueError::Invalid(format!("{name} is required"))),
  }
}

impl TryFrom<WireMessage> for StepMessage {
  type Error = QueueError;

  fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
    let step_kind = required(wire.step_kind, "stepKind")?;
    let message_id = required(wire.message_id, "messageId")?;
    let client_id = required(wire.client_id, "clientId")?;
    let chain_id = wire
      .chain_id
      .ok_or_else(|| QueueError::Invalid("chainId is required".to_string()))?;

    let target = match (wire.workflow_id, wire.workflow_kind, wire.request_params) {
      (Some(workflow_id), None, None) => MessageTarget::Workflow { workflow_id },
      (None, Some(workflow_kind), Some(request_params)) => MessageTarget::Start {
        workflow_kind,
        request_params,
      },
      (Some(_), _, _) => {
        return Err(QueueError::Invalid(
          "workflowId cannot be combined with workflowKind or requestParams".to_string(),
        ));
      }
      (None, _, _) => {
        return Err(QueueError::Invalid(
          "either workflowId or both workflowKind and requestParams are required".to_string(),
        ));
      }
    };

    Ok(Self {
      message_id,
      step_kind,
      target,
      client_id,
      chain_id,
    })
  }
}

impl From<StepMessage> for WireMessage {
  fn from(message: StepMessage) -> Self {
    let (workflow_id, workflow_kind, request_params) = match message.target {
      MessageTarget::Workflow { workflow_id } => (Some(workflow_id), None, None),
      MessageTarget::Start {
        workflow_kind,
        request_params,
      } => (None, Some(workflow_kind), Some(request_params)),
    };
    Self {
      message_id: Some(message.message_id),
      step_kind: Some(message.step_kind),
      workflow_id,
      workflow_kind,
      request_params,
      client_id: Some(message.client_id),
      chain_id: Some(message.chain_id),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_existing_workflow_message() {
    let message = StepMessage::from_json(
      r#"{"messageId":"m-1","stepKind":"checkStakeStatus","workflowId":"wf-1","clientId":"c","chainId":3}"#,
    )
    .unwrap();

    assert_eq!(message.workflow_id(), Some("wf-1"));
    assert_eq!(message.step_kind, "checkStakeStatus");
    assert_eq!(message.chain_id, 3);
  }

  #[test]
  fn test_parse_start_message() {
    let body = json!({
      "messageId": "m-2",
      "stepKind": "stakeInit",
      "workflowKind": "simple-stake",
      "requestParams": {"amount": "5"},
      "clientId": "c",
      "chainId": 3
    });

    let message = StepMessage::from_json(&body.to_string()).unwrap();
    assert_eq!(message.workflow_id(), None);
    assert!(matches!(
      message.target,
      MessageTarget::Start { ref workflow_kind, .. } if workflow_kind == "simple-stake"
    ));
  }

  #[test]
  fn test_step_kind_required() {
    let result = StepMessage::from_json(r#"{"messageId":"m","workflowId":"wf","clientId":"c","chainId":3}"#);
    assert!(matches!(result, Err(QueueError::Invalid(msg)) if msg.contains("stepKind")));
  }

  #[test]
  fn test_exactly_one_target() {
    let both = WireMessage {
      message_id: Some("m".into()),
      step_kind: Some("s".into()),
      workflow_id: Some("wf".into()),
      workflow_kind: Some("k".into()),
      request_params: Some(json!({})),
      client_id: Some("c".into()),
      chain_id: Some(3),
    };
    assert!(StepMessage::try_from(both).is_err());

    let kind_without_params = WireMessage {
      message_id: Some("m".into()),
      step_kind: Some("s".into()),
      workflow_kind: Some("k".into()),
      client_id: Some("c".into()),
      chain_id: Some(3),
      ..Default::default()
    };
    assert!(StepMessage::try_from(kind_without_params).is_err());
  }

  #[test]
  fn test_serialized_form_uses_wire_shape() {
    let message = StepMessage::step("m-1", "wf-1", "confirmStake", "c", 1409);
    let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();

    assert_eq!(value["workflowId"], "wf-1");
    assert_eq!(value["chainId"], 1409);
    assert!(value.get("workflowKind").is_none());
  }
}
