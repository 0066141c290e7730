//! Step definitions and the views handed back to callers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::StepStatus;
use crate::template::TemplateError;

/// How to undo a step: an action on the step's service plus its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationDefinition {
    pub action: String,
    /// May contain placeholders; `result` refers to the step being undone.
    #[serde(default = "empty_payload")]
    pub payload: Value,
}

/// Caller-supplied description of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    /// Unique within the saga; key in the result tree.
    pub step_id: String,
    pub service: String,
    pub action: String,
    /// May contain placeholders; `result` refers to the previous step.
    #[serde(default = "empty_payload")]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationDefinition>,
}

impl StepDefinition {
    /// Creates a step with an empty payload and no compensation.
    pub fn new(
        step_id: impl Into<String>,
        service: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            service: service.into(),
            action: action.into(),
            payload: empty_payload(),
            compensation: None,
        }
    }

    /// Sets the forward payload.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Declares how to undo this step.
    pub fn with_compensation(mut self, action: impl Into<String>, payload: Value) -> Self {
        self.compensation = Some(CompensationDefinition {
            action: action.into(),
            payload,
        });
        self
    }
}

/// A step as tracked inside a saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaStep {
    step_id: String,
    service: String,
    action: String,
    payload: Value,
    compensation: Option<CompensationDefinition>,
    pub(crate) status: StepStatus,
    pub(crate) result: Option<Value>,
    pub(crate) error: Option<String>,
}

impl From<StepDefinition> for SagaStep {
    fn from(definition: StepDefinition) -> Self {
        Self {
            step_id: definition.step_id,
            service: definition.service,
            action: definition.action,
            payload: definition.payload,
            compensation: definition.compensation,
            status: StepStatus::Pending,
            result: None,
            error: None,
        }
    }
}

impl SagaStep {
    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    /// The unresolved forward payload.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn compensation(&self) -> Option<&CompensationDefinition> {
        self.compensation.as_ref()
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    /// Result recorded when the step executed.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Error message recorded when the step failed.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// The step awaiting execution, with its payload already resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingStep {
    pub step_id: String,
    pub service: String,
    pub action: String,
    pub payload: Value,
}

/// One entry of a compensation plan, ready to send as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationStep {
    pub step_id: String,
    /// Service that owns the step, and therefore its compensation.
    pub service: String,
    pub action: String,
    pub payload: Value,
}

/// A compensation whose payload template could not be resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedCompensation {
    pub step_id: String,
    pub service: String,
    pub action: String,
    pub error: TemplateError,
}

/// One entry of a best-effort compensation plan.
pub type CompensationEntry = std::result::Result<CompensationStep, UnresolvedCompensation>;

fn empty_payload() -> Value {
    Value::Object(serde_json::Map::new())
}
