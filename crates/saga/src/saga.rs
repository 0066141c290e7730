//! The saga data object and its state transitions.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::SagaId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SagaError};
use crate::result_tree::ResultTree;
use crate::state::{SagaStatus, StepStatus};
use crate::step::{
    CompensationEntry, CompensationStep, PendingStep, SagaStep, StepDefinition,
    UnresolvedCompensation,
};
use crate::template::TemplateResolver;

/// Characters a step id may not contain, since ids are embedded in
/// dotted template paths.
const RESERVED_ID_CHARS: [char; 3] = ['.', '{', '}'];

/// A multi-step operation and its execution state.
///
/// `Saga` is a plain value: every transition is a method on it, and the
/// orchestrator only adds lookup, persistence and metrics around them. A
/// failed transition leaves the saga unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Saga {
    id: SagaId,
    #[serde(rename = "type")]
    saga_type: String,
    steps: Vec<SagaStep>,
    status: SagaStatus,
    current_step_index: usize,
    results: ResultTree,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Saga {
    /// Builds a new saga with every step pending.
    ///
    /// Fails if the step list is empty, a step id repeats, or a step id is
    /// empty or contains `.`, `{` or `}`.
    pub fn new(saga_type: impl Into<String>, definitions: Vec<StepDefinition>) -> Result<Self> {
        validate(&definitions)?;

        let now = Utc::now();
        Ok(Self {
            id: SagaId::new(),
            saga_type: saga_type.into(),
            steps: definitions.into_iter().map(SagaStep::from).collect(),
            status: SagaStatus::Created,
            current_step_index: 0,
            results: ResultTree::new(),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Records `result` for the current step and advances.
    ///
    /// Returns true if that was the last step and the saga is now complete.
    pub fn execute_step(&mut self, result: Value) -> Result<bool> {
        let index = self.current_step_index;
        if !self.status.can_advance() || index >= self.steps.len() {
            return Err(self.already_terminal());
        }

        let step = &mut self.steps[index];
        self.results.record(step.step_id(), result.clone())?;
        step.status = StepStatus::Executed;
        step.result = Some(result);

        self.current_step_index += 1;
        self.status = if self.current_step_index == self.steps.len() {
            SagaStatus::Completed
        } else {
            SagaStatus::InProgress
        };
        self.touch();

        Ok(self.status == SagaStatus::Completed)
    }

    /// Marks the current step and the saga as failed.
    ///
    /// Failing an already failed saga is a no-op that keeps the first reason.
    pub fn fail_step(&mut self, error: impl Into<String>) -> Result<()> {
        match self.status {
            SagaStatus::Completed | SagaStatus::Compensated => Err(self.already_terminal()),
            SagaStatus::Failed => {
                tracing::debug!(saga_id = %self.id, "saga already failed, ignoring");
                Ok(())
            }
            SagaStatus::Created | SagaStatus::InProgress => {
                let error = error.into();
                if let Some(step) = self.steps.get_mut(self.current_step_index) {
                    step.status = StepStatus::Failed;
                    step.error = Some(error.clone());
                }
                self.failure_reason = Some(error);
                self.status = SagaStatus::Failed;
                self.touch();
                Ok(())
            }
        }
    }

    /// Returns the step awaiting execution with its payload resolved, or
    /// `None` once the saga can no longer move forward.
    pub fn next_step(&self) -> Result<Option<PendingStep>> {
        if !self.status.can_advance() {
            return Ok(None);
        }
        let Some(step) = self.current_step() else {
            return Ok(None);
        };

        let payload = TemplateResolver::new(&self.results).resolve(step.payload())?;
        Ok(Some(PendingStep {
            step_id: step.step_id().to_string(),
            service: step.service().to_string(),
            action: step.action().to_string(),
            payload,
        }))
    }

    /// Builds the compensation plan for a failed saga.
    ///
    /// Executed steps are returned last-executed first, each with its
    /// compensation payload resolved. Executed steps that declare no
    /// compensation are skipped with a warning. Nothing is mutated.
    ///
    /// Fails on the first payload that cannot be resolved; use
    /// [`compensations`](Self::compensations) to keep the resolvable ones.
    pub fn compensation_plan(&self) -> Result<Vec<CompensationStep>> {
        self.compensations()?
            .into_iter()
            .map(|entry| entry.map_err(|unresolved| SagaError::Template(unresolved.error)))
            .collect()
    }

    /// Same order as [`compensation_plan`](Self::compensation_plan), but a
    /// payload that cannot be resolved only spoils its own entry.
    pub fn compensations(&self) -> Result<Vec<CompensationEntry>> {
        if !self.status.can_compensate() {
            return Err(SagaError::InvalidState {
                expected: SagaStatus::Failed.as_str(),
                actual: self.status,
            });
        }

        let mut entries = Vec::new();
        for step in self
            .steps
            .iter()
            .rev()
            .filter(|step| step.status() == StepStatus::Executed)
        {
            let Some(compensation) = step.compensation() else {
                tracing::warn!(
                    saga_id = %self.id,
                    step_id = step.step_id(),
                    "executed step has no compensation, its side effects stand"
                );
                continue;
            };

            let entry = match TemplateResolver::anchored_at(&self.results, step.step_id())
                .resolve(&compensation.payload)
            {
                Ok(payload) => Ok(CompensationStep {
                    step_id: step.step_id().to_string(),
                    service: step.service().to_string(),
                    action: compensation.action.clone(),
                    payload,
                }),
                Err(error) => Err(UnresolvedCompensation {
                    step_id: step.step_id().to_string(),
                    service: step.service().to_string(),
                    action: compensation.action.clone(),
                    error,
                }),
            };
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Closes out a failed saga once its compensations were attempted.
    ///
    /// Executed steps that declared a compensation move to `COMPENSATED`
    /// whether or not the caller's attempt succeeded. Calling this again on a
    /// compensated saga is a no-op.
    pub fn mark_compensated(&mut self) -> Result<()> {
        match self.status {
            SagaStatus::Compensated => Ok(()),
            SagaStatus::Failed => {
                for step in &mut self.steps {
                    if step.status == StepStatus::Executed && step.compensation().is_some() {
                        step.status = StepStatus::Compensated;
                    }
                }
                self.status = SagaStatus::Compensated;
                self.touch();
                Ok(())
            }
            actual => Err(SagaError::InvalidState {
                expected: SagaStatus::Failed.as_str(),
                actual,
            }),
        }
    }

    fn already_terminal(&self) -> SagaError {
        SagaError::AlreadyTerminal {
            saga_id: self.id,
            status: self.status,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// Query methods
impl Saga {
    pub fn id(&self) -> SagaId {
        self.id
    }

    /// Label of the business operation, e.g. `USER_REGISTRATION`.
    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    pub fn status(&self) -> SagaStatus {
        self.status
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[SagaStep] {
        &self.steps
    }

    /// Index of the step awaiting execution; equals the step count once complete.
    pub fn current_step_index(&self) -> usize {
        self.current_step_index
    }

    /// The step awaiting execution, if any.
    pub fn current_step(&self) -> Option<&SagaStep> {
        self.steps.get(self.current_step_index)
    }

    pub fn results(&self) -> &ResultTree {
        &self.results
    }

    /// Error message of the failed step, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Wall-clock time between creation and the last transition.
    pub fn elapsed_seconds(&self) -> f64 {
        (self.updated_at - self.created_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or_default()
    }
}

fn validate(definitions: &[StepDefinition]) -> Result<()> {
    if definitions.is_empty() {
        return Err(SagaError::InvalidDefinition(
            "saga must contain at least one step".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(definitions.len());
    for definition in definitions {
        let step_id = definition.step_id.as_str();
        if step_id.is_empty() {
            return Err(SagaError::InvalidDefinition(
                "step id must not be empty".to_string(),
            ));
        }
        if step_id.contains(RESERVED_ID_CHARS) {
            return Err(SagaError::InvalidDefinition(format!(
                "step id '{step_id}' contains a reserved character"
            )));
        }
        if !seen.insert(step_id) {
            return Err(SagaError::InvalidDefinition(format!(
                "duplicate step id '{step_id}'"
            )));
        }
    }

    Ok(())
}
