//! Drives a saga end to end over a [`MessageClient`].
//!
//! This is the business-logic side of the orchestrator contract: it performs
//! each step's remote call, reports the outcome, and on failure runs the
//! compensation plan.
//!
//! Compensation is best effort and at-least-once, not exactly-once. A
//! compensation that fails is logged and recorded, the remaining ones still
//! run, and the saga is marked compensated regardless. Remote services must
//! therefore treat compensating actions as idempotent, and anything listed
//! in the `failed_compensations` of [`RunError::RolledBack`] needs
//! out-of-band repair.

use std::sync::Arc;
use std::time::Duration;

use common::SagaId;
use serde_json::{Value, json};
use thiserror::Error;

use crate::error::SagaError;
use crate::messaging::{MessageClient, MessagingError};
use crate::orchestrator::SagaOrchestrator;
use crate::repository::{InMemorySagaRepository, SagaRepository};
use crate::saga::Saga;
use crate::step::StepDefinition;
use crate::template::TemplateError;

/// Deadline for a single remote call.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Event emitted after a saga completes.
pub const EVENT_COMPLETED: &str = "saga.completed";

/// Event emitted after a failed saga was compensated.
pub const EVENT_COMPENSATED: &str = "saga.compensated";

/// Runner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    pub remote_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }
}

/// Why a compensating action was not applied.
#[derive(Debug, Error)]
pub enum CompensationFailure {
    /// The remote call failed or timed out.
    #[error(transparent)]
    Remote(#[from] MessagingError),

    /// The payload could not be resolved, so nothing was sent.
    #[error(transparent)]
    Payload(#[from] TemplateError),
}

/// A compensating action that could not be applied.
#[derive(Debug, Error)]
#[error("Compensation '{action}' for step '{step_id}' failed")]
pub struct CompensationError {
    pub step_id: String,
    pub action: String,
    #[source]
    pub source: CompensationFailure,
}

/// Errors returned to whoever started the business operation.
#[derive(Debug, Error)]
pub enum RunError {
    /// A step failed and the executed steps were compensated.
    ///
    /// The message names only the operation. Step ids and transport errors
    /// stay in the fields for logging.
    #[error("{operation} could not be completed and was rolled back")]
    RolledBack {
        operation: String,
        saga_id: SagaId,
        failed_compensations: Vec<CompensationError>,
    },

    /// The orchestrator was driven incorrectly or the saga is malformed.
    #[error(transparent)]
    Saga(#[from] SagaError),
}

/// Runs sagas against remote services.
pub struct SagaRunner<C, R = InMemorySagaRepository> {
    orchestrator: Arc<SagaOrchestrator<R>>,
    client: C,
    config: RunnerConfig,
}

impl<C, R> SagaRunner<C, R>
where
    C: MessageClient,
    R: SagaRepository,
{
    /// Creates a runner sharing `orchestrator` with other callers.
    pub fn new(orchestrator: Arc<SagaOrchestrator<R>>, client: C, config: RunnerConfig) -> Self {
        Self {
            orchestrator,
            client,
            config,
        }
    }

    /// Returns the orchestrator this runner reports to.
    pub fn orchestrator(&self) -> &SagaOrchestrator<R> {
        &self.orchestrator
    }

    /// Creates a saga and executes it step by step.
    ///
    /// Returns the completed saga. If a remote call fails or times out, the
    /// step is failed, the executed steps are compensated in reverse order and
    /// [`RunError::RolledBack`] is returned.
    #[tracing::instrument(skip(self, steps), fields(step_count = steps.len()))]
    pub async fn run(
        &self,
        saga_type: &str,
        steps: Vec<StepDefinition>,
    ) -> Result<Saga, RunError> {
        let saga_id = self.orchestrator.create_saga(saga_type, steps)?;

        loop {
            let step = match self.orchestrator.next_step(saga_id) {
                Ok(Some(step)) => step,
                Ok(None) => break,
                Err(error @ SagaError::Template(_)) => {
                    // Undo what already ran, then surface the broken template.
                    self.orchestrator.fail_step(saga_id, &error.to_string())?;
                    self.roll_back(saga_id).await?;
                    return Err(error.into());
                }
                Err(error) => return Err(error.into()),
            };

            tracing::debug!(
                %saga_id,
                step_id = %step.step_id,
                service = %step.service,
                action = %step.action,
                "dispatching saga step"
            );

            match self.call(&step.service, &step.action, step.payload).await {
                Ok(result) => {
                    self.orchestrator.execute_step(saga_id, result)?;
                }
                Err(error) => {
                    self.orchestrator.fail_step(saga_id, &error.to_string())?;
                    let failed_compensations = self.roll_back(saga_id).await?;
                    self.notify(EVENT_COMPENSATED, saga_id, saga_type).await;

                    return Err(RunError::RolledBack {
                        operation: saga_type.to_string(),
                        saga_id,
                        failed_compensations,
                    });
                }
            }
        }

        let saga = self.orchestrator.get_saga(saga_id)?;
        self.notify(EVENT_COMPLETED, saga_id, saga_type).await;
        Ok(saga)
    }

    /// Runs the compensation plan of a failed saga and marks it compensated.
    ///
    /// An entry whose payload cannot be resolved is recorded as failed and
    /// skipped; the others are still sent.
    async fn roll_back(&self, saga_id: SagaId) -> Result<Vec<CompensationError>, SagaError> {
        let entries = self.orchestrator.compensations(saga_id)?;

        let mut failures = Vec::new();
        for entry in entries {
            let step = match entry {
                Ok(step) => step,
                Err(unresolved) => {
                    metrics::counter!("saga_compensation_failures_total").increment(1);
                    tracing::error!(
                        %saga_id,
                        step_id = %unresolved.step_id,
                        action = %unresolved.action,
                        error = %unresolved.error,
                        "compensation payload unresolvable, continuing with remaining steps"
                    );
                    failures.push(CompensationError {
                        step_id: unresolved.step_id,
                        action: unresolved.action,
                        source: unresolved.error.into(),
                    });
                    continue;
                }
            };

            match self.call(&step.service, &step.action, step.payload).await {
                Ok(_) => {
                    tracing::info!(
                        %saga_id,
                        step_id = %step.step_id,
                        action = %step.action,
                        "compensation applied"
                    );
                }
                Err(source) => {
                    metrics::counter!("saga_compensation_failures_total").increment(1);
                    tracing::error!(
                        %saga_id,
                        step_id = %step.step_id,
                        action = %step.action,
                        error = %source,
                        "compensation failed, continuing with remaining steps"
                    );
                    failures.push(CompensationError {
                        step_id: step.step_id,
                        action: step.action,
                        source: source.into(),
                    });
                }
            }
        }

        self.orchestrator.mark_compensated(saga_id)?;
        Ok(failures)
    }

    /// Sends one request, bounded by `remote_timeout` even if the client
    /// ignores its own timeout argument.
    async fn call(
        &self,
        service: &str,
        action: &str,
        payload: Value,
    ) -> Result<Value, MessagingError> {
        let timeout = self.config.remote_timeout;
        tokio::time::timeout(timeout, self.client.send(service, action, payload, timeout))
            .await
            .unwrap_or_else(|_| {
                Err(MessagingError::Timeout {
                    service: service.to_string(),
                    action: action.to_string(),
                    timeout,
                })
            })
    }

    async fn notify(&self, event: &str, saga_id: SagaId, saga_type: &str) {
        let payload = json!({ "sagaId": saga_id, "type": saga_type });
        if let Err(error) = self.client.emit(event, payload).await {
            tracing::warn!(%saga_id, event, %error, "saga notification not delivered");
        }
    }
}
