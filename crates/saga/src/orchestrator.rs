//! Saga orchestrator: the public API for driving sagas by id.

use common::{SagaId, Version};
use serde_json::Value;

use crate::error::{Result, SagaError};
use crate::repository::{InMemorySagaRepository, SagaRepository};
use crate::saga::Saga;
use crate::state::SagaStatus;
use crate::step::{CompensationEntry, CompensationStep, PendingStep, StepDefinition};

/// Outcome of reporting a step as executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    /// True if that was the last step.
    pub completed: bool,
    /// Index of the next step to run; equals the step count once complete.
    pub current_step_index: usize,
}

/// Creates sagas and applies the caller's step reports to them.
///
/// The orchestrator does no I/O of its own and never starts compensation on
/// its own initiative: the caller runs each step's remote action, reports the
/// outcome, and on failure asks for and executes the compensation plan.
///
/// Each call is a short synchronous transition: load, apply, save with a
/// version check. Concurrent reports against the same saga cannot both win;
/// the loser gets [`SagaError::ConcurrencyConflict`]. Calls against
/// different sagas are independent.
#[derive(Debug, Clone)]
pub struct SagaOrchestrator<R = InMemorySagaRepository> {
    repository: R,
}

impl SagaOrchestrator<InMemorySagaRepository> {
    /// Creates an orchestrator backed by an in-memory repository.
    pub fn in_memory() -> Self {
        Self::new(InMemorySagaRepository::new())
    }
}

impl Default for SagaOrchestrator<InMemorySagaRepository> {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl<R: SagaRepository> SagaOrchestrator<R> {
    /// Creates an orchestrator over the given repository.
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    /// Returns the underlying repository.
    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Validates the step list and stores a new saga with every step pending.
    #[tracing::instrument(skip(self, steps), fields(step_count = steps.len()))]
    pub fn create_saga(&self, saga_type: &str, steps: Vec<StepDefinition>) -> Result<SagaId> {
        let saga = Saga::new(saga_type, steps)?;
        let saga_id = saga.id();
        self.repository.insert(saga)?;

        metrics::counter!("saga_created_total").increment(1);
        tracing::info!(%saga_id, "saga created");
        Ok(saga_id)
    }

    /// Records the current step's result and advances the saga.
    #[tracing::instrument(skip(self, result))]
    pub fn execute_step(&self, saga_id: SagaId, result: Value) -> Result<StepOutcome> {
        let (outcome, step_id, elapsed) = self.update(saga_id, |saga| {
            let step_id = saga
                .current_step()
                .map(|step| step.step_id().to_string())
                .unwrap_or_default();
            let completed = saga.execute_step(result)?;
            let outcome = StepOutcome {
                completed,
                current_step_index: saga.current_step_index(),
            };
            Ok((outcome, step_id, saga.elapsed_seconds()))
        })?;

        metrics::counter!("saga_steps_executed_total").increment(1);
        tracing::info!(%saga_id, %step_id, "saga step executed");

        if outcome.completed {
            metrics::counter!("saga_completed_total").increment(1);
            metrics::histogram!("saga_duration_seconds").record(elapsed);
            tracing::info!(%saga_id, duration = elapsed, "saga completed");
        }

        Ok(outcome)
    }

    /// Marks the current step and the saga as failed.
    #[tracing::instrument(skip(self))]
    pub fn fail_step(&self, saga_id: SagaId, error_message: &str) -> Result<()> {
        let newly_failed = self.update_if_changed(saga_id, |saga| {
            let was_running = saga.status().can_advance();
            let step_id = saga.current_step().map(|step| step.step_id().to_string());
            saga.fail_step(error_message)?;
            Ok(was_running.then_some(step_id).flatten())
        })?;

        if let Some(step_id) = newly_failed {
            metrics::counter!("saga_failed_total").increment(1);
            tracing::warn!(%saga_id, %step_id, error = error_message, "saga step failed");
        }

        Ok(())
    }

    /// Returns the compensation plan of a failed saga, last-executed step first.
    ///
    /// Payloads come back resolved. The saga itself is not modified.
    #[tracing::instrument(skip(self))]
    pub fn compensate(&self, saga_id: SagaId) -> Result<Vec<CompensationStep>> {
        let (saga, _) = self.load(saga_id)?;
        let plan = saga.compensation_plan()?;

        tracing::info!(%saga_id, steps = plan.len(), "compensation plan computed");
        Ok(plan)
    }

    /// Returns the compensation plan of a failed saga, keeping entries whose
    /// payload could not be resolved as errors in place.
    #[tracing::instrument(skip(self))]
    pub fn compensations(&self, saga_id: SagaId) -> Result<Vec<CompensationEntry>> {
        let (saga, _) = self.load(saga_id)?;
        let entries = saga.compensations()?;

        let unresolved = entries.iter().filter(|entry| entry.is_err()).count();
        tracing::info!(%saga_id, steps = entries.len(), unresolved, "compensation plan computed");
        Ok(entries)
    }

    /// Closes out a failed saga after the caller attempted its compensations.
    ///
    /// Individual compensation failures do not matter here; repeating the
    /// call on a compensated saga succeeds without effect.
    #[tracing::instrument(skip(self))]
    pub fn mark_compensated(&self, saga_id: SagaId) -> Result<()> {
        let transition = self.update_if_changed(saga_id, |saga| {
            let was_failed = saga.status() == SagaStatus::Failed;
            saga.mark_compensated()?;
            Ok(was_failed.then(|| saga.elapsed_seconds()))
        })?;

        if let Some(elapsed) = transition {
            metrics::counter!("saga_compensated_total").increment(1);
            metrics::histogram!("saga_duration_seconds").record(elapsed);
            tracing::info!(%saga_id, duration = elapsed, "saga compensated");
        }

        Ok(())
    }

    /// Returns the step awaiting execution with its payload resolved.
    ///
    /// `None` once the saga completed or failed.
    pub fn next_step(&self, saga_id: SagaId) -> Result<Option<PendingStep>> {
        let (saga, _) = self.load(saga_id)?;
        saga.next_step()
    }

    /// Returns a snapshot of a saga.
    pub fn get_saga(&self, saga_id: SagaId) -> Result<Saga> {
        self.load(saga_id).map(|(saga, _)| saga)
    }

    /// Removes a saga that reached `COMPLETED` or `COMPENSATED` and returns
    /// its final state.
    #[tracing::instrument(skip(self))]
    pub fn archive(&self, saga_id: SagaId) -> Result<Saga> {
        let (saga, _) = self.load(saga_id)?;
        if !saga.status().is_terminal() {
            return Err(SagaError::InvalidState {
                expected: "COMPLETED or COMPENSATED",
                actual: saga.status(),
            });
        }

        let saga = self
            .repository
            .remove(saga_id)?
            .ok_or(SagaError::NotFound(saga_id))?;
        tracing::debug!(%saga_id, status = %saga.status(), "saga archived");
        Ok(saga)
    }

    fn load(&self, saga_id: SagaId) -> Result<(Saga, Version)> {
        self.repository
            .load(saga_id)?
            .ok_or(SagaError::NotFound(saga_id))
    }

    /// Applies `transition` to a fresh copy of the saga and writes it back.
    /// Nothing is written if the transition fails.
    fn update<T>(
        &self,
        saga_id: SagaId,
        transition: impl FnOnce(&mut Saga) -> Result<T>,
    ) -> Result<T> {
        let (mut saga, version) = self.load(saga_id)?;
        let output = transition(&mut saga)?;
        self.repository.save(saga, version)?;
        Ok(output)
    }

    /// Like [`update`](Self::update), but a transition returning `None` left
    /// the saga as it was and nothing is written, so the version stays put.
    fn update_if_changed<T>(
        &self,
        saga_id: SagaId,
        transition: impl FnOnce(&mut Saga) -> Result<Option<T>>,
    ) -> Result<Option<T>> {
        let (mut saga, version) = self.load(saga_id)?;
        let Some(output) = transition(&mut saga)? else {
            return Ok(None);
        };
        self.repository.save(saga, version)?;
        Ok(Some(output))
    }
}
