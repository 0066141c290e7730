//! Saga orchestration for operations that span independently owned services.
//!
//! A saga is an ordered list of steps, each naming a remote action. The
//! caller runs each action itself and reports the outcome; the orchestrator
//! tracks progress, threads earlier results into later payloads through
//! `{{...}}` templates, and on failure produces the reverse-order
//! compensation plan for the steps that already executed.
//!
//! ```text
//! create_saga ─► next_step ─► (remote call) ─┬─► execute_step ─► next_step ...
//!                                            └─► fail_step ─► compensate ─► mark_compensated
//! ```
//!
//! [`SagaRunner`] wires that loop to a [`MessageClient`].

pub mod error;
pub mod messaging;
pub mod orchestrator;
pub mod repository;
pub mod result_tree;
pub mod runner;
pub mod saga;
pub mod state;
pub mod step;
pub mod template;
pub mod user_registration;

pub use common::{SagaId, Version};
pub use error::SagaError;
pub use messaging::{InMemoryMessageBus, MessageClient, MessagingError};
pub use orchestrator::{SagaOrchestrator, StepOutcome};
pub use repository::{InMemorySagaRepository, SagaRepository};
pub use result_tree::{ResultTree, ResultTreeError};
pub use runner::{CompensationError, CompensationFailure, RunError, RunnerConfig, SagaRunner};
pub use saga::Saga;
pub use state::{SagaStatus, StepStatus};
pub use step::{
    CompensationDefinition, CompensationEntry, CompensationStep, PendingStep, SagaStep,
    StepDefinition, UnresolvedCompensation,
};
pub use template::{TemplateError, TemplateResolver, literal};
