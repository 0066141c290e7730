//! Messaging client trait.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Failures of a remote call. All of them route the saga into `fail_step`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessagingError {
    /// No reply arrived within the deadline.
    #[error("{service}.{action} timed out after {}ms", .timeout.as_millis())]
    Timeout {
        service: String,
        action: String,
        timeout: Duration,
    },

    /// The remote service answered with an error.
    #[error("{service}.{action} failed: {message}")]
    Remote {
        service: String,
        action: String,
        message: String,
    },

    /// Nothing is listening for this action.
    #[error("no handler for {service}.{action}")]
    NoHandler { service: String, action: String },
}

/// Transport to the services that own saga steps.
#[async_trait]
pub trait MessageClient: Send + Sync {
    /// Sends a request and waits at most `timeout` for the reply.
    async fn send(
        &self,
        service: &str,
        action: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value, MessagingError>;

    /// Publishes a fire-and-forget event.
    async fn emit(&self, event: &str, payload: Value) -> Result<(), MessagingError>;
}
