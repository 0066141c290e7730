//! Request/response messaging used to run saga steps on remote services.

pub mod client;
pub mod memory;

pub use client::{MessageClient, MessagingError};
pub use memory::{EmittedEvent, InMemoryMessageBus, SentMessage};
