//! Shared identifier types used across the saga crates.

mod types;

pub use types::{SagaId, Version};
