//! Append-only store of step outputs.
//!
//! Results are keyed by step id and addressed with dotted paths:
//! `steps.<stepId>.result.<field>...` names a specific step, and
//! `result.<field>...` names the anchor step (by default the most recently
//! recorded one). Segments after the root walk objects by key and arrays by
//! decimal index.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised by [`ResultTree`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResultTreeError {
    /// A result was already recorded under this step id.
    #[error("Result for step '{step_id}' is already recorded")]
    DuplicateStepResult { step_id: String },

    /// Some segment of the path does not exist.
    #[error("Unresolved reference: {path}")]
    UnresolvedReference { path: String },
}

/// Per-saga store of step results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultTree {
    results: BTreeMap<String, Value>,
    /// Step ids in recording order.
    order: Vec<String>,
}

impl ResultTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `result` under `step_id`. Existing entries are never overwritten.
    pub fn record(
        &mut self,
        step_id: impl Into<String>,
        result: Value,
    ) -> Result<(), ResultTreeError> {
        let step_id = step_id.into();
        if self.results.contains_key(&step_id) {
            return Err(ResultTreeError::DuplicateStepResult { step_id });
        }
        self.order.push(step_id.clone());
        self.results.insert(step_id, result);
        Ok(())
    }

    /// Returns the raw result recorded for a step.
    pub fn get(&self, step_id: &str) -> Option<&Value> {
        self.results.get(step_id)
    }

    /// Returns the id of the most recently recorded step.
    pub fn latest(&self) -> Option<&str> {
        self.order.last().map(String::as_str)
    }

    /// Returns step ids in the order their results were recorded.
    pub fn step_ids(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Returns the number of recorded results.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Resolves a dotted path, binding the `result` root to the latest step.
    pub fn lookup(&self, path: &str) -> Result<&Value, ResultTreeError> {
        self.lookup_anchored(path, self.latest())
    }

    /// Resolves a dotted path, binding the `result` root to `anchor`.
    pub fn lookup_from(&self, anchor: &str, path: &str) -> Result<&Value, ResultTreeError> {
        self.lookup_anchored(path, Some(anchor))
    }

    fn lookup_anchored(
        &self,
        path: &str,
        anchor: Option<&str>,
    ) -> Result<&Value, ResultTreeError> {
        let unresolved = || ResultTreeError::UnresolvedReference {
            path: path.to_string(),
        };

        let mut segments = path.split('.');
        let root = match segments.next() {
            Some("steps") => {
                let step_id = segments.next().ok_or_else(unresolved)?;
                if segments.next() != Some("result") {
                    return Err(unresolved());
                }
                self.results.get(step_id).ok_or_else(unresolved)?
            }
            Some("result") => anchor
                .and_then(|step_id| self.results.get(step_id))
                .ok_or_else(unresolved)?,
            _ => return Err(unresolved()),
        };

        segments.try_fold(root, |current, segment| {
            descend(current, segment).ok_or_else(unresolved)
        })
    }
}

fn descend<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}
