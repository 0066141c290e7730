//! Placeholder substitution in step payloads.
//!
//! A payload is any JSON document. String values may carry `{{path}}`
//! placeholders that are looked up in a [`ResultTree`]. A string made of a
//! single placeholder is replaced by the referenced value as-is, so numbers
//! and objects keep their type. Placeholders inside longer strings are
//! interpolated as text. Object keys are never rewritten.
//!
//! Caller-supplied text that must not be scanned is wrapped with [`literal`]:
//! an object whose only key is `$literal` resolves to the wrapped value
//! unchanged, so `{{` inside it is plain text.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::result_tree::{ResultTree, ResultTreeError};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Key of the wrapper produced by [`literal`].
pub const LITERAL_KEY: &str = "$literal";

/// Wraps `value` so the resolver passes it through verbatim.
///
/// Use it for caller-supplied text placed in a payload; without it a `{{`
/// in that text is read as a placeholder.
pub fn literal(value: impl Into<Value>) -> Value {
    let mut wrapper = Map::with_capacity(1);
    wrapper.insert(LITERAL_KEY.to_string(), value.into());
    Value::Object(wrapper)
}

/// Errors raised while resolving a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// A placeholder names a value the result tree does not hold.
    #[error("Cannot resolve template reference '{path}'")]
    Unresolved {
        path: String,
        #[source]
        source: ResultTreeError,
    },

    /// An opening `{{` has no matching `}}`, or the placeholder is empty.
    #[error("Malformed template: {template}")]
    Malformed { template: String },
}

/// Resolves payload templates against one saga's result tree.
///
/// Resolution never mutates anything, so the same payload resolved twice
/// against an unchanged tree always yields the same document.
#[derive(Debug, Clone, Copy)]
pub struct TemplateResolver<'a> {
    tree: &'a ResultTree,
    anchor: Option<&'a str>,
}

impl<'a> TemplateResolver<'a> {
    /// Resolver whose `result` root is the most recently executed step.
    pub fn new(tree: &'a ResultTree) -> Self {
        Self {
            tree,
            anchor: tree.latest(),
        }
    }

    /// Resolver whose `result` root is `step_id`.
    ///
    /// Used for compensation payloads, where `result` means the output of the
    /// step being undone.
    pub fn anchored_at(tree: &'a ResultTree, step_id: &'a str) -> Self {
        Self {
            tree,
            anchor: Some(step_id),
        }
    }

    /// Returns a copy of `payload` with every placeholder substituted.
    ///
    /// Fails on the first unresolvable placeholder; a partially substituted
    /// document is never returned.
    pub fn resolve(&self, payload: &Value) -> Result<Value, TemplateError> {
        match payload {
            Value::String(s) => self.resolve_str(s),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) if map.len() == 1 && map.contains_key(LITERAL_KEY) => {
                Ok(map[LITERAL_KEY].clone())
            }
            Value::Object(map) => map
                .iter()
                .map(|(key, value)| self.resolve(value).map(|v| (key.clone(), v)))
                .collect::<Result<Map<_, _>, _>>()
                .map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    fn resolve_str(&self, template: &str) -> Result<Value, TemplateError> {
        if !template.contains(OPEN) {
            return Ok(Value::String(template.to_string()));
        }

        if let Some(inner) = template
            .strip_prefix(OPEN)
            .and_then(|rest| rest.strip_suffix(CLOSE))
            && !inner.contains(OPEN)
            && !inner.contains(CLOSE)
        {
            let path = placeholder_path(inner, template)?;
            return self.lookup(path).cloned();
        }

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find(OPEN) {
            out.push_str(&rest[..start]);
            let after_open = &rest[start + OPEN.len()..];
            let end = after_open
                .find(CLOSE)
                .ok_or_else(|| malformed(template))?;
            let path = placeholder_path(&after_open[..end], template)?;
            match self.lookup(path)? {
                Value::String(s) => out.push_str(s),
                value => out.push_str(&value.to_string()),
            }
            rest = &after_open[end + CLOSE.len()..];
        }
        out.push_str(rest);

        Ok(Value::String(out))
    }

    fn lookup(&self, path: &str) -> Result<&'a Value, TemplateError> {
        let found = match self.anchor {
            Some(anchor) => self.tree.lookup_from(anchor, path),
            None => self.tree.lookup(path),
        };
        found.map_err(|source| TemplateError::Unresolved {
            path: path.to_string(),
            source,
        })
    }
}

fn placeholder_path<'t>(inner: &'t str, template: &str) -> Result<&'t str, TemplateError> {
    let path = inner.trim();
    if path.is_empty() {
        return Err(malformed(template));
    }
    Ok(path)
}

fn malformed(template: &str) -> TemplateError {
    TemplateError::Malformed {
        template: template.to_string(),
    }
}
