//! `${step_id.field.path}` references between steps
//!
//! A string consisting of exactly one placeholder is replaced by the raw JSON
//! value (so numbers stay numbers). Placeholders embedded in a longer string
//! are interpolated as text.

use std::collections::BTreeMap;

use serde_json::Value;

/// Values captured from completed steps, keyed by step id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    captured: BTreeMap<String, Value>,
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the response body of a completed step.
    pub fn record(&mut self, step_id: impl Into<String>, body: Value) {
        self.captured.insert(step_id.into(), body);
    }

    #[must_use]
    pub fn get(&self, step_id: &str) -> Option<&Value> {
        self.captured.get(step_id)
    }

    #[must_use]
    pub fn contains(&self, step_id: &str) -> bool {
        self.captured.contains_key(step_id)
    }

    /// Look up `step.field.path`. Numeric segments index into arrays.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] naming the reference when any segment is missing.
    pub fn lookup(&self, reference: &str) -> Result<&Value, TemplateError> {
        let mut segments = reference.split('.');
        let step = segments.next().unwrap_or_default();
        let mut current = self.captured.get(step).ok_or_else(|| TemplateError {
            reference: reference.to_string(),
            reason: format!("no completed step '{step}'"),
        })?;
        for segment in segments {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            current = next.ok_or_else(|| TemplateError {
                reference: reference.to_string(),
                reason: format!("field '{segment}' not found"),
            })?;
        }
        Ok(current)
    }

    /// Resolve every placeholder in a string.
    ///
    /// # Errors
    ///
    /// Returns the first reference that cannot be resolved.
    pub fn resolve_str(&self, input: &str) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(TemplateError {
                    reference: after.to_string(),
                    reason: "unterminated placeholder".to_string(),
                });
            };
            let value = self.lookup(&after[..end])?;
            out.push_str(&render_scalar(value));
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }

    /// Resolve placeholders in every string inside a JSON value.
    ///
    /// # Errors
    ///
    /// Returns the first reference that cannot be resolved.
    pub fn resolve_value(&self, input: &Value) -> Result<Value, TemplateError> {
        match input {
            Value::String(s) => match whole_placeholder(s) {
                Some(reference) => self.lookup(reference).cloned(),
                None => self.resolve_str(s).map(Value::String),
            },
            Value::Array(items) => items
                .iter()
                .map(|v| self.resolve_value(v))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, value) in map {
                    out.insert(key.clone(), self.resolve_value(value)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }
}

/// Step ids referenced by placeholders in `input`.
#[must_use]
pub fn referenced_steps(input: &str) -> Vec<&str> {
    let mut steps = Vec::new();
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else { break };
        let reference = &after[..end];
        steps.push(reference.split('.').next().unwrap_or(reference));
        rest = &after[end + 1..];
    }
    steps
}

/// Step ids referenced anywhere in a JSON value.
#[must_use]
pub fn referenced_steps_in_value(input: &Value) -> Vec<&str> {
    match input {
        Value::String(s) => referenced_steps(s),
        Value::Array(items) => items.iter().flat_map(referenced_steps_in_value).collect(),
        Value::Object(map) => map.values().flat_map(referenced_steps_in_value).collect(),
        _ => Vec::new(),
    }
}

fn whole_placeholder(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    (!inner.contains("${") && !inner.contains('}')).then_some(inner)
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot resolve '${{{reference}}}': {reason}")]
pub struct TemplateError {
    pub reference: String,
    pub reason: String,
}
