//! State Snapshot Provider

use std::collections::BTreeMap;

use invcheck_core::{Snapshot, SnapshotSource};
use serde_json::Value;

use crate::executor::{Executor, ResolvedRequest};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("snapshot of {resource} unavailable: {reason}")]
pub struct SnapshotUnavailable {
    pub resource: String,
    pub reason: String,
}

/// Reads observable state through a read-style endpoint.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotProvider<'a> {
    executor: &'a Executor,
    source: &'a SnapshotSource,
}

impl<'a> SnapshotProvider<'a> {
    #[must_use]
    pub fn new(executor: &'a Executor, source: &'a SnapshotSource) -> Self {
        Self { executor, source }
    }

    /// Capture `resource` (an already resolved path) under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotUnavailable`] on transport error, non-2xx status,
    /// non-object body, or a declared field missing.
    pub fn snapshot(&self, resource: &str, id: &str) -> Result<Snapshot, SnapshotUnavailable> {
        let unavailable = |reason: String| SnapshotUnavailable {
            resource: resource.to_string(),
            reason,
        };

        let execution = self.executor.execute(&ResolvedRequest::get(resource));
        if let Some(err) = &execution.transport_error {
            return Err(unavailable(err.clone()));
        }
        if !execution.is_success() {
            return Err(unavailable(format!(
                "status {}",
                execution.status.unwrap_or_default()
            )));
        }
        let body = execution
            .body
            .ok_or_else(|| unavailable("empty body".to_string()))?;
        let fields = extract_fields(&body, self.source).map_err(unavailable)?;
        tracing::debug!(id, resource, fields = fields.len(), "snapshot captured");
        Ok(Snapshot::capture(id, resource, fields))
    }
}

/// Pick the observable fields out of a response body.
///
/// Follows `fields_pointer` when it resolves, otherwise uses the whole body.
///
/// # Errors
///
/// Returns a reason string if the body or pointed-to value is not an object,
/// or a declared field is missing.
pub fn extract_fields(
    body: &Value,
    source: &SnapshotSource,
) -> Result<BTreeMap<String, Value>, String> {
    if !body.is_object() {
        return Err("response body is not a JSON object".to_string());
    }
    let scope = match body.pointer(&source.fields_pointer) {
        Some(Value::Object(map)) => map,
        Some(_) => return Err(format!("'{}' is not an object", source.fields_pointer)),
        None => body.as_object().ok_or("response body is not a JSON object")?,
    };

    if source.fields.is_empty() {
        return Ok(scope.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
    }
    source
        .fields
        .iter()
        .map(|name| {
            scope
                .get(name)
                .map(|v| (name.clone(), v.clone()))
                .ok_or_else(|| format!("field '{name}' missing from response"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source(fields: &[&str]) -> SnapshotSource {
        SnapshotSource {
            fields: fields.iter().map(|s| (*s).to_string()).collect(),
            ..SnapshotSource::default()
        }
    }

    #[test]
    fn follows_pointer() {
        let body = json!({"accounts": {"A": 100, "B": 100}, "version": 3});
        let fields = extract_fields(&body, &source(&[])).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["A"], json!(100));
    }

    #[test]
    fn falls_back_to_root() {
        let body = json!({"A": 1, "B": 2});
        let fields = extract_fields(&body, &source(&[])).unwrap();
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn declared_fields_only() {
        let body = json!({"accounts": {"A": 100, "B": 100, "C": 5}});
        let fields = extract_fields(&body, &source(&["A", "C"])).unwrap();
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["A", "C"]);
    }

    #[test]
    fn missing_declared_field_fails() {
        let body = json!({"accounts": {"A": 100}});
        let err = extract_fields(&body, &source(&["A", "Z"])).unwrap_err();
        assert!(err.contains("'Z'"));
    }

    #[test]
    fn non_object_body_fails() {
        assert!(extract_fields(&json!([1, 2]), &source(&[])).is_err());
        assert!(extract_fields(&json!({"accounts": [1]}), &source(&[])).is_err());
    }
}
