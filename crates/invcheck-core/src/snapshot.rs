//! Immutable state snapshots

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Observable fields of a resource at one point in time.
///
/// Fields are private; there is no way to change a snapshot after capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Snapshot {
    id: String,
    resource: String,
    fields: BTreeMap<String, Value>,
    captured_at_ms: u64,
}

/// One field that differs between two snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldChange {
    pub field: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl Snapshot {
    /// Capture with the current wall-clock time.
    #[must_use]
    pub fn capture(
        id: impl Into<String>,
        resource: impl Into<String>,
        fields: BTreeMap<String, Value>,
    ) -> Self {
        let captured_at_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        Self {
            id: id.into(),
            resource: resource.into(),
            fields,
            captured_at_ms,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    #[must_use]
    pub fn captured_at_ms(&self) -> u64 {
        self.captured_at_ms
    }

    /// Numeric fields only, in name order.
    pub fn numeric_fields(&self) -> impl Iterator<Item = (&str, f64)> {
        self.fields
            .iter()
            .filter_map(|(k, v)| v.as_f64().map(|n| (k.as_str(), n)))
    }

    /// Sum of the numeric fields, or `None` if there are none.
    #[must_use]
    pub fn numeric_total(&self) -> Option<f64> {
        let mut seen = false;
        let total: f64 = self
            .numeric_fields()
            .inspect(|_| seen = true)
            .map(|(_, n)| n)
            .sum();
        seen.then_some(total)
    }

    /// Fields whose values differ from `other`, in name order.
    #[must_use]
    pub fn diff(&self, other: &Self) -> Vec<FieldChange> {
        let mut names: Vec<&String> = self.fields.keys().chain(other.fields.keys()).collect();
        names.sort_unstable();
        names.dedup();
        names
            .into_iter()
            .filter_map(|name| {
                let before = self.fields.get(name);
                let after = other.fields.get(name);
                (!values_equal(before, after)).then(|| FieldChange {
                    field: name.clone(),
                    before: before.cloned(),
                    after: after.cloned(),
                })
            })
            .collect()
    }
}

/// Equality with numeric tolerance, so `50` and `50.0` compare equal.
#[must_use]
pub fn values_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (Some(x), Some(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(nx), Some(ny)) => (nx - ny).abs() <= crate::invariant::TOLERANCE,
            _ => x == y,
        },
        (None, None) => true,
        _ => false,
    }
}
