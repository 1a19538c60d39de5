//! Positive-path payload variants
//!
//! Valid bodies beyond a step's own: declared `valid_cases`, then `amount`
//! edge values derived from the resolved body. Bodies equal to the step's
//! body or to an earlier variant are dropped.

use serde_json::Value;

use crate::mutation::json_number;

#[derive(Debug, Clone, PartialEq)]
pub struct PayloadVariant {
    /// `case[0]`, `amount=5`, ...
    pub label: String,
    pub body: Value,
}

/// Declared cases (already resolved) followed by derived amount variants.
#[must_use]
pub fn collect(
    base: Option<&Value>,
    declared: Vec<Value>,
    derive_amount: bool,
) -> Vec<PayloadVariant> {
    let mut candidates: Vec<PayloadVariant> = declared
        .into_iter()
        .enumerate()
        .map(|(i, body)| PayloadVariant {
            label: format!("case[{i}]"),
            body,
        })
        .collect();
    if derive_amount {
        if let Some(base) = base {
            candidates.extend(amount_variants(base));
        }
    }

    let mut kept: Vec<PayloadVariant> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let duplicate =
            base == Some(&candidate.body) || kept.iter().any(|k| k.body == candidate.body);
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}

/// `amount/10` (at least 0.01), `amount*10` and `1`, to three decimals.
///
/// Empty when the body has no numeric `amount`.
#[must_use]
pub fn amount_variants(body: &Value) -> Vec<PayloadVariant> {
    let Some(amount) = body.get("amount").and_then(Value::as_f64) else {
        return Vec::new();
    };
    let Value::Object(template) = body else {
        return Vec::new();
    };
    [round3(amount / 10.0).max(0.01), round3(amount * 10.0), 1.0]
        .into_iter()
        .filter(|n| n.is_finite())
        .map(|n| {
            let value = json_number(n);
            let mut payload = template.clone();
            payload.insert("amount".to_string(), value.clone());
            PayloadVariant {
                label: format!("amount={value}"),
                body: Value::Object(payload),
            }
        })
        .collect()
}

fn round3(n: f64) -> f64 {
    (n * 1000.0).round() / 1000.0
}
