//! Fuzz case generation
//!
//! Derives a finite, ordered set of malformed payloads from a request body
//! template. Pure: the same template and policy always give the same cases.
//! Ordering is policy kind order, then field name, then value order; seeded
//! random samples come last.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};

use invcheck_core::{FuzzCase, MutationKind, MutationPolicy};

/// Used for `max+1` when the policy declares no numeric maximum.
const DEFAULT_NUMERIC_MAX: f64 = 99_999_999_999.0;

/// Generate every case the policy asks for.
///
/// Bodies that are not JSON objects have no fields to mutate and yield nothing.
#[must_use]
pub fn generate_cases(body: Option<&Value>, policy: &MutationPolicy) -> Vec<FuzzCase> {
    let Some(Value::Object(template)) = body else {
        return Vec::new();
    };
    let fields = target_fields(template, policy);

    let mut cases: Vec<FuzzCase> = Vec::new();
    let mut push = |kind: MutationKind, field: &str, label: String, payload: Value| {
        cases.push(FuzzCase {
            index: 0,
            label,
            kind,
            field: field.to_string(),
            payload,
        });
    };

    let mut seen_kinds = Vec::new();
    for &kind in &policy.kinds {
        if seen_kinds.contains(&kind) {
            continue;
        }
        seen_kinds.push(kind);
        for field in &fields {
            let original = template.get(field);
            match kind {
                MutationKind::DropRequiredField => {
                    if original.is_some() {
                        let mut payload = template.clone();
                        payload.remove(field);
                        push(kind, field, format!("{kind}:{field}"), Value::Object(payload));
                    }
                }
                MutationKind::NullRequiredField => {
                    push(
                        kind,
                        field,
                        format!("{kind}:{field}"),
                        with_field(template, field, Value::Null),
                    );
                }
                MutationKind::WrongType => {
                    let value = wrong_type_for(original);
                    push(
                        kind,
                        field,
                        format!("{kind}:{field}={value}"),
                        with_field(template, field, value),
                    );
                }
                MutationKind::BoundaryNumeric => {
                    let Some(n) = original.and_then(Value::as_f64) else {
                        continue;
                    };
                    for value in boundary_values(n, policy.numeric_max) {
                        push(
                            kind,
                            field,
                            format!("{kind}:{field}={value}"),
                            with_field(template, field, value),
                        );
                    }
                }
                MutationKind::OversizedString => {
                    if original.is_some_and(Value::is_string) {
                        let value = Value::String("x".repeat(policy.oversized_len));
                        push(
                            kind,
                            field,
                            format!("{kind}:{field}(len={})", policy.oversized_len),
                            with_field(template, field, value),
                        );
                    }
                }
            }
        }
    }

    if let Some(random) = policy.random {
        let mut rng = SmallRng::seed_from_u64(random.seed);
        let numeric: Vec<&String> = fields
            .iter()
            .filter(|f| template.get(f.as_str()).is_some_and(Value::is_number))
            .collect();
        let max = policy.numeric_max.unwrap_or(DEFAULT_NUMERIC_MAX);
        let sampleable = max.is_finite() && max >= 0.0 && (max * 2.0).is_finite();
        if !sampleable {
            tracing::warn!(numeric_max = max, "numeric_max unusable for random sampling, skipped");
        } else if !numeric.is_empty() {
            for i in 0..random.samples {
                let field = numeric[rng.gen_range(0..numeric.len())];
                let value = json_number(rng.gen_range(-max..=max * 2.0).round());
                push(
                    MutationKind::BoundaryNumeric,
                    field,
                    format!("random[{i}]:{field}={value}"),
                    with_field(template, field, value),
                );
            }
        }
    }

    for (i, case) in cases.iter_mut().enumerate() {
        case.index = i;
    }
    cases
}

/// Declared required fields, or every template field, in name order.
fn target_fields(template: &Map<String, Value>, policy: &MutationPolicy) -> Vec<String> {
    let mut fields: Vec<String> = if policy.required_fields.is_empty() {
        template.keys().cloned().collect()
    } else {
        policy.required_fields.clone()
    };
    fields.sort();
    fields.dedup();
    fields
}

fn with_field(template: &Map<String, Value>, field: &str, value: Value) -> Value {
    let mut payload = template.clone();
    payload.insert(field.to_string(), value);
    Value::Object(payload)
}

/// A value of a different JSON type than the original.
fn wrong_type_for(original: Option<&Value>) -> Value {
    match original {
        Some(Value::String(_)) => Value::from(12345),
        _ => Value::String("abc".to_string()),
    }
}

/// 0, negative, max+1
fn boundary_values(original: f64, numeric_max: Option<f64>) -> [Value; 3] {
    let negative = if original.abs() > 0.0 {
        -original.abs()
    } else {
        -1.0
    };
    let above_max = numeric_max.unwrap_or(DEFAULT_NUMERIC_MAX) + 1.0;
    [json_number(0.0), json_number(negative), json_number(above_max)]
}

/// Integers stay integers in the payload.
pub(crate) fn json_number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invcheck_core::RandomSampling;
    use proptest::prelude::*;
    use serde_json::json;

    fn transfer() -> Value {
        json!({"from": "A", "to": "B", "amount": 50})
    }

    fn policy(kinds: &[MutationKind]) -> MutationPolicy {
        MutationPolicy {
            kinds: kinds.to_vec(),
            ..MutationPolicy::default()
        }
    }

    fn labels(cases: &[FuzzCase]) -> Vec<&str> {
        cases.iter().map(|c| c.label.as_str()).collect()
    }

    #[test]
    fn drop_each_field_in_name_order() {
        let cases = generate_cases(Some(&transfer()), &policy(&[MutationKind::DropRequiredField]));
        assert_eq!(
            labels(&cases),
            vec![
                "drop_required_field:amount",
                "drop_required_field:from",
                "drop_required_field:to"
            ]
        );
        assert_eq!(cases[0].payload, json!({"from": "A", "to": "B"}));
    }

    #[test]
    fn boundary_values_for_numeric_fields_only() {
        let mut p = policy(&[MutationKind::BoundaryNumeric]);
        p.numeric_max = Some(1000.0);
        let cases = generate_cases(Some(&transfer()), &p);
        let amounts: Vec<_> = cases.iter().map(|c| c.payload["amount"].clone()).collect();
        assert_eq!(amounts, vec![json!(0), json!(-50), json!(1001)]);
        assert!(cases.iter().all(|c| c.field == "amount"));
    }

    #[test]
    fn wrong_type_swaps_json_type() {
        let cases = generate_cases(Some(&transfer()), &policy(&[MutationKind::WrongType]));
        assert_eq!(cases[0].payload["amount"], json!("abc"));
        assert_eq!(cases[1].payload["from"], json!(12345));
    }

    #[test]
    fn oversized_applies_to_strings() {
        let mut p = policy(&[MutationKind::OversizedString]);
        p.oversized_len = 16;
        let cases = generate_cases(Some(&transfer()), &p);
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].payload["from"].as_str().unwrap().len(), 16);
    }

    #[test]
    fn kind_order_then_field_order() {
        let cases = generate_cases(
            Some(&json!({"b": 1, "a": 2})),
            &policy(&[MutationKind::NullRequiredField, MutationKind::DropRequiredField]),
        );
        assert_eq!(
            labels(&cases),
            vec![
                "null_required_field:a",
                "null_required_field:b",
                "drop_required_field:a",
                "drop_required_field:b"
            ]
        );
        assert_eq!(
            cases.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn declared_required_fields_restrict_targets() {
        let mut p = policy(&[MutationKind::NullRequiredField]);
        p.required_fields = vec!["amount".into()];
        let cases = generate_cases(Some(&transfer()), &p);
        assert_eq!(labels(&cases), vec!["null_required_field:amount"]);
    }

    #[test]
    fn no_object_body_no_cases() {
        let p = MutationPolicy::default();
        assert!(generate_cases(None, &p).is_empty());
        assert!(generate_cases(Some(&json!([1, 2])), &p).is_empty());
    }

    #[test]
    fn random_samples_are_appended_and_seeded() {
        let mut p = policy(&[MutationKind::DropRequiredField]);
        p.random = Some(RandomSampling { seed: 42, samples: 5 });
        let a = generate_cases(Some(&transfer()), &p);
        let b = generate_cases(Some(&transfer()), &p);
        assert_eq!(a, b);
        assert_eq!(a.len(), 3 + 5);
        assert!(a[3].label.starts_with("random[0]:amount="));
    }

    #[test]
    fn unusable_numeric_max_skips_random_samples() {
        for max in [-5.0, 1.0e308, f64::NAN] {
            let mut p = policy(&[MutationKind::BoundaryNumeric]);
            p.numeric_max = Some(max);
            p.random = Some(RandomSampling { seed: 1, samples: 4 });
            let cases = generate_cases(Some(&json!({"amount": 10})), &p);
            assert_eq!(cases.len(), 3, "{max}");
            assert!(cases.iter().all(|c| !c.label.starts_with("random[")));
        }
    }

    fn arb_kinds() -> impl Strategy<Value = Vec<MutationKind>> {
        proptest::sample::subsequence(MutationKind::ALL.to_vec(), 1..=5)
    }

    fn arb_body() -> impl Strategy<Value = Value> {
        proptest::collection::btree_map(
            "[a-z]{1,6}",
            prop_oneof![
                any::<i32>().prop_map(Value::from),
                "[a-zA-Z0-9]{0,8}".prop_map(Value::from),
                any::<bool>().prop_map(Value::from),
            ],
            1..6,
        )
        .prop_map(|m| Value::Object(m.into_iter().collect()))
    }

    proptest! {
        #[test]
        fn generation_is_deterministic(
            body in arb_body(),
            kinds in arb_kinds(),
            seed in any::<u64>(),
        ) {
            let p = MutationPolicy {
                kinds,
                random: Some(RandomSampling { seed, samples: 4 }),
                ..MutationPolicy::default()
            };
            let first = generate_cases(Some(&body), &p);
            let second = generate_cases(Some(&body), &p);
            prop_assert_eq!(&first, &second);
            for (i, case) in first.iter().enumerate() {
                prop_assert_eq!(case.index, i);
                prop_assert!(body.get(&case.field).is_some());
            }
        }
    }
}
