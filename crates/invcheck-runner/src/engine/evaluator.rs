//! Invariant Evaluator
//!
//! Pure functions of their inputs; no I/O. A missing input never passes.

use invcheck_core::invariant::TOLERANCE;
use invcheck_core::{Execution, InvariantKind, InvariantResult, RetryOutcome, Snapshot};

use super::snapshot::SnapshotUnavailable;

/// A snapshot that may have failed to materialise.
#[derive(Debug, Clone, Copy, Default)]
pub enum SnapshotInput<'a> {
    /// Not captured for this step
    #[default]
    Absent,
    Unavailable(&'a str),
    Captured(&'a Snapshot),
}

impl<'a> SnapshotInput<'a> {
    #[must_use]
    pub fn from_result(result: Option<&'a Result<Snapshot, SnapshotUnavailable>>) -> Self {
        match result {
            None => Self::Absent,
            Some(Ok(s)) => Self::Captured(s),
            Some(Err(e)) => Self::Unavailable(&e.reason),
        }
    }

    fn get(self, label: &str) -> Result<&'a Snapshot, String> {
        match self {
            Self::Captured(s) => Ok(s),
            Self::Absent => Err(format!("{label} snapshot (no snapshot source configured)")),
            Self::Unavailable(reason) => Err(format!("{label} snapshot ({reason})")),
        }
    }

    fn id(self) -> Option<String> {
        match self {
            Self::Captured(s) => Some(s.id().to_string()),
            _ => None,
        }
    }
}

/// Everything an invariant may look at.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluationInputs<'a> {
    pub before: SnapshotInput<'a>,
    pub after: SnapshotInput<'a>,
    pub response: Option<&'a Execution>,
    pub retry: Option<&'a RetryOutcome>,
    pub expect_status: Option<u16>,
}

/// Judge one invariant.
#[must_use]
pub fn evaluate(kind: InvariantKind, inputs: &EvaluationInputs<'_>) -> InvariantResult {
    let result = match kind {
        InvariantKind::NoNegativeBalance => no_negative_balance(inputs),
        InvariantKind::BalanceConservation => balance_conservation(inputs),
        InvariantKind::NoDuplicateSideEffectOnRetry => no_duplicate_side_effect(inputs),
        InvariantKind::StatusCodeExpected => status_code_expected(inputs),
    };
    result.with_snapshots(inputs.before.id(), inputs.after.id())
}

fn no_negative_balance(inputs: &EvaluationInputs<'_>) -> InvariantResult {
    let kind = InvariantKind::NoNegativeBalance;
    let after = match inputs.after.get("after") {
        Ok(s) => s,
        Err(missing) => return InvariantResult::insufficient(kind, &missing),
    };
    let numeric: Vec<(&str, f64)> = after.numeric_fields().collect();
    if numeric.is_empty() {
        return InvariantResult::insufficient(kind, &format!("no numeric fields in {}", after.id()));
    }
    let negative: Vec<String> = numeric
        .iter()
        .filter(|(_, n)| *n < -TOLERANCE)
        .map(|(name, n)| format!("{name}={n:.2}"))
        .collect();
    if negative.is_empty() {
        InvariantResult::held(kind, format!("all {} balances non-negative", numeric.len()))
    } else {
        InvariantResult::violated(kind, format!("negative balance: {}", negative.join(", ")))
    }
}

fn balance_conservation(inputs: &EvaluationInputs<'_>) -> InvariantResult {
    let kind = InvariantKind::BalanceConservation;
    let (before, after) = match (inputs.before.get("before"), inputs.after.get("after")) {
        (Ok(b), Ok(a)) => (b, a),
        (Err(missing), _) | (_, Err(missing)) => {
            return InvariantResult::insufficient(kind, &missing);
        }
    };
    let (Some(total_before), Some(total_after)) = (before.numeric_total(), after.numeric_total())
    else {
        return InvariantResult::insufficient(kind, "no numeric fields to total");
    };
    let delta = total_after - total_before;
    if delta.abs() <= TOLERANCE {
        InvariantResult::held(kind, format!("total {total_after:.2} conserved"))
    } else {
        InvariantResult::violated(
            kind,
            format!("total changed from {total_before:.2} to {total_after:.2} (delta {delta:+.2})"),
        )
    }
}

fn no_duplicate_side_effect(inputs: &EvaluationInputs<'_>) -> InvariantResult {
    let kind = InvariantKind::NoDuplicateSideEffectOnRetry;
    let Some(retry) = inputs.retry else {
        return InvariantResult::insufficient(kind, "retry outcome (step has no retry mode)");
    };
    if !retry.conclusive {
        return InvariantResult::insufficient(
            kind,
            "retry outcome (attempts failed before a comparison was possible)",
        );
    }
    if retry.divergences.is_empty() {
        InvariantResult::held(
            kind,
            format!("{} attempts produced identical digests", retry.attempts.len()),
        )
    } else {
        let shown: Vec<String> = retry.divergences.iter().take(3).map(ToString::to_string).collect();
        let more = retry.divergences.len().saturating_sub(shown.len());
        let suffix = if more > 0 {
            format!(" (+{more} more)")
        } else {
            String::new()
        };
        InvariantResult::violated(kind, format!("retry diverged: {}{suffix}", shown.join("; ")))
    }
}

fn status_code_expected(inputs: &EvaluationInputs<'_>) -> InvariantResult {
    let kind = InvariantKind::StatusCodeExpected;
    let Some(response) = inputs.response else {
        return InvariantResult::insufficient(kind, "response");
    };
    let Some(status) = response.status else {
        let reason = response.transport_error.as_deref().unwrap_or("no status");
        return InvariantResult::insufficient(kind, &format!("response ({reason})"));
    };
    match inputs.expect_status {
        Some(expected) if expected == status => {
            InvariantResult::held(kind, format!("status {status}"))
        }
        Some(expected) => {
            InvariantResult::violated(kind, format!("expected status {expected}, got {status}"))
        }
        None if (200..300).contains(&status) => {
            InvariantResult::held(kind, format!("status {status}"))
        }
        None => InvariantResult::violated(kind, format!("expected 2xx, got {status}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invcheck_core::{Divergence, HttpMethod, InvariantStatus, RetryStrategy};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn snap(id: &str, fields: serde_json::Value) -> Snapshot {
        let map: BTreeMap<String, serde_json::Value> = fields
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Snapshot::capture(id, "/balance", map)
    }

    fn response(status: Option<u16>) -> Execution {
        Execution {
            method: HttpMethod::Post,
            url: "http://bank.test/transfer".into(),
            request_headers: BTreeMap::new(),
            request_body: None,
            status,
            body: None,
            latency_ms: 1,
            transport_error: status.is_none().then(|| "timeout: 5s".to_string()),
        }
    }

    fn retry(divergences: Vec<Divergence>, conclusive: bool) -> RetryOutcome {
        RetryOutcome {
            strategy: RetryStrategy::Immediate,
            idempotency_key: "t-retry".into(),
            attempts: Vec::new(),
            idempotent: conclusive && divergences.is_empty(),
            conclusive,
            divergences,
            replays: Vec::new(),
        }
    }

    #[test]
    fn negative_balance_detected_with_value() {
        let after = snap("t:after", json!({"A": -50, "B": 250}));
        let inputs = EvaluationInputs {
            after: SnapshotInput::Captured(&after),
            ..Default::default()
        };
        let r = evaluate(InvariantKind::NoNegativeBalance, &inputs);
        assert_eq!(r.status, InvariantStatus::Violated);
        assert!(r.diagnostic.contains("A=-50.00"), "{}", r.diagnostic);
        assert_eq!(r.after_snapshot.as_deref(), Some("t:after"));
    }

    #[test]
    fn zero_balance_is_not_negative() {
        let after = snap("t:after", json!({"A": 0, "B": 200, "owner": "x"}));
        let inputs = EvaluationInputs {
            after: SnapshotInput::Captured(&after),
            ..Default::default()
        };
        assert!(evaluate(InvariantKind::NoNegativeBalance, &inputs).passed);
    }

    #[test]
    fn conservation_holds_for_transfer() {
        let before = snap("t:before", json!({"A": 100, "B": 100}));
        let after = snap("t:after", json!({"A": 50, "B": 150}));
        let inputs = EvaluationInputs {
            before: SnapshotInput::Captured(&before),
            after: SnapshotInput::Captured(&after),
            ..Default::default()
        };
        let r = evaluate(InvariantKind::BalanceConservation, &inputs);
        assert!(r.passed, "{}", r.diagnostic);
        assert_eq!(r.before_snapshot.as_deref(), Some("t:before"));
    }

    #[test]
    fn conservation_tolerates_float_noise() {
        let before = snap("b", json!({"A": 0.1, "B": 0.2}));
        let after = snap("a", json!({"A": 0.3, "B": 0.0}));
        let inputs = EvaluationInputs {
            before: SnapshotInput::Captured(&before),
            after: SnapshotInput::Captured(&after),
            ..Default::default()
        };
        assert!(evaluate(InvariantKind::BalanceConservation, &inputs).passed);
    }

    #[test]
    fn conservation_violation_reports_delta() {
        let before = snap("b", json!({"A": 100, "B": 100}));
        let after = snap("a", json!({"A": 50, "B": 100}));
        let inputs = EvaluationInputs {
            before: SnapshotInput::Captured(&before),
            after: SnapshotInput::Captured(&after),
            ..Default::default()
        };
        let r = evaluate(InvariantKind::BalanceConservation, &inputs);
        assert!(!r.passed);
        assert!(r.diagnostic.contains("delta -50.00"), "{}", r.diagnostic);
    }

    #[test]
    fn missing_before_fails_closed() {
        let after = snap("a", json!({"A": 1}));
        let inputs = EvaluationInputs {
            before: SnapshotInput::Unavailable("status 503"),
            after: SnapshotInput::Captured(&after),
            ..Default::default()
        };
        let r = evaluate(InvariantKind::BalanceConservation, &inputs);
        assert_eq!(r.status, InvariantStatus::InsufficientData);
        assert!(!r.passed);
        assert!(r.diagnostic.contains("before snapshot (status 503)"));
    }

    #[test]
    fn no_numeric_fields_is_insufficient() {
        let after = snap("a", json!({"owner": "ann"}));
        let inputs = EvaluationInputs {
            after: SnapshotInput::Captured(&after),
            ..Default::default()
        };
        assert_eq!(
            evaluate(InvariantKind::NoNegativeBalance, &inputs).status,
            InvariantStatus::InsufficientData
        );
    }

    #[test]
    fn retry_divergence_fails() {
        let outcome = retry(
            vec![Divergence {
                attempt: 2,
                field: "state.A".into(),
                baseline: Some(json!(50)),
                observed: Some(json!(0)),
            }],
            true,
        );
        let inputs = EvaluationInputs {
            retry: Some(&outcome),
            ..Default::default()
        };
        let r = evaluate(InvariantKind::NoDuplicateSideEffectOnRetry, &inputs);
        assert_eq!(r.status, InvariantStatus::Violated);
        assert!(r.diagnostic.contains("state.A: 50 -> 0"));
    }

    #[test]
    fn retry_missing_or_inconclusive() {
        let r = evaluate(InvariantKind::NoDuplicateSideEffectOnRetry, &EvaluationInputs::default());
        assert_eq!(r.status, InvariantStatus::InsufficientData);

        let outcome = retry(Vec::new(), false);
        let inputs = EvaluationInputs {
            retry: Some(&outcome),
            ..Default::default()
        };
        assert_eq!(
            evaluate(InvariantKind::NoDuplicateSideEffectOnRetry, &inputs).status,
            InvariantStatus::InsufficientData
        );
    }

    #[test]
    fn status_expectations() {
        let ok = response(Some(201));
        let mut inputs = EvaluationInputs {
            response: Some(&ok),
            ..Default::default()
        };
        assert!(evaluate(InvariantKind::StatusCodeExpected, &inputs).passed);

        inputs.expect_status = Some(200);
        let r = evaluate(InvariantKind::StatusCodeExpected, &inputs);
        assert_eq!(r.diagnostic, "expected status 200, got 201");

        let failed = response(None);
        inputs.response = Some(&failed);
        assert_eq!(
            evaluate(InvariantKind::StatusCodeExpected, &inputs).status,
            InvariantStatus::InsufficientData
        );
    }
}
