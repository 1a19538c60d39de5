//! Retry Simulator
//!
//! Replays one resolved request with a fixed idempotency key and compares
//! what each attempt produced against attempt 1. Divergence is reported as
//! data; nothing here fails the run.

use std::collections::{BTreeMap, BTreeSet};

use invcheck_core::config::MAX_RETRY_ATTEMPTS;
use invcheck_core::snapshot::values_equal;
use invcheck_core::{AttemptDigest, Divergence, Execution, RetryMode, RetryOutcome, Snapshot};
use serde_json::Value;

use super::snapshot::{SnapshotProvider, SnapshotUnavailable};
use crate::executor::{Executor, ResolvedRequest};

/// Fewest attempts that allow a comparison.
pub const MIN_ATTEMPTS: u32 = 2;

/// Result of a retry simulation.
#[derive(Debug, Clone)]
pub struct RetryRun {
    pub outcome: RetryOutcome,
    /// Attempt 1, which doubles as the step's baseline
    pub baseline: Execution,
    /// State after the final attempt
    pub final_state: Option<Result<Snapshot, SnapshotUnavailable>>,
}

#[derive(Debug, Clone, Copy)]
pub struct RetrySimulator<'a> {
    executor: &'a Executor,
    state: Option<(SnapshotProvider<'a>, &'a str)>,
}

impl<'a> RetrySimulator<'a> {
    #[must_use]
    pub fn new(executor: &'a Executor) -> Self {
        Self {
            executor,
            state: None,
        }
    }

    /// Snapshot `resource` after every attempt.
    #[must_use]
    pub fn with_state(mut self, provider: SnapshotProvider<'a>, resource: &'a str) -> Self {
        self.state = Some((provider, resource));
        self
    }

    #[must_use]
    pub fn simulate(&self, step_id: &str, request: &ResolvedRequest, mode: &RetryMode) -> RetryRun {
        let attempts = mode.attempts.clamp(MIN_ATTEMPTS, MAX_RETRY_ATTEMPTS);
        if attempts != mode.attempts {
            tracing::warn!(
                step = step_id,
                requested = mode.attempts,
                using = attempts,
                "retry attempts out of range, clamping"
            );
        }
        let key = mode.key_for(step_id);
        let keyed = request.with_header(&mode.idempotency_header, &key);
        tracing::info!(step = step_id, attempts, key = %key, "simulating retries");

        let mut digests = Vec::with_capacity(attempts as usize);
        let mut final_state = None;
        let mut run_attempt = |attempt: u32| {
            let delay = mode.strategy.delay_before(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            let execution = self.executor.execute(&keyed);
            let state = self.state.map(|(provider, resource)| {
                provider.snapshot(resource, &format!("{step_id}:attempt-{attempt}"))
            });
            digests.push(digest_attempt(attempt, &execution, state.as_ref(), mode));
            final_state = state;
            execution
        };

        let baseline = run_attempt(1);
        let replays: Vec<Execution> = (2..=attempts).map(&mut run_attempt).collect();

        let (divergences, conclusive) = compare(&digests);
        if !divergences.is_empty() {
            tracing::info!(
                step = step_id,
                divergences = divergences.len(),
                "retry produced a different outcome"
            );
        }

        RetryRun {
            outcome: RetryOutcome {
                strategy: mode.strategy,
                idempotency_key: key,
                attempts: digests,
                idempotent: conclusive && divergences.is_empty(),
                conclusive,
                divergences,
                replays,
            },
            baseline,
            final_state,
        }
    }
}

/// Reduce one attempt to the fields that are compared.
#[must_use]
pub fn digest_attempt(
    attempt: u32,
    execution: &Execution,
    state: Option<&Result<Snapshot, SnapshotUnavailable>>,
    mode: &RetryMode,
) -> AttemptDigest {
    let (state_fields, snapshot_id, state_error) = match state {
        None => (BTreeMap::new(), None, None),
        Some(Ok(snapshot)) => (
            snapshot.fields().clone(),
            Some(snapshot.id().to_string()),
            None,
        ),
        Some(Err(e)) => (BTreeMap::new(), None, Some(e.reason.clone())),
    };
    AttemptDigest {
        attempt,
        status: execution.status,
        transport_error: execution.transport_error.clone(),
        body_fields: if mode.compare_body {
            body_fields(execution.body.as_ref(), &mode.ignore_fields)
        } else {
            BTreeMap::new()
        },
        state: state_fields,
        snapshot_id,
        state_error,
        latency_ms: execution.latency_ms,
    }
}

/// Top-level body fields minus the ignored ones. Non-object bodies compare whole.
fn body_fields(body: Option<&Value>, ignore: &[String]) -> BTreeMap<String, Value> {
    match body {
        Some(Value::Object(map)) => map
            .iter()
            .filter(|(k, _)| !ignore.iter().any(|i| i == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        Some(other) => BTreeMap::from([("$".to_string(), other.clone())]),
        None => BTreeMap::new(),
    }
}

/// Compare attempts 2..N against attempt 1.
///
/// Returns the divergences and whether the comparison was conclusive.
/// Attempts that could not be observed are skipped.
#[must_use]
pub fn compare(digests: &[AttemptDigest]) -> (Vec<Divergence>, bool) {
    let Some((first, replays)) = digests.split_first() else {
        return (Vec::new(), false);
    };
    if !first.is_conclusive() {
        return (Vec::new(), false);
    }
    let comparable: Vec<&AttemptDigest> = replays.iter().filter(|d| d.is_conclusive()).collect();
    if comparable.is_empty() {
        return (Vec::new(), false);
    }

    let mut divergences = Vec::new();
    for replay in comparable {
        if replay.status != first.status {
            divergences.push(Divergence {
                attempt: replay.attempt,
                field: "status".to_string(),
                baseline: first.status.map(Value::from),
                observed: replay.status.map(Value::from),
            });
        }
        diff_into(&mut divergences, replay.attempt, "body", &first.body_fields, &replay.body_fields);
        diff_into(&mut divergences, replay.attempt, "state", &first.state, &replay.state);
    }
    (divergences, true)
}

fn diff_into(
    out: &mut Vec<Divergence>,
    attempt: u32,
    prefix: &str,
    baseline: &BTreeMap<String, Value>,
    observed: &BTreeMap<String, Value>,
) {
    let names: BTreeSet<&String> = baseline.keys().chain(observed.keys()).collect();
    for name in names {
        let (b, o) = (baseline.get(name), observed.get(name));
        if !values_equal(b, o) {
            out.push(Divergence {
                attempt,
                field: format!("{prefix}.{name}"),
                baseline: b.cloned(),
                observed: o.cloned(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use invcheck_core::HttpMethod;
    use serde_json::json;

    fn execution(status: Option<u16>, body: Value) -> Execution {
        Execution {
            method: HttpMethod::Post,
            url: "http://bank.test/transfer".into(),
            request_headers: BTreeMap::new(),
            request_body: None,
            status,
            body: Some(body),
            latency_ms: 2,
            transport_error: status.is_none().then(|| "connection failed".to_string()),
        }
    }

    fn state(attempt: u32, a: i64) -> Result<Snapshot, SnapshotUnavailable> {
        Ok(Snapshot::capture(
            format!("t:attempt-{attempt}"),
            "/balance",
            BTreeMap::from([("A".to_string(), json!(a)), ("B".to_string(), json!(150))]),
        ))
    }

    fn digests(rows: &[(Option<u16>, Value, i64)]) -> Vec<AttemptDigest> {
        let mode = RetryMode::default();
        rows.iter()
            .zip(1u32..)
            .map(|((status, body, a), attempt)| {
                digest_attempt(
                    attempt,
                    &execution(*status, body.clone()),
                    Some(&state(attempt, *a)),
                    &mode,
                )
            })
            .collect()
    }

    #[test]
    fn identical_attempts_are_idempotent() {
        let d = digests(&[
            (Some(200), json!({"ok": true, "timestamp": 1}), 50),
            (Some(200), json!({"ok": true, "timestamp": 2, "idempotent_replay": true}), 50),
            (Some(200), json!({"ok": true, "timestamp": 3, "idempotent_replay": true}), 50),
        ]);
        let (divergences, conclusive) = compare(&d);
        assert!(conclusive);
        assert!(divergences.is_empty(), "{divergences:?}");
    }

    #[test]
    fn duplicate_side_effect_shows_in_state() {
        let d = digests(&[
            (Some(200), json!({"ok": true}), 50),
            (Some(200), json!({"ok": true}), 0),
        ]);
        let (divergences, conclusive) = compare(&d);
        assert!(conclusive);
        assert_eq!(divergences.len(), 1);
        assert_eq!(divergences[0].attempt, 2);
        assert_eq!(divergences[0].field, "state.A");
        assert_eq!(divergences[0].baseline, Some(json!(50)));
        assert_eq!(divergences[0].observed, Some(json!(0)));
    }

    #[test]
    fn status_and_body_divergence() {
        let d = digests(&[
            (Some(201), json!({"id": "tx-1"}), 50),
            (Some(200), json!({"id": "tx-2"}), 50),
        ]);
        let (divergences, _) = compare(&d);
        let fields: Vec<_> = divergences.iter().map(|d| d.field.as_str()).collect();
        assert_eq!(fields, vec!["status", "body.id"]);
    }

    #[test]
    fn compare_body_off_ignores_body() {
        let mode = RetryMode {
            compare_body: false,
            ..RetryMode::default()
        };
        let d: Vec<_> = [json!({"id": 1}), json!({"id": 2})]
            .iter()
            .zip(1u32..)
            .map(|(body, n)| digest_attempt(n, &execution(Some(200), body.clone()), None, &mode))
            .collect();
        assert!(compare(&d).0.is_empty());
    }

    #[test]
    fn failed_attempts_are_excluded() {
        let d = digests(&[
            (Some(200), json!({}), 50),
            (None, json!({}), 0),
            (Some(200), json!({}), 50),
        ]);
        let (divergences, conclusive) = compare(&d);
        assert!(conclusive);
        assert!(divergences.is_empty());
    }

    #[test]
    fn failed_baseline_is_inconclusive() {
        let d = digests(&[(None, json!({}), 50), (Some(200), json!({}), 0)]);
        assert_eq!(compare(&d), (Vec::new(), false));
    }

    #[test]
    fn all_replays_failed_is_inconclusive() {
        let d = digests(&[(Some(200), json!({}), 50), (None, json!({}), 0)]);
        assert!(!compare(&d).1);
    }

    #[test]
    fn snapshot_failure_marks_attempt_inconclusive() {
        let err: Result<Snapshot, SnapshotUnavailable> = Err(SnapshotUnavailable {
            resource: "/balance".into(),
            reason: "status 503".into(),
        });
        let d = digest_attempt(2, &execution(Some(200), json!({})), Some(&err), &RetryMode::default());
        assert!(!d.is_conclusive());
        assert_eq!(d.state_error.as_deref(), Some("status 503"));
    }

    #[test]
    fn non_object_body_compared_whole() {
        let fields = body_fields(Some(&json!("done")), &[]);
        assert_eq!(fields["$"], json!("done"));
    }
}
