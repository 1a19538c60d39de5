//! Fuzz exploration: execute generated cases and classify the handling

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use invcheck_core::{Execution, FuzzCase, FuzzCaseResult, FuzzMode, FuzzVerdict};

use super::snapshot::SnapshotProvider;
use crate::executor::{Executor, ResolvedRequest};
use crate::mutation;

/// Runs fuzz cases for one step. Never touches the step's baseline record.
#[derive(Debug, Clone, Copy)]
pub struct FuzzExplorer<'a> {
    executor: &'a Executor,
    state: Option<(SnapshotProvider<'a>, &'a str)>,
}

impl<'a> FuzzExplorer<'a> {
    #[must_use]
    pub fn new(executor: &'a Executor) -> Self {
        Self {
            executor,
            state: None,
        }
    }

    /// Snapshot `resource` around every case to detect state changes.
    #[must_use]
    pub fn with_state(mut self, provider: SnapshotProvider<'a>, resource: &'a str) -> Self {
        self.state = Some((provider, resource));
        self
    }

    /// Generate and run every case. Results come back in case order.
    ///
    /// `reset` is an already resolved request issued before each case.
    #[must_use]
    pub fn explore(
        &self,
        step_id: &str,
        base: &ResolvedRequest,
        mode: &FuzzMode,
        reset: Option<&ResolvedRequest>,
    ) -> Vec<FuzzCaseResult> {
        let cases = mutation::generate_cases(base.body.as_ref(), &mode.policy());
        if cases.is_empty() {
            tracing::warn!(step = step_id, "no fuzz cases: request body has no object fields");
            return Vec::new();
        }

        let workers = if mode.workers > 1 && !mode.resource_independent {
            tracing::warn!(
                step = step_id,
                workers = mode.workers,
                "fuzz cases not marked resource_independent, running serially"
            );
            1
        } else {
            mode.workers.clamp(1, cases.len())
        };
        tracing::info!(step = step_id, cases = cases.len(), workers, "fuzzing");

        let run = |case: FuzzCase| self.run_case(step_id, base, reset, case);
        if workers == 1 {
            return cases.into_iter().map(run).collect();
        }

        let next = AtomicUsize::new(0);
        let slots: Vec<Mutex<Option<FuzzCaseResult>>> =
            cases.iter().map(|_| Mutex::new(None)).collect();
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        let Some(case) = cases.get(i) else { break };
                        let result = run(case.clone());
                        if let Ok(mut slot) = slots[i].lock() {
                            *slot = Some(result);
                        }
                    }
                });
            }
        });
        slots
            .into_iter()
            .filter_map(|slot| slot.into_inner().ok().flatten())
            .collect()
    }

    fn run_case(
        &self,
        step_id: &str,
        base: &ResolvedRequest,
        reset: Option<&ResolvedRequest>,
        case: FuzzCase,
    ) -> FuzzCaseResult {
        if let Some(reset) = reset {
            let done = self.executor.execute(reset);
            if !done.is_success() {
                tracing::warn!(
                    step = step_id,
                    case = %case.label,
                    status = ?done.status,
                    "fuzz reset request did not succeed"
                );
            }
        }

        let snapshot = |label: &str| {
            self.state.map(|(provider, resource)| {
                provider.snapshot(resource, &format!("{step_id}:fuzz-{}:{label}", case.index))
            })
        };

        let before = snapshot("before");
        let execution = self.executor.execute(&base.with_body(case.payload.clone()));
        let after = snapshot("after");

        let state_changed = match (before, after) {
            (Some(Ok(b)), Some(Ok(a))) => Some(!b.diff(&a).is_empty()),
            _ => None,
        };
        let (verdict, diagnostic) = classify(&execution, state_changed);
        tracing::debug!(step = step_id, case = %case.label, verdict = %verdict, "fuzz case");
        FuzzCaseResult {
            case,
            execution,
            state_changed,
            verdict,
            passed: verdict.is_pass(),
            diagnostic,
        }
    }
}

/// Judge how the target handled a malformed request.
#[must_use]
pub fn classify(execution: &Execution, state_changed: Option<bool>) -> (FuzzVerdict, String) {
    let Some(status) = execution.status else {
        let reason = execution.transport_error.as_deref().unwrap_or("no response");
        return (FuzzVerdict::TransportError, format!("no response: {reason}"));
    };
    match status {
        500..=599 => (
            FuzzVerdict::ServerError,
            format!("server error {status} for malformed input"),
        ),
        200..=299 => (
            FuzzVerdict::AcceptedInvalid,
            format!("malformed input accepted with {status}"),
        ),
        400..=499 => match state_changed {
            Some(true) => (
                FuzzVerdict::MutatedDespiteRejection,
                format!("rejected with {status} but state changed"),
            ),
            Some(false) => (FuzzVerdict::Rejected, format!("rejected with {status}")),
            None => (
                FuzzVerdict::Rejected,
                format!("rejected with {status} (state not observed)"),
            ),
        },
        other => (
            FuzzVerdict::UnexpectedStatus,
            format!("unexpected status {other}"),
        ),
    }
}
