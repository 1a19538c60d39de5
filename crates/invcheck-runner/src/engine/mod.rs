//! Sequence Runner: drives steps in order and assembles the report
//!
//! Per step: parse invariants, resolve templates, snapshot before, execute
//! (directly or through the retry simulator), snapshot after, evaluate,
//! run payload variants, optionally fuzz, then record the response into the
//! context.

pub mod evaluator;
pub mod fuzz;
pub mod retry;
pub mod snapshot;

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use invcheck_core::{
    ConfigurationError, Context, Execution, FailureReason, FuzzCaseResult, InvariantKind,
    InvariantResult, InvariantStatus, ReasonKind, Requirements, RetryOutcome, Snapshot, Step,
    StepOutcome, StepResult, TemplateError, TestReport, TestSpecification, VariantResult,
};
use serde_json::Value;

use crate::RunError;
use crate::executor::Executor;
use crate::transport::{ReqwestTransport, Transport};
use crate::variants;

use evaluator::{EvaluationInputs, SnapshotInput, evaluate};
use fuzz::FuzzExplorer;
use retry::RetrySimulator;
use snapshot::{SnapshotProvider, SnapshotUnavailable};

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Completed,
    Aborted,
}

/// Executes a [`TestSpecification`] against one target.
#[derive(Debug)]
pub struct SequenceRunner {
    spec: TestSpecification,
    executor: Executor,
    state: RunState,
}

type SnapshotResult = Result<Snapshot, SnapshotUnavailable>;

impl SequenceRunner {
    #[must_use]
    pub fn new(spec: TestSpecification, transport: Arc<dyn Transport>) -> Self {
        let executor = Executor::new(transport, &spec);
        Self {
            spec,
            executor,
            state: RunState::NotStarted,
        }
    }

    /// Runner over HTTP with the specification's timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Http`] if the HTTP client cannot be built.
    pub fn from_spec(spec: TestSpecification) -> Result<Self, RunError> {
        let timeout = Duration::try_from_secs_f64(spec.timeout_secs)
            .map_err(|e| RunError::Http(format!("invalid timeout: {e}")))?;
        let transport = ReqwestTransport::new(timeout)?;
        Ok(Self::new(spec, Arc::new(transport)))
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    #[must_use]
    pub fn spec(&self) -> &TestSpecification {
        &self.spec
    }

    /// Run every step in order. Each call starts from an empty context.
    ///
    /// Never fails: configuration problems found mid-run produce an
    /// aborted report carrying the steps completed so far.
    pub fn run(&mut self) -> TestReport {
        let start = Instant::now();
        self.state = RunState::Running;
        tracing::info!(
            base_url = self.executor.base_url(),
            steps = self.spec.steps.len(),
            "run started"
        );

        let mut context = Context::new();
        let mut results = Vec::with_capacity(self.spec.steps.len());
        for (index, step) in self.spec.steps.iter().enumerate() {
            match self.run_step(index, step, &context) {
                Ok(result) => {
                    context.record(
                        step.id.clone(),
                        result.execution.body.clone().unwrap_or(Value::Null),
                    );
                    results.push(result);
                }
                Err(e) => {
                    tracing::error!(step = %step.id, error = %e, "run aborted");
                    self.state = RunState::Aborted;
                    return TestReport::aborted(e.to_string(), results, elapsed_ms(start));
                }
            }
        }

        self.state = RunState::Completed;
        let report = TestReport::completed(results, elapsed_ms(start));
        tracing::info!(
            passed = report.passed,
            steps = report.summary.steps,
            failed = report.summary.failed,
            "run completed"
        );
        report
    }

    fn run_step(
        &self,
        index: usize,
        step: &Step,
        context: &Context,
    ) -> Result<StepResult, ConfigurationError> {
        let kinds = parse_invariants(step)?;
        let request = self.executor.resolve(&step.id, &step.request(), context)?;
        let needs = kinds
            .iter()
            .map(|(_, kind)| kind.requirements())
            .fold(Requirements::default(), Requirements::union);

        let source = self.spec.snapshot.as_ref();
        if source.is_none() && needs.needs_snapshots() {
            tracing::warn!(
                step = %step.id,
                "invariants need snapshots but no snapshot source is configured"
            );
        }
        let resource = match source {
            Some(src) => {
                let template = step.snapshot.as_deref().unwrap_or(&src.resource);
                let resolved = context
                    .resolve_str(template)
                    .map_err(|e| unresolved(step, e))?;
                Some(resolved)
            }
            None => None,
        };
        let provider = source.map(|src| SnapshotProvider::new(&self.executor, src));
        let observe = |label: &str| -> Option<SnapshotResult> {
            let provider = provider?;
            let resource = resource.as_deref()?;
            Some(provider.snapshot(resource, &format!("{}:{label}", step.id)))
        };
        let state = provider.zip(resource.as_deref());

        tracing::info!(step = %step.id, method = %request.method, path = %request.path, "step");

        let before = if needs.before { observe("before") } else { None };

        let (execution, retry, after) = match &step.retry {
            Some(mode) => {
                let mut simulator = RetrySimulator::new(&self.executor);
                if let Some((provider, resource)) = state {
                    simulator = simulator.with_state(provider, resource);
                }
                let run = simulator.simulate(&step.id, &request, mode);
                (run.baseline, Some(run.outcome), run.final_state)
            }
            None => {
                let execution = self.executor.execute(&request);
                let after = if needs.after { observe("after") } else { None };
                (execution, None, after)
            }
        };

        let inputs = EvaluationInputs {
            before: SnapshotInput::from_result(before.as_ref()),
            after: SnapshotInput::from_result(after.as_ref()),
            response: Some(&execution),
            retry: retry.as_ref(),
            expect_status: step.expect_status,
        };
        let invariants: Vec<InvariantResult> = kinds
            .iter()
            .map(|(name, kind)| evaluate(*kind, &inputs).named(name.clone()))
            .collect();

        let variants = if step.has_variants() {
            let declared = step
                .valid_cases
                .iter()
                .map(|case| context.resolve_value(case))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| unresolved(step, e))?;
            if step.amount_variants
                && request
                    .body
                    .as_ref()
                    .and_then(|b| b.get("amount"))
                    .and_then(Value::as_f64)
                    .is_none()
            {
                tracing::warn!(
                    step = %step.id,
                    "amount_variants set but the body has no numeric amount"
                );
            }
            let payloads =
                variants::collect(request.body.as_ref(), declared, step.amount_variants);
            // variants are single requests, retry invariants do not apply
            let judged: Vec<&(String, InvariantKind)> = kinds
                .iter()
                .filter(|(_, kind)| !kind.requirements().retry)
                .collect();
            let variant_needs = judged
                .iter()
                .map(|(_, kind)| kind.requirements())
                .fold(Requirements::default(), Requirements::union);
            tracing::info!(step = %step.id, variants = payloads.len(), "payload variants");

            payloads
                .into_iter()
                .enumerate()
                .map(|(index, payload)| {
                    let before = if variant_needs.before {
                        observe(&format!("variant-{index}:before"))
                    } else {
                        None
                    };
                    let execution = self.executor.execute(&request.with_body(payload.body));
                    let after = if variant_needs.after {
                        observe(&format!("variant-{index}:after"))
                    } else {
                        None
                    };
                    let inputs = EvaluationInputs {
                        before: SnapshotInput::from_result(before.as_ref()),
                        after: SnapshotInput::from_result(after.as_ref()),
                        response: Some(&execution),
                        retry: None,
                        expect_status: step.expect_status,
                    };
                    let invariants = judged
                        .iter()
                        .map(|(name, kind)| evaluate(*kind, &inputs).named(name.clone()))
                        .collect();
                    VariantResult {
                        index,
                        label: payload.label,
                        execution,
                        before: before.and_then(Result::ok),
                        after: after.and_then(Result::ok),
                        invariants,
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        let fuzz = match &step.fuzz {
            Some(mode) => {
                let reset = mode
                    .reset
                    .as_ref()
                    .map(|t| self.executor.resolve(&step.id, t, context))
                    .transpose()?;
                let mut explorer = FuzzExplorer::new(&self.executor);
                if let Some((provider, resource)) = state {
                    explorer = explorer.with_state(provider, resource);
                }
                explorer.explore(&step.id, &request, mode, reset.as_ref())
            }
            None => Vec::new(),
        };

        let reasons = collect_reasons(&execution, &invariants, retry.as_ref(), &variants, &fuzz);
        let outcome = StepOutcome::decide(step.expect, &reasons);
        match outcome {
            StepOutcome::Passed | StepOutcome::ExpectedFailure => {
                tracing::info!(step = %step.id, outcome = %outcome, "step finished");
            }
            StepOutcome::Failed | StepOutcome::UnexpectedPass => {
                tracing::warn!(
                    step = %step.id,
                    outcome = %outcome,
                    reasons = reasons.len(),
                    "step finished"
                );
            }
        }

        Ok(StepResult {
            index,
            step_id: step.id.clone(),
            method: request.method,
            path: request.path,
            execution,
            before: before.and_then(Result::ok),
            after: after.and_then(Result::ok),
            invariants,
            retry,
            variants,
            fuzz,
            expect: step.expect,
            outcome,
            reasons,
        })
    }
}

/// Invariant names paired with their kind, in declaration order.
fn parse_invariants(step: &Step) -> Result<Vec<(String, InvariantKind)>, ConfigurationError> {
    step.invariants
        .iter()
        .map(|name| {
            InvariantKind::from_str(name)
                .map(|kind| (name.clone(), kind))
                .map_err(|_| ConfigurationError::UnknownInvariant {
                    step: step.id.clone(),
                    name: name.clone(),
                })
        })
        .collect()
}

fn unresolved(step: &Step, e: TemplateError) -> ConfigurationError {
    ConfigurationError::UnresolvedReference {
        step: step.id.clone(),
        reference: e.reference,
        reason: e.reason,
    }
}

fn invariant_reason(result: &InvariantResult) -> Option<ReasonKind> {
    match result.status {
        InvariantStatus::Held => None,
        InvariantStatus::Violated => Some(ReasonKind::InvariantViolated),
        InvariantStatus::InsufficientData => Some(ReasonKind::InsufficientData),
    }
}

/// Everything that keeps a step from passing.
fn collect_reasons(
    execution: &Execution,
    invariants: &[InvariantResult],
    retry: Option<&RetryOutcome>,
    variants: &[VariantResult],
    fuzz: &[FuzzCaseResult],
) -> Vec<FailureReason> {
    let mut reasons = Vec::new();
    if let Some(err) = &execution.transport_error {
        reasons.push(FailureReason::new(ReasonKind::TransportError, err.clone()));
    }
    for result in invariants {
        if let Some(kind) = invariant_reason(result) {
            reasons.push(FailureReason::new(
                kind,
                format!("{}: {}", result.name, result.diagnostic),
            ));
        }
    }
    if let Some(retry) = retry {
        if !retry.divergences.is_empty() {
            reasons.push(FailureReason::new(
                ReasonKind::RetryDivergence,
                format!(
                    "{} divergence(s) across {} attempts, first: {}",
                    retry.divergences.len(),
                    retry.attempts.len(),
                    retry.divergences[0]
                ),
            ));
        } else if !retry.conclusive {
            reasons.push(FailureReason::new(
                ReasonKind::RetryInconclusive,
                "retry attempts failed before a comparison was possible",
            ));
        }
    }
    for variant in variants {
        if let Some(err) = &variant.execution.transport_error {
            reasons.push(FailureReason::new(
                ReasonKind::TransportError,
                format!("variant {}: {err}", variant.label),
            ));
        }
        for result in &variant.invariants {
            if let Some(kind) = invariant_reason(result) {
                reasons.push(FailureReason::new(
                    kind,
                    format!("variant {}: {}: {}", variant.label, result.name, result.diagnostic),
                ));
            }
        }
    }
    for case in fuzz.iter().filter(|c| !c.passed) {
        let kind = if case.verdict.is_bug() {
            ReasonKind::FuzzBug
        } else {
            ReasonKind::FuzzInconclusive
        };
        reasons.push(FailureReason::new(
            kind,
            format!("fuzz {}: {}", case.case.label, case.diagnostic),
        ));
    }
    reasons
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
