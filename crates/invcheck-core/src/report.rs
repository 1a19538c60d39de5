//! Run report types
//!
//! A [`TestReport`] is assembled once at the end of a run and serialized as
//! the tool's output format. Its JSON Schema is exported by [`generate_schema`].

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::invariant::InvariantResult;
use crate::snapshot::Snapshot;
use crate::spec::{Expectation, HttpMethod, MutationKind, RetryStrategy};

/// Record of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Execution {
    pub method: HttpMethod,
    pub url: String,
    /// Headers actually sent (after merging)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub request_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<Value>,
    /// Absent when the request never produced a response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// JSON when decodable, otherwise the raw text as a string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_error: Option<String>,
}

impl Execution {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_some_and(|s| (200..300).contains(&s))
    }

    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        self.transport_error.is_some()
    }
}

/// What one retry attempt looked like, reduced to comparable fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AttemptDigest {
    /// 1-based
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_error: Option<String>,
    /// Top-level body fields considered for comparison
    #[serde(default)]
    pub body_fields: BTreeMap<String, Value>,
    /// Observed state after this attempt
    #[serde(default)]
    pub state: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    /// Why state could not be observed after this attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_error: Option<String>,
    pub latency_ms: u64,
}

impl AttemptDigest {
    /// Got a response and, when state is tracked, a snapshot.
    #[must_use]
    pub fn is_conclusive(&self) -> bool {
        self.transport_error.is_none() && self.state_error.is_none()
    }
}

/// A field where a replay differs from attempt 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Divergence {
    pub attempt: u32,
    /// `status`, `body.<name>` or `state.<name>`
    pub field: String,
    pub baseline: Option<Value>,
    pub observed: Option<Value>,
}

impl std::fmt::Display for Divergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "attempt {} {}: {} -> {}",
            self.attempt,
            self.field,
            render(self.baseline.as_ref()),
            render(self.observed.as_ref())
        )
    }
}

fn render(value: Option<&Value>) -> String {
    value.map_or_else(|| "<missing>".to_string(), ToString::to_string)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RetryOutcome {
    pub strategy: RetryStrategy,
    pub idempotency_key: String,
    pub attempts: Vec<AttemptDigest>,
    pub idempotent: bool,
    /// False when attempt 1 or every replay could not be observed
    pub conclusive: bool,
    #[serde(default)]
    pub divergences: Vec<Divergence>,
    /// Executions of attempts 2..N; attempt 1 is the step's baseline
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replays: Vec<Execution>,
}

/// One generated malformed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FuzzCase {
    pub index: usize,
    /// e.g. `wrong_type:amount=\"text\"`
    pub label: String,
    pub kind: MutationKind,
    pub field: String,
    pub payload: Value,
}

/// How the target handled a fuzz case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FuzzVerdict {
    /// 4xx with no state change
    Rejected,
    /// 2xx for malformed input
    AcceptedInvalid,
    /// 5xx
    ServerError,
    /// 4xx but observed state changed
    MutatedDespiteRejection,
    UnexpectedStatus,
    TransportError,
}

impl FuzzVerdict {
    /// A confirmed defect in the target.
    #[must_use]
    pub const fn is_bug(self) -> bool {
        matches!(
            self,
            Self::AcceptedInvalid | Self::ServerError | Self::MutatedDespiteRejection
        )
    }

    #[must_use]
    pub const fn is_pass(self) -> bool {
        matches!(self, Self::Rejected)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::AcceptedInvalid => "accepted_invalid",
            Self::ServerError => "server_error",
            Self::MutatedDespiteRejection => "mutated_despite_rejection",
            Self::UnexpectedStatus => "unexpected_status",
            Self::TransportError => "transport_error",
        }
    }
}

impl std::fmt::Display for FuzzVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FuzzCaseResult {
    pub case: FuzzCase,
    pub execution: Execution,
    /// `None` when no state source is configured or a snapshot failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_changed: Option<bool>,
    pub verdict: FuzzVerdict,
    pub passed: bool,
    pub diagnostic: String,
}

/// A valid payload variant of a step, judged by the step's invariants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VariantResult {
    pub index: usize,
    /// `case[0]`, `amount=5`, ...
    pub label: String,
    pub execution: Execution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Snapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Snapshot>,
    #[serde(default)]
    pub invariants: Vec<InvariantResult>,
}

impl VariantResult {
    #[must_use]
    pub fn passed(&self) -> bool {
        !self.execution.is_transport_error() && self.invariants.iter().all(|r| r.passed)
    }
}

/// Why a step did not pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReasonKind {
    InvariantViolated,
    InsufficientData,
    TransportError,
    RetryDivergence,
    RetryInconclusive,
    FuzzBug,
    FuzzInconclusive,
}

impl ReasonKind {
    /// Evidence of a target bug, as opposed to an infrastructure problem.
    #[must_use]
    pub const fn is_detection(self) -> bool {
        matches!(
            self,
            Self::InvariantViolated | Self::RetryDivergence | Self::FuzzBug
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FailureReason {
    pub kind: ReasonKind,
    pub message: String,
}

impl FailureReason {
    #[must_use]
    pub fn new(kind: ReasonKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Passed,
    Failed,
    /// `expect: fail` and a bug was detected
    ExpectedFailure,
    /// `expect: fail` but nothing was detected
    UnexpectedPass,
}

impl StepOutcome {
    /// Combine the expectation with the collected failure reasons.
    #[must_use]
    pub fn decide(expect: Expectation, reasons: &[FailureReason]) -> Self {
        match expect {
            Expectation::Pass if reasons.is_empty() => Self::Passed,
            Expectation::Pass => Self::Failed,
            Expectation::Fail if reasons.is_empty() => Self::UnexpectedPass,
            Expectation::Fail if reasons.iter().any(|r| r.kind.is_detection()) => {
                Self::ExpectedFailure
            }
            Expectation::Fail => Self::Failed,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "PASS",
            Self::Failed => "FAIL",
            Self::ExpectedFailure => "XFAIL",
            Self::UnexpectedPass => "XPASS",
        }
    }
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StepResult {
    /// 0-based position in the specification
    pub index: usize,
    pub step_id: String,
    pub method: HttpMethod,
    /// Path after template resolution
    pub path: String,
    pub execution: Execution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Snapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Snapshot>,
    #[serde(default)]
    pub invariants: Vec<InvariantResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryOutcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<VariantResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fuzz: Vec<FuzzCaseResult>,
    pub expect: Expectation,
    pub outcome: StepOutcome,
    #[serde(default)]
    pub reasons: Vec<FailureReason>,
}

impl StepResult {
    /// Passed, or failed exactly as a bug-demo step should.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, StepOutcome::Passed | StepOutcome::ExpectedFailure)
    }

    /// Every exchange made for this step, baseline first.
    pub fn executions(&self) -> impl Iterator<Item = &Execution> {
        std::iter::once(&self.execution)
            .chain(self.retry.iter().flat_map(|r| r.replays.iter()))
            .chain(self.variants.iter().map(|v| &v.execution))
            .chain(self.fuzz.iter().map(|f| &f.execution))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Aborted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Summary {
    pub steps: usize,
    pub passed: usize,
    pub failed: usize,
    pub expected_failures: usize,
    pub unexpected_passes: usize,
    pub invariants_checked: usize,
    pub invariant_violations: usize,
    pub retry_divergences: usize,
    pub fuzz_cases: usize,
    pub fuzz_bugs: usize,
    pub transport_errors: usize,
}

impl Summary {
    #[must_use]
    pub fn from_steps(steps: &[StepResult]) -> Self {
        let mut s = Self {
            steps: steps.len(),
            ..Self::default()
        };
        for step in steps {
            match step.outcome {
                StepOutcome::Passed => s.passed += 1,
                StepOutcome::Failed => s.failed += 1,
                StepOutcome::ExpectedFailure => s.expected_failures += 1,
                StepOutcome::UnexpectedPass => s.unexpected_passes += 1,
            }
            let invariants = step
                .invariants
                .iter()
                .chain(step.variants.iter().flat_map(|v| v.invariants.iter()));
            for result in invariants {
                s.invariants_checked += 1;
                if !result.passed {
                    s.invariant_violations += 1;
                }
            }
            if let Some(retry) = &step.retry {
                s.retry_divergences += retry.divergences.len();
            }
            s.fuzz_cases += step.fuzz.len();
            s.fuzz_bugs += step.fuzz.iter().filter(|f| f.verdict.is_bug()).count();
            s.transport_errors += step
                .executions()
                .filter(|e| e.is_transport_error())
                .count();
        }
        s
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TestReport {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub steps: Vec<StepResult>,
    /// Completed with every step passed or an expected failure
    pub passed: bool,
    pub summary: Summary,
    pub duration_ms: u64,
}

impl TestReport {
    #[must_use]
    pub fn completed(steps: Vec<StepResult>, duration_ms: u64) -> Self {
        Self::build(RunStatus::Completed, None, steps, duration_ms)
    }

    #[must_use]
    pub fn aborted(reason: impl Into<String>, steps: Vec<StepResult>, duration_ms: u64) -> Self {
        Self::build(RunStatus::Aborted, Some(reason.into()), steps, duration_ms)
    }

    fn build(
        status: RunStatus,
        abort_reason: Option<String>,
        steps: Vec<StepResult>,
        duration_ms: u64,
    ) -> Self {
        let summary = Summary::from_steps(&steps);
        let passed = status == RunStatus::Completed && steps.iter().all(StepResult::is_ok);
        Self {
            status,
            abort_reason,
            steps,
            passed,
            summary,
            duration_ms,
        }
    }

    #[must_use]
    pub fn step(&self, id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_id == id)
    }
}

/// JSON Schema of [`TestReport`].
#[must_use]
pub fn generate_schema() -> String {
    let schema = schemars::schema_for!(TestReport);
    serde_json::to_string_pretty(&schema).expect("schema serialization should not fail")
}
