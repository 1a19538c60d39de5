//! Test specification data model
//!
//! A [`TestSpecification`] is produced once (by [`crate::config::load`] or
//! programmatically) and never mutated by the engine.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Complete, immutable description of one test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TestSpecification {
    /// Base URL of the target service, e.g. `http://127.0.0.1:5000`
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,

    /// Headers sent with every request (auth, bug-flag toggles, ...)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Where observable state is read from. Without it, snapshot-based
    /// invariants report insufficient data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotSource>,

    /// Ordered steps
    pub steps: Vec<Step>,
}

fn default_timeout_secs() -> f64 {
    5.0
}

impl TestSpecification {
    /// Minimal specification with no steps.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs: default_timeout_secs(),
            headers: BTreeMap::new(),
            snapshot: None,
            steps: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_snapshot(mut self, source: SnapshotSource) -> Self {
        self.snapshot = Some(source);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Look up a step by id.
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Read-style endpoint exposing the state that invariants reason about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SnapshotSource {
    /// Path template of the read endpoint
    #[serde(default = "default_snapshot_resource")]
    pub resource: String,

    /// JSON pointer to the object holding observable fields.
    /// Falls back to the whole body when the pointer is absent.
    #[serde(default = "default_fields_pointer")]
    pub fields_pointer: String,

    /// Declared observable fields; empty means every field
    #[serde(default)]
    pub fields: Vec<String>,
}

fn default_snapshot_resource() -> String {
    "/balance".to_string()
}

fn default_fields_pointer() -> String {
    "/accounts".to_string()
}

impl Default for SnapshotSource {
    fn default() -> Self {
        Self {
            resource: default_snapshot_resource(),
            fields_pointer: default_fields_pointer(),
            fields: Vec::new(),
        }
    }
}

/// HTTP methods a step may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Whether a request body is sent for this method.
    #[must_use]
    pub const fn has_body(self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a step is expected to pass or to expose a bug.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Expectation {
    #[default]
    Pass,
    /// Bug-demo step: an invariant violation is the correct detection
    Fail,
}

/// A request shape with unresolved `${step.field}` references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RequestTemplate {
    pub method: HttpMethod,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

/// One operation in the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Step {
    /// Unique id; later steps reference captured values as `${id.field}`
    pub id: String,

    pub method: HttpMethod,

    /// Path template, e.g. `/accounts/${open.id}`
    pub path: String,

    /// Body template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    /// Extra headers for this step (merged over the global headers)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Invariant names to evaluate after the step
    #[serde(default)]
    pub invariants: Vec<String>,

    /// Expected status for `status_code_expected` (any 2xx when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_status: Option<u16>,

    /// Snapshot resource override for this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuzz: Option<FuzzMode>,

    /// Further valid body templates, each run through the step's invariants
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub valid_cases: Vec<serde_json::Value>,

    /// Also run `amount/10`, `amount*10` and `1.0` variants of the body
    #[serde(default)]
    pub amount_variants: bool,

    #[serde(default)]
    pub expect: Expectation,
}

impl Step {
    #[must_use]
    pub fn new(id: impl Into<String>, method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method,
            path: path.into(),
            body: None,
            headers: BTreeMap::new(),
            invariants: Vec::new(),
            expect_status: None,
            snapshot: None,
            retry: None,
            fuzz: None,
            valid_cases: Vec::new(),
            amount_variants: false,
            expect: Expectation::Pass,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_invariants<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invariants.extend(names.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_expect_status(mut self, status: u16) -> Self {
        self.expect_status = Some(status);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryMode) -> Self {
        self.retry = Some(retry);
        self
    }

    #[must_use]
    pub fn with_fuzz(mut self, fuzz: FuzzMode) -> Self {
        self.fuzz = Some(fuzz);
        self
    }

    #[must_use]
    pub fn with_valid_case(mut self, body: serde_json::Value) -> Self {
        self.valid_cases.push(body);
        self
    }

    #[must_use]
    pub fn with_amount_variants(mut self) -> Self {
        self.amount_variants = true;
        self
    }

    /// Whether any positive-path variants are configured.
    #[must_use]
    pub fn has_variants(&self) -> bool {
        self.amount_variants || !self.valid_cases.is_empty()
    }

    #[must_use]
    pub fn expecting(mut self, expect: Expectation) -> Self {
        self.expect = expect;
        self
    }

    /// The step's request as a template.
    #[must_use]
    pub fn request(&self) -> RequestTemplate {
        RequestTemplate {
            method: self.method,
            path: self.path.clone(),
            body: self.body.clone(),
            headers: self.headers.clone(),
        }
    }

    /// Operation label, e.g. `POST /transfer`
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Spacing between retry attempts. Affects wall-clock time only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Back-to-back, no delay
    #[default]
    Immediate,
    Fixed {
        delay_ms: u64,
    },
    /// `base_ms * 2^(n-1)` before replay `n`, capped at `max_ms`
    Exponential {
        base_ms: u64,
        max_ms: u64,
    },
}

impl RetryStrategy {
    /// Delay before the given 1-based attempt. Attempt 1 is never delayed.
    #[must_use]
    pub fn delay_before(self, attempt: u32) -> std::time::Duration {
        let ms = match self {
            _ if attempt <= 1 => 0,
            Self::Immediate => 0,
            Self::Fixed { delay_ms } => delay_ms,
            Self::Exponential { base_ms, max_ms } => {
                let shift = (attempt - 2).min(32);
                base_ms.saturating_mul(1u64 << shift).min(max_ms)
            }
        };
        std::time::Duration::from_millis(ms)
    }
}

/// Replay the step's operation to check idempotency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RetryMode {
    /// Total attempts including the first (minimum 2)
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default)]
    pub strategy: RetryStrategy,

    /// Header carrying the idempotency key
    #[serde(default = "default_idempotency_header")]
    pub idempotency_header: String,

    /// Key value; defaults to `<step_id>-retry`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,

    /// Compare top-level response body fields between attempts
    #[serde(default = "default_true")]
    pub compare_body: bool,

    /// Body fields excluded from digest comparison
    #[serde(default = "default_ignore_fields")]
    pub ignore_fields: Vec<String>,
}

fn default_attempts() -> u32 {
    3
}

fn default_idempotency_header() -> String {
    "Idempotency-Key".to_string()
}

fn default_true() -> bool {
    true
}

fn default_ignore_fields() -> Vec<String> {
    [
        "idempotent_replay",
        "timestamp",
        "created_at",
        "updated_at",
        "request_id",
        "trace_id",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

impl Default for RetryMode {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            strategy: RetryStrategy::default(),
            idempotency_header: default_idempotency_header(),
            idempotency_key: None,
            compare_body: true,
            ignore_fields: default_ignore_fields(),
        }
    }
}

impl RetryMode {
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Key to send for the given step.
    #[must_use]
    pub fn key_for(&self, step_id: &str) -> String {
        self.idempotency_key
            .clone()
            .unwrap_or_else(|| format!("{step_id}-retry"))
    }
}

/// The enumerated mutation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    DropRequiredField,
    WrongType,
    /// 0, negative, max+1
    BoundaryNumeric,
    OversizedString,
    NullRequiredField,
}

impl MutationKind {
    pub const ALL: [Self; 5] = [
        Self::DropRequiredField,
        Self::WrongType,
        Self::BoundaryNumeric,
        Self::OversizedString,
        Self::NullRequiredField,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DropRequiredField => "drop_required_field",
            Self::WrongType => "wrong_type",
            Self::BoundaryNumeric => "boundary_numeric",
            Self::OversizedString => "oversized_string",
            Self::NullRequiredField => "null_required_field",
        }
    }
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seeded boundary sampling. The seed is mandatory so runs reproduce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RandomSampling {
    pub seed: u64,
    #[serde(default = "default_samples")]
    pub samples: u32,
}

fn default_samples() -> u32 {
    8
}

/// Which mutations to derive from a template.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationPolicy {
    pub kinds: Vec<MutationKind>,
    /// Required fields; empty means every top-level template field
    pub required_fields: Vec<String>,
    /// Declared numeric maximum; `max+1` uses it when set
    pub numeric_max: Option<f64>,
    pub oversized_len: usize,
    pub random: Option<RandomSampling>,
}

fn default_kinds() -> Vec<MutationKind> {
    MutationKind::ALL.to_vec()
}

fn default_oversized_len() -> usize {
    10_000
}

impl Default for MutationPolicy {
    fn default() -> Self {
        Self {
            kinds: default_kinds(),
            required_fields: Vec::new(),
            numeric_max: None,
            oversized_len: default_oversized_len(),
            random: None,
        }
    }
}

/// Explore malformed variants of the step's request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FuzzMode {
    #[serde(default = "default_kinds")]
    pub kinds: Vec<MutationKind>,

    /// Required fields; empty means every top-level template field
    #[serde(default)]
    pub required_fields: Vec<String>,

    /// Declared numeric maximum; `max+1` uses it when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_max: Option<f64>,

    #[serde(default = "default_oversized_len")]
    pub oversized_len: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random: Option<RandomSampling>,

    /// Worker threads; only honoured with `resource_independent`
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Cases touch independent resources and may run concurrently
    #[serde(default)]
    pub resource_independent: bool,

    /// Request issued before every case to restore a known state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<RequestTemplate>,
}

fn default_workers() -> usize {
    1
}

impl Default for FuzzMode {
    fn default() -> Self {
        let policy = MutationPolicy::default();
        Self {
            kinds: policy.kinds,
            required_fields: policy.required_fields,
            numeric_max: policy.numeric_max,
            oversized_len: policy.oversized_len,
            random: policy.random,
            workers: default_workers(),
            resource_independent: false,
            reset: None,
        }
    }
}

impl FuzzMode {
    #[must_use]
    pub fn with_kinds(mut self, kinds: &[MutationKind]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }

    /// The generator input for this mode.
    #[must_use]
    pub fn policy(&self) -> MutationPolicy {
        MutationPolicy {
            kinds: self.kinds.clone(),
            required_fields: self.required_fields.clone(),
            numeric_max: self.numeric_max,
            oversized_len: self.oversized_len,
            random: self.random,
        }
    }
}
