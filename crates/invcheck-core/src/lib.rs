//! invcheck-core: Data model and judgement logic for invariant-driven API testing
//!
//! This crate holds everything that does not touch the network: the test
//! specification and its loader, template references between steps,
//! invariant kinds, state snapshots, report types, and the verdict policy.

pub mod config;
pub mod dump;
pub mod error;
pub mod invariant;
pub mod report;
pub mod snapshot;
pub mod spec;
pub mod template;
pub mod verdict;

pub use config::{ConfigError, Format};
pub use dump::{DumpError, DumpIndex};
pub use error::ConfigurationError;
pub use invariant::{InvariantKind, InvariantResult, InvariantStatus, Requirements};
pub use report::{
    AttemptDigest, Divergence, Execution, FailureReason, FuzzCase, FuzzCaseResult, FuzzVerdict,
    ReasonKind, RetryOutcome, RunStatus, StepOutcome, StepResult, Summary, TestReport,
    VariantResult,
};
pub use snapshot::Snapshot;
pub use spec::{
    Expectation, FuzzMode, HttpMethod, MutationKind, MutationPolicy, RandomSampling,
    RequestTemplate, RetryMode, RetryStrategy, SnapshotSource, Step, TestSpecification,
};
pub use template::{Context, TemplateError};
pub use verdict::{Verdict, VerdictPolicy, VerdictStatus};
