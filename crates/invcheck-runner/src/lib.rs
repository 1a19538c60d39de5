//! invcheck-runner: executes test specifications against a live target

pub mod engine;
pub mod executor;
pub mod mutation;
pub mod transport;
pub mod variants;

pub use engine::evaluator::{EvaluationInputs, SnapshotInput, evaluate};
pub use engine::fuzz::FuzzExplorer;
pub use engine::retry::{RetryRun, RetrySimulator};
pub use engine::snapshot::{SnapshotProvider, SnapshotUnavailable};
pub use engine::{RunState, SequenceRunner};
pub use executor::{Executor, ResolvedRequest};
pub use mutation::generate_cases;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
pub use variants::PayloadVariant;

/// Errors that stop the runner from being built.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("HTTP client error: {0}")]
    Http(String),
}
