//! Errors that abort a run

/// A defect in the test specification discovered while running it.
///
/// These are the only errors that stop the sequence; invariant violations and
/// transport failures are recorded in the report instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("step '{step}': unresolved reference '${{{reference}}}': {reason}")]
    UnresolvedReference {
        step: String,
        reference: String,
        reason: String,
    },
    #[error("step '{step}': unknown invariant '{name}'")]
    UnknownInvariant { step: String, name: String },
}
