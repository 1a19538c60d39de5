//! Invariant kinds and evaluation results

use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Absolute tolerance for numeric comparisons.
pub const TOLERANCE: f64 = 1e-9;

/// The closed set of supported invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InvariantKind {
    /// Every observed balance is >= 0
    NoNegativeBalance,
    /// Sum of observed balances is unchanged by the step
    BalanceConservation,
    /// Replaying with the same idempotency key produced no extra effect
    NoDuplicateSideEffectOnRetry,
    /// Response status matches `expect_status` (any 2xx when unset)
    StatusCodeExpected,
}

/// Inputs an invariant needs before it can be judged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requirements {
    pub before: bool,
    pub after: bool,
    pub retry: bool,
    pub response: bool,
}

impl Requirements {
    /// Union of two requirement sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self {
            before: self.before || other.before,
            after: self.after || other.after,
            retry: self.retry || other.retry,
            response: self.response || other.response,
        }
    }

    #[must_use]
    pub const fn needs_snapshots(self) -> bool {
        self.before || self.after
    }
}

impl InvariantKind {
    pub const ALL: [Self; 4] = [
        Self::NoNegativeBalance,
        Self::BalanceConservation,
        Self::NoDuplicateSideEffectOnRetry,
        Self::StatusCodeExpected,
    ];

    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoNegativeBalance => "no_negative_balance",
            Self::BalanceConservation => "balance_conservation",
            Self::NoDuplicateSideEffectOnRetry => "no_duplicate_side_effect_on_retry",
            Self::StatusCodeExpected => "status_code_expected",
        }
    }

    /// Accepted spellings, canonical first.
    #[must_use]
    pub const fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::NoNegativeBalance => &["no_negative_balance", "balance_non_negative"],
            Self::BalanceConservation => &["balance_conservation", "money_conserved"],
            Self::NoDuplicateSideEffectOnRetry => {
                &["no_duplicate_side_effect_on_retry", "idempotent"]
            }
            Self::StatusCodeExpected => &["status_code_expected"],
        }
    }

    #[must_use]
    pub const fn requirements(self) -> Requirements {
        match self {
            Self::NoNegativeBalance => Requirements {
                before: false,
                after: true,
                retry: false,
                response: false,
            },
            Self::BalanceConservation => Requirements {
                before: true,
                after: true,
                retry: false,
                response: false,
            },
            Self::NoDuplicateSideEffectOnRetry => Requirements {
                before: false,
                after: false,
                retry: true,
                response: false,
            },
            Self::StatusCodeExpected => Requirements {
                before: false,
                after: false,
                retry: false,
                response: true,
            },
        }
    }
}

impl std::fmt::Display for InvariantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown invariant '{0}'")]
pub struct UnknownInvariant(pub String);

impl FromStr for InvariantKind {
    type Err = UnknownInvariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.aliases().contains(&name))
            .ok_or_else(|| UnknownInvariant(s.to_string()))
    }
}

/// Outcome of one invariant evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InvariantStatus {
    Held,
    Violated,
    /// A required input was missing; counts as a failure
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InvariantResult {
    /// Name as written in the specification
    pub name: String,
    pub kind: InvariantKind,
    pub passed: bool,
    pub status: InvariantStatus,
    pub diagnostic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_snapshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_snapshot: Option<String>,
}

impl InvariantResult {
    #[must_use]
    pub fn held(kind: InvariantKind, diagnostic: impl Into<String>) -> Self {
        Self::with_status(kind, InvariantStatus::Held, diagnostic)
    }

    #[must_use]
    pub fn violated(kind: InvariantKind, diagnostic: impl Into<String>) -> Self {
        Self::with_status(kind, InvariantStatus::Violated, diagnostic)
    }

    /// Fail closed for a missing input.
    #[must_use]
    pub fn insufficient(kind: InvariantKind, missing: &str) -> Self {
        Self::with_status(
            kind,
            InvariantStatus::InsufficientData,
            format!("insufficient data: {missing}"),
        )
    }

    fn with_status(kind: InvariantKind, status: InvariantStatus, diagnostic: impl Into<String>) -> Self {
        Self {
            name: kind.as_str().to_string(),
            kind,
            passed: status == InvariantStatus::Held,
            status,
            diagnostic: diagnostic.into(),
            before_snapshot: None,
            after_snapshot: None,
        }
    }

    /// Keep the name the specification used (e.g. an alias).
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_snapshots(mut self, before: Option<String>, after: Option<String>) -> Self {
        self.before_snapshot = before;
        self.after_snapshot = after;
        self
    }

    /// A real detection, as opposed to missing data.
    #[must_use]
    pub fn is_violation(&self) -> bool {
        self.status == InvariantStatus::Violated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_and_aliases() {
        assert_eq!(
            "balance_non_negative".parse::<InvariantKind>().unwrap(),
            InvariantKind::NoNegativeBalance
        );
        assert_eq!(
            "money_conserved".parse::<InvariantKind>().unwrap(),
            InvariantKind::BalanceConservation
        );
        assert_eq!(
            "idempotent".parse::<InvariantKind>().unwrap(),
            InvariantKind::NoDuplicateSideEffectOnRetry
        );
        for kind in InvariantKind::ALL {
            assert_eq!(kind.as_str().parse::<InvariantKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "balance_positive".parse::<InvariantKind>().unwrap_err();
        assert_eq!(err.to_string(), "unknown invariant 'balance_positive'");
    }

    #[test]
    fn requirements_table() {
        assert!(InvariantKind::BalanceConservation.requirements().before);
        assert!(!InvariantKind::NoNegativeBalance.requirements().before);
        assert!(InvariantKind::NoNegativeBalance.requirements().after);
        assert!(InvariantKind::NoDuplicateSideEffectOnRetry.requirements().retry);
        assert!(!InvariantKind::StatusCodeExpected.requirements().needs_snapshots());
    }

    #[test]
    fn insufficient_fails_closed() {
        let r = InvariantResult::insufficient(InvariantKind::BalanceConservation, "before snapshot");
        assert!(!r.passed);
        assert!(!r.is_violation());
        assert_eq!(r.diagnostic, "insufficient data: before snapshot");
    }
}
