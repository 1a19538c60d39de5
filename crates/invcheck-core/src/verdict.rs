//! Verdict policy: report -> pass/fail and process exit code

use crate::report::{RunStatus, StepOutcome, TestReport};

pub const EXIT_OK: i32 = 0;
/// Bug detected, bug-demo step missed its bug (strict), or infrastructure failure
pub const EXIT_FAILED: i32 = 1;
/// Specification failed to load or the run aborted
pub const EXIT_CONFIG: i32 = 2;
/// The tool itself could not operate
pub const EXIT_TOOL: i32 = 3;

/// Policy for judging a finished report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerdictPolicy {
    /// Strict mode: a bug-demo step that detects nothing fails the run
    pub strict: bool,
}

impl Default for VerdictPolicy {
    fn default() -> Self {
        Self { strict: true }
    }
}

impl VerdictPolicy {
    /// Unexpected passes are tolerated.
    #[must_use]
    pub fn lenient() -> Self {
        Self { strict: false }
    }

    #[must_use]
    pub fn verdict(&self, report: &TestReport) -> Verdict {
        if report.status == RunStatus::Aborted {
            return Verdict {
                status: VerdictStatus::Fail,
                exit_code: EXIT_CONFIG,
                reason: format!(
                    "run aborted: {}",
                    report.abort_reason.as_deref().unwrap_or("configuration error")
                ),
            };
        }

        let failed = count(report, StepOutcome::Failed);
        let unexpected = count(report, StepOutcome::UnexpectedPass);
        let expected = count(report, StepOutcome::ExpectedFailure);

        let mut parts = Vec::new();
        if failed > 0 {
            parts.push(format!("{failed} step(s) failed"));
        }
        if unexpected > 0 {
            parts.push(format!("{unexpected} bug-demo step(s) detected nothing"));
        }

        let exit_code = if failed > 0 || (self.strict && unexpected > 0) {
            EXIT_FAILED
        } else {
            EXIT_OK
        };
        let status = if exit_code == EXIT_OK {
            VerdictStatus::Pass
        } else {
            VerdictStatus::Fail
        };

        let reason = if parts.is_empty() {
            if expected > 0 {
                format!(
                    "All {} steps passed ({expected} expected failure(s) confirmed)",
                    report.steps.len()
                )
            } else {
                format!("All {} steps passed", report.steps.len())
            }
        } else {
            parts.join("; ")
        };

        Verdict {
            status,
            exit_code,
            reason,
        }
    }
}

fn count(report: &TestReport, outcome: StepOutcome) -> usize {
    report.steps.iter().filter(|s| s.outcome == outcome).count()
}

/// Final verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub exit_code: i32,
    pub reason: String,
}

/// Pass or fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictStatus {
    Pass,
    Fail,
}

impl std::fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures::step;
    use crate::report::{FailureReason, ReasonKind};
    use crate::spec::Expectation;

    fn violation() -> Vec<FailureReason> {
        vec![FailureReason::new(ReasonKind::InvariantViolated, "A=-50.00")]
    }

    #[test]
    fn default_policy_is_strict() {
        assert!(VerdictPolicy::default().strict);
    }

    #[test]
    fn clean_run_exits_zero() {
        let report = TestReport::completed(vec![step("a", Expectation::Pass, vec![])], 5);
        let v = VerdictPolicy::default().verdict(&report);
        assert_eq!(v.status, VerdictStatus::Pass);
        assert_eq!(v.exit_code, EXIT_OK);
        assert_eq!(v.reason, "All 1 steps passed");
    }

    #[test]
    fn confirmed_bug_demo_exits_zero() {
        let report = TestReport::completed(vec![step("bug", Expectation::Fail, violation())], 5);
        let v = VerdictPolicy::default().verdict(&report);
        assert_eq!(v.exit_code, EXIT_OK);
        assert!(v.reason.contains("1 expected failure"));
    }

    #[test]
    fn detected_bug_on_pass_step_exits_one() {
        let report = TestReport::completed(vec![step("t", Expectation::Pass, violation())], 5);
        let v = VerdictPolicy::default().verdict(&report);
        assert_eq!(v.status, VerdictStatus::Fail);
        assert_eq!(v.exit_code, EXIT_FAILED);
    }

    #[test]
    fn unexpected_pass_depends_on_strictness() {
        let report = TestReport::completed(vec![step("bug", Expectation::Fail, vec![])], 5);
        assert_eq!(VerdictPolicy::default().verdict(&report).exit_code, EXIT_FAILED);
        assert_eq!(VerdictPolicy::lenient().verdict(&report).exit_code, EXIT_OK);
    }

    #[test]
    fn aborted_run_exits_two() {
        let report = TestReport::aborted("step 't': unknown invariant 'x'", vec![], 1);
        let v = VerdictPolicy::default().verdict(&report);
        assert_eq!(v.exit_code, EXIT_CONFIG);
        assert!(v.reason.contains("unknown invariant"));
    }
}
