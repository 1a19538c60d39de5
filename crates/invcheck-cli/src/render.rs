//! Report rendering for `--output terminal|json`

use std::fmt::Write as _;

use invcheck_core::{
    Execution, FuzzCaseResult, InvariantStatus, StepOutcome, StepResult, TestReport, Verdict,
};

/// Human-readable report: one line per step, details under failures.
#[must_use]
pub fn terminal(report: &TestReport, verdict: &Verdict) -> String {
    let mut out = String::new();
    let width = report
        .steps
        .iter()
        .map(|s| s.step_id.len())
        .max()
        .unwrap_or(0);

    for step in &report.steps {
        let _ = writeln!(
            out,
            "[{:<5}] {:<width$}  {} {} -> {}",
            step.outcome.as_str(),
            step.step_id,
            step.method,
            step.path,
            response_label(&step.execution),
        );
        if show_details(step) {
            details(&mut out, step);
        }
    }

    if let Some(reason) = &report.abort_reason {
        let _ = writeln!(out, "\nAborted: {reason}");
    }

    let s = &report.summary;
    let icon = if verdict.exit_code == 0 { "PASS" } else { "FAIL" };
    let _ = writeln!(out, "\n{icon}: {}", verdict.reason);
    let _ = writeln!(
        out,
        "  Steps: {} total, {} passed, {} failed, {} expected failure(s), {} unexpected pass(es)",
        s.steps, s.passed, s.failed, s.expected_failures, s.unexpected_passes
    );
    let _ = writeln!(
        out,
        "  Invariants: {} checked, {} not held",
        s.invariants_checked, s.invariant_violations
    );
    if s.retry_divergences > 0 || s.fuzz_cases > 0 {
        let _ = writeln!(
            out,
            "  Retry divergences: {}, fuzz cases: {} ({} bug(s))",
            s.retry_divergences, s.fuzz_cases, s.fuzz_bugs
        );
    }
    if s.transport_errors > 0 {
        let _ = writeln!(out, "  Transport errors: {}", s.transport_errors);
    }
    let _ = writeln!(out, "  Duration: {}ms", report.duration_ms);
    let _ = write!(out, "  Exit code: {}", verdict.exit_code);
    out
}

fn show_details(step: &StepResult) -> bool {
    step.outcome != StepOutcome::Passed
        || step.invariants.iter().any(|r| !r.passed)
        || step.variants.iter().any(|v| !v.passed())
        || step.fuzz.iter().any(|c| !c.passed)
}

fn details(out: &mut String, step: &StepResult) {
    for result in &step.invariants {
        let _ = writeln!(
            out,
            "        {} {}: {}",
            mark(result.status),
            result.name,
            result.diagnostic
        );
    }
    if let Some(retry) = &step.retry {
        for d in &retry.divergences {
            let _ = writeln!(out, "        retry: {d}");
        }
    }
    for variant in step.variants.iter().filter(|v| !v.passed()) {
        let _ = writeln!(
            out,
            "        variant [{}] -> {}",
            variant.label,
            response_label(&variant.execution)
        );
        for result in variant.invariants.iter().filter(|r| !r.passed) {
            let _ = writeln!(
                out,
                "          {} {}: {}",
                mark(result.status),
                result.name,
                result.diagnostic
            );
        }
    }
    for case in step.fuzz.iter().filter(|c| !c.passed) {
        fuzz_line(out, case);
    }
    if step.outcome == StepOutcome::UnexpectedPass {
        let _ = writeln!(out, "        expected a failure, nothing was detected");
    }
}

fn mark(status: InvariantStatus) -> &'static str {
    match status {
        InvariantStatus::Held => "ok",
        InvariantStatus::Violated => "x",
        InvariantStatus::InsufficientData => "?",
    }
}

fn fuzz_line(out: &mut String, case: &FuzzCaseResult) {
    let _ = writeln!(
        out,
        "        fuzz [{}] {}: {}",
        case.verdict, case.case.label, case.diagnostic
    );
}

fn response_label(execution: &Execution) -> String {
    match (execution.status, &execution.transport_error) {
        (Some(status), _) => format!("{status} ({}ms)", execution.latency_ms),
        (None, Some(err)) => format!("error: {err}"),
        (None, None) => "no response".to_string(),
    }
}

/// Machine-readable report with the verdict attached.
#[must_use]
pub fn json(report: &TestReport, verdict: &Verdict) -> serde_json::Value {
    serde_json::json!({
        "verdict": {
            "status": verdict.status.to_string(),
            "exit_code": verdict.exit_code,
            "reason": verdict.reason,
        },
        "report": report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use invcheck_core::{
        Expectation, FailureReason, HttpMethod, InvariantKind, InvariantResult, ReasonKind,
        VariantResult, VerdictPolicy,
    };
    use std::collections::BTreeMap;

    fn step(id: &str, expect: Expectation, invariant: InvariantResult) -> StepResult {
        let reasons = if invariant.passed {
            Vec::new()
        } else {
            vec![FailureReason::new(
                ReasonKind::InvariantViolated,
                invariant.diagnostic.clone(),
            )]
        };
        StepResult {
            index: 0,
            step_id: id.to_string(),
            method: HttpMethod::Post,
            path: "/transfer".to_string(),
            execution: Execution {
                method: HttpMethod::Post,
                url: "http://bank.test/transfer".to_string(),
                request_headers: BTreeMap::new(),
                request_body: None,
                status: Some(200),
                body: None,
                latency_ms: 4,
                transport_error: None,
            },
            before: None,
            after: None,
            invariants: vec![invariant],
            retry: None,
            variants: Vec::new(),
            fuzz: Vec::new(),
            expect,
            outcome: StepOutcome::decide(expect, &reasons),
            reasons,
        }
    }

    #[test]
    fn terminal_marks_each_step() {
        let report = TestReport::completed(
            vec![
                step(
                    "transfer",
                    Expectation::Pass,
                    InvariantResult::held(InvariantKind::BalanceConservation, "total 200.00 conserved"),
                ),
                step(
                    "overdraft",
                    Expectation::Fail,
                    InvariantResult::violated(
                        InvariantKind::NoNegativeBalance,
                        "negative balance: A=-50.00",
                    ),
                ),
            ],
            12,
        );
        let verdict = VerdictPolicy::default().verdict(&report);
        let text = terminal(&report, &verdict);

        assert!(text.contains("[PASS ] transfer   POST /transfer -> 200 (4ms)"), "{text}");
        assert!(text.contains("[XFAIL] overdraft"));
        assert!(text.contains("x no_negative_balance: negative balance: A=-50.00"));
        assert!(!text.contains("ok balance_conservation"));
        assert!(text.contains("PASS: All 2 steps passed (1 expected failure(s) confirmed)"));
        assert!(text.ends_with("Exit code: 0"));
    }

    #[test]
    fn failing_variant_is_listed_under_its_step() {
        let mut transfer = step(
            "transfer",
            Expectation::Pass,
            InvariantResult::held(InvariantKind::NoNegativeBalance, "all 2 balances non-negative"),
        );
        let mut execution = transfer.execution.clone();
        execution.status = Some(200);
        transfer.variants = vec![
            VariantResult {
                index: 0,
                label: "amount=5".into(),
                execution: execution.clone(),
                before: None,
                after: None,
                invariants: vec![InvariantResult::held(InvariantKind::NoNegativeBalance, "ok")],
            },
            VariantResult {
                index: 1,
                label: "amount=500".into(),
                execution,
                before: None,
                after: None,
                invariants: vec![InvariantResult::violated(
                    InvariantKind::NoNegativeBalance,
                    "negative balance: A=-450.00",
                )],
            },
        ];
        let report = TestReport::completed(vec![transfer], 5);
        let verdict = VerdictPolicy::default().verdict(&report);
        let text = terminal(&report, &verdict);

        assert!(text.contains("variant [amount=500] -> 200 (4ms)"), "{text}");
        assert!(text.contains("x no_negative_balance: negative balance: A=-450.00"));
        assert!(!text.contains("variant [amount=5] "));
    }

    #[test]
    fn json_carries_verdict_and_report() {
        let report = TestReport::aborted("step 'x': unknown invariant 'y'", Vec::new(), 1);
        let verdict = VerdictPolicy::default().verdict(&report);
        let value = json(&report, &verdict);
        assert_eq!(value["verdict"]["exit_code"], 2);
        assert_eq!(value["report"]["status"], "aborted");
        assert_eq!(value["report"]["abort_reason"], "step 'x': unknown invariant 'y'");
    }
}
