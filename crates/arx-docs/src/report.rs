//! Policy rule ledger.
//!
//! Validators run inside an [`evaluate`] scope: every rule outcome is
//! recorded in a task-local [`Report`], and the scope surfaces a single
//! [`DocError::PolicyBreach`] carrying the full ledger if anything failed.
//! Outside a scope, [`check`] propagates the failure immediately instead.

use std::cell::RefCell;

use crate::error::{DocError, Result};

tokio::task_local! {
    static SCOPE: RefCell<Report>;
}

/// Outcome of one applied rule.
#[derive(Debug, Clone)]
pub struct RuleOutcome {
    pub rule: &'static str,
    pub ok: bool,
    pub detail: Option<String>,
}

/// Append-only record of applied policies and failures within one scope.
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub label: String,
    pub entries: Vec<RuleOutcome>,
}

impl Report {
    pub fn new(label: impl Into<String>) -> Self {
        Report {
            label: label.into(),
            entries: Vec::new(),
        }
    }

    pub fn applied(&self) -> usize {
        self.entries.len()
    }

    pub fn failed(&self) -> usize {
        self.entries.iter().filter(|e| !e.ok).count()
    }

    fn push(&mut self, rule: &'static str, outcome: &Result<()>) {
        self.entries.push(RuleOutcome {
            rule,
            ok: outcome.is_ok(),
            detail: outcome.as_ref().err().map(|e| e.to_string()),
        });
    }
}

/// Record a rule outcome. Inside an [`evaluate`] scope the failure is
/// collected and `Ok(())` returned so later rules still run; outside, the
/// outcome passes straight through.
pub fn check(rule: &'static str, outcome: Result<()>) -> Result<()> {
    let collected = SCOPE
        .try_with(|scope| scope.borrow_mut().push(rule, &outcome))
        .is_ok();
    if collected {
        if let Err(e) = &outcome {
            tracing::debug!(target: "portfolio", rule, error = %e, "rule failed");
        }
        Ok(())
    } else {
        outcome
    }
}

/// Shorthand for boolean rules.
pub fn check_that(rule: &'static str, cond: bool, detail: &str) -> Result<()> {
    check(
        rule,
        if cond {
            Ok(())
        } else {
            Err(DocError::Malformed(detail.to_string()))
        },
    )
}

/// Run `f` with a fresh task-local report; all-or-nothing. A clean run
/// returns `f`'s value, any recorded failure raises `PolicyBreach` with the
/// complete report, and a hard (non-rule) error propagates as itself.
pub fn evaluate<T>(label: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    SCOPE.sync_scope(RefCell::new(Report::new(label)), || {
        let out = f();
        let report = SCOPE.with(|scope| scope.borrow().clone());
        match out {
            Err(e) => Err(e),
            Ok(value) if report.failed() == 0 => Ok(value),
            Ok(_) => {
                tracing::info!(
                    target: "portfolio",
                    label,
                    applied = report.applied(),
                    failed = report.failed(),
                    "policy breach"
                );
                Err(DocError::PolicyBreach(report))
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_scope_passes_value_through() {
        let out = evaluate("test", || {
            check_that("always", true, "")?;
            Ok(42)
        })
        .unwrap();
        assert_eq!(out, 42);
    }

    #[test]
    fn failures_collect_and_breach() {
        let err = evaluate("test", || {
            check_that("first", false, "first failed")?;
            check_that("second", true, "")?;
            check_that("third", false, "third failed")?;
            Ok(())
        })
        .unwrap_err();
        match err {
            DocError::PolicyBreach(report) => {
                assert_eq!(report.applied(), 3);
                assert_eq!(report.failed(), 2);
                assert_eq!(report.entries[0].rule, "first");
                assert!(report.entries[1].ok);
            }
            other => panic!("expected PolicyBreach, got {other:?}"),
        }
    }

    #[test]
    fn outside_scope_propagates_directly() {
        assert!(check_that("standalone", false, "boom").is_err());
        assert!(check_that("standalone", true, "").is_ok());
    }

    #[test]
    fn scopes_reset_between_runs() {
        let _ = evaluate("first", || check_that("a", false, "x"));
        let out = evaluate("second", || check_that("b", true, ""));
        assert!(out.is_ok());
    }
}
