//! Iteration corridor: restricted-action state during active fix-loops.
//!
//! The corridor is a live classification re-derived from phase state on
//! every event, never persisted. While a phase sits inside a failing test
//! loop or pending compliance validation, escape actions (advance or
//! delegate intent) are blocked; investigation and remediation stay open.

use crate::core::config::PhaseRequirements;
use crate::core::patterns::{classify_intent, Intent};
use crate::core::state::{
    ComplianceStatus, IterationStatus, PhaseState, TestRunResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corridor {
    /// Tests are failing and the fix-loop is still open.
    Test,
    /// Tests are done; compliance validation is pending.
    Constitutional,
    None,
}

/// Re-derive the corridor for the current phase.
pub fn classify(phase: Option<&PhaseState>, cfg: Option<&PhaseRequirements>) -> Corridor {
    let Some(cfg) = cfg else {
        return Corridor::None;
    };

    let iteration = phase.and_then(|p| p.iteration_requirements.test_iteration.as_ref());
    let test_enabled = cfg
        .test_iteration
        .as_ref()
        .map(|c| c.enabled)
        .unwrap_or(false);

    if test_enabled {
        if let Some(it) = iteration {
            if !it.completed
                && it.status != IterationStatus::Escalated
                && it.last_test_result == TestRunResult::Failed
            {
                return Corridor::Test;
            }
        }
    }

    // The constitutional corridor only opens once tests are settled.
    let tests_satisfied = !test_enabled
        || iteration
            .map(|it| {
                it.completed
                    || (it.status == IterationStatus::Escalated && it.escalation_approved)
            })
            .unwrap_or(false);
    if !tests_satisfied {
        return Corridor::None;
    }

    let compliance_required = cfg
        .constitutional_validation
        .as_ref()
        .map(|c| c.required)
        .unwrap_or(false);
    if !compliance_required {
        return Corridor::None;
    }

    match phase.and_then(|p| p.constitutional_validation.as_ref()) {
        Some(compliance) => {
            let open = !compliance.completed
                && compliance.status != ComplianceStatus::Compliant
                && compliance.status != ComplianceStatus::Escalated;
            if open {
                Corridor::Constitutional
            } else {
                Corridor::None
            }
        }
        // Required but never started while tests already completed.
        None => {
            let tests_completed = iteration.map(|it| it.completed).unwrap_or(false);
            if tests_completed {
                Corridor::Constitutional
            } else {
                Corridor::None
            }
        }
    }
}

/// Blocking message when an escape action is attempted inside a corridor.
/// `None` means the action passes.
pub fn guard(
    corridor: Corridor,
    text: &str,
    phase: Option<&PhaseState>,
    cfg: Option<&PhaseRequirements>,
) -> Option<String> {
    if corridor == Corridor::None {
        return None;
    }
    if classify_intent(text) != Intent::Advance {
        return None;
    }
    match corridor {
        Corridor::Test => {
            let iteration = phase.and_then(|p| p.iteration_requirements.test_iteration.as_ref());
            let (current, max, last_error) = iteration
                .map(|it| {
                    (
                        it.current_iteration,
                        it.max_iterations,
                        it.history
                            .last()
                            .and_then(|r| r.error.clone())
                            .unwrap_or_else(|| "(no error captured)".to_string()),
                    )
                })
                .unwrap_or((0, 0, "(no error captured)".to_string()));
            Some(format!(
                "Cannot advance or delegate: tests are failing (iteration {current} of {max}). \
                 Fix the failure and re-run the test command. Last error: {}",
                crate::core::output::compact_line(&last_error, 200)
            ))
        }
        Corridor::Constitutional => {
            let articles = cfg
                .and_then(|c| c.constitutional_validation.as_ref())
                .map(|c| c.articles_required.join(", "))
                .unwrap_or_default();
            let used = phase
                .and_then(|p| p.constitutional_validation.as_ref())
                .map(|c| c.iterations_used)
                .unwrap_or(0);
            Some(format!(
                "Cannot advance or delegate: constitutional validation is pending \
                 (articles required: {articles}; {used} validation iteration(s) used). \
                 Complete compliance validation first."
            ))
        }
        Corridor::None => None,
    }
}
