//! Test-run iteration tracking with a fuzzy circuit breaker.
//!
//! Triggered only by detected test-execution commands. Parses run output
//! into passed/failed/inconclusive, advances the iteration counters, and
//! escalates when the same normalized failure repeats or the iteration
//! ceiling is hit. Escalation is a recorded terminal state for external
//! review, not a block; the corridor does the blocking.

use crate::core::config::{EngineConfig, TestIterationConfig};
use crate::core::patterns;
use crate::core::state::{
    Escalation, EscalationReason, IterationRecord, IterationStatus, TestIterationState,
    TestRunResult, WorkflowState,
};
use crate::core::time::now_rfc3339;
use regex::Regex;
use std::sync::LazyLock;

/// One parsed test run.
#[derive(Debug, Clone)]
pub struct ParsedRun {
    pub result: TestRunResult,
    pub failures: u32,
    pub error: Option<String>,
}

/// Parse captured output plus optional exit code.
///
/// An exit code is authoritative even when no text pattern matches.
/// Inconclusive is returned only when neither signal matches and no exit
/// code is available.
pub fn parse_result(output: &str, exit_code: Option<i64>) -> ParsedRun {
    let failures = count_failures(output);
    let error = extract_error(output);
    match exit_code {
        Some(0) => ParsedRun {
            result: TestRunResult::Passed,
            failures: 0,
            error: None,
        },
        Some(_) => ParsedRun {
            result: TestRunResult::Failed,
            failures: failures.max(1),
            error: error.or_else(|| Some("test command exited non-zero".to_string())),
        },
        None => {
            if patterns::has_failure_signal(output) {
                ParsedRun {
                    result: TestRunResult::Failed,
                    failures: failures.max(1),
                    error,
                }
            } else if patterns::has_success_signal(output) {
                ParsedRun {
                    result: TestRunResult::Passed,
                    failures: 0,
                    error: None,
                }
            } else {
                ParsedRun {
                    result: TestRunResult::Inconclusive,
                    failures: 0,
                    error: None,
                }
            }
        }
    }
}

static FAILED_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s+failed").unwrap());

fn count_failures(output: &str) -> u32 {
    FAILED_COUNT
        .captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// First failing line plus a little context, bounded.
fn extract_error(output: &str) -> Option<String> {
    let lines: Vec<&str> = output.lines().collect();
    let idx = lines
        .iter()
        .position(|line| patterns::has_failure_signal(line))?;
    let snippet = lines[idx..lines.len().min(idx + 3)].join("\n");
    Some(snippet.trim().to_string())
}

static ISO_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:?\d{2})?)?")
        .unwrap()
});
static STACK_FRAME_PARENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bat\s+\S+\s*\([^)]*\)").unwrap());
static STACK_FRAME_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*at\s+\S+\s*$").unwrap());
static LINE_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":\d+:\d+\b").unwrap());
static HEX_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b0x[0-9a-fA-F]+\b").unwrap());

/// Normalize a failure message so incidental detail (timestamps, stack
/// frames, line:column references, memory addresses) does not defeat
/// identical-failure detection.
pub fn normalize_error(error: &str) -> String {
    let mut text = ISO_TIMESTAMP.replace_all(error, "").into_owned();
    text = STACK_FRAME_PARENS.replace_all(&text, "").into_owned();
    text = STACK_FRAME_BARE.replace_all(&text, "").into_owned();
    text = LINE_COLUMN.replace_all(&text, "").into_owned();
    text = HEX_ADDRESS.replace_all(&text, "").into_owned();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Outcome of recording one run.
#[derive(Debug, Clone)]
pub struct TrackerVerdict {
    pub message: String,
    pub escalated: Option<EscalationReason>,
}

/// Record one parsed run against the phase's iteration state.
///
/// The iteration counter advances on every recorded run. Failure counters
/// and the circuit breaker move only on conclusive failures, so ambiguous
/// output can never trigger escalation on its own, while the iteration
/// ceiling still applies to every recorded run.
pub fn record_run(
    state: &mut TestIterationState,
    command: &str,
    run: &ParsedRun,
    max_iterations: u32,
    breaker_threshold: u32,
) -> TrackerVerdict {
    state.max_iterations = max_iterations;
    state.current_iteration += 1;
    state.last_test_result = run.result;

    // Prior entries before this run, for the identical-failure window.
    let recent_errors: Vec<String> = state
        .history
        .iter()
        .rev()
        .take(2)
        .filter_map(|r| r.error.as_deref().map(normalize_error))
        .collect();

    state.history.push(IterationRecord {
        iteration: state.current_iteration,
        timestamp: now_rfc3339(),
        command: command.to_string(),
        result: run.result,
        failures: run.failures,
        error: run.error.clone(),
    });

    match run.result {
        TestRunResult::Passed => {
            state.completed = true;
            state.status = IterationStatus::Success;
            state.identical_failure_count = 0;
            return TrackerVerdict {
                message: format!(
                    "Tests passed on iteration {}. Next requirement: constitutional validation.",
                    state.current_iteration
                ),
                escalated: None,
            };
        }
        TestRunResult::Failed => {
            state.failures_count += 1;
            let normalized = run.error.as_deref().map(normalize_error).unwrap_or_default();
            let window_matches = !recent_errors.is_empty()
                && recent_errors.iter().all(|prev| *prev == normalized);
            if window_matches && !normalized.is_empty() {
                state.identical_failure_count += 1;
            } else {
                state.identical_failure_count = 1;
            }

            if state.identical_failure_count >= breaker_threshold {
                return escalate(state, EscalationReason::CircuitBreaker);
            }
        }
        TestRunResult::Inconclusive => {
            // Recorded, but never feeds the breaker.
        }
    }

    if state.current_iteration >= max_iterations {
        return escalate(state, EscalationReason::MaxIterations);
    }

    let remaining = max_iterations - state.current_iteration;
    let last_error = state
        .history
        .last()
        .and_then(|r| r.error.as_deref())
        .unwrap_or("(no error captured)");
    TrackerVerdict {
        message: format!(
            "Test iteration {} recorded ({:?}). {} attempt(s) remain. Last error: {}",
            state.current_iteration,
            run.result,
            remaining,
            crate::core::output::compact_line(last_error, 200),
        ),
        escalated: None,
    }
}

fn escalate(state: &mut TestIterationState, reason: EscalationReason) -> TrackerVerdict {
    state.status = IterationStatus::Escalated;
    state.escalation_reason = Some(reason);
    let message = match reason {
        EscalationReason::CircuitBreaker => format!(
            "Circuit breaker tripped: the same failure repeated {} times. \
             Escalated for external review.",
            state.identical_failure_count
        ),
        EscalationReason::MaxIterations => format!(
            "Iteration ceiling reached ({} of {}). Escalated for external review.",
            state.current_iteration, state.max_iterations
        ),
    };
    TrackerVerdict {
        message,
        escalated: Some(reason),
    }
}

/// Full post-action handling for a shell event that ran tests.
///
/// Returns advisory text when anything was recorded; `None` when the event
/// is not a test run or tracking is disabled.
pub fn handle_test_event(
    state: &mut WorkflowState,
    config: &EngineConfig,
    command: &str,
    output: &str,
    exit_code: Option<i64>,
) -> Option<String> {
    if !state.iteration_enforcement.enabled || !patterns::is_test_command(command) {
        return None;
    }
    let phase_key = state.current_phase_key()?;
    let workflow_type = state
        .active_workflow
        .as_ref()
        .map(|w| w.workflow_type.clone())
        .filter(|t| !t.is_empty());
    let phase_cfg = config
        .requirements
        .phase(&phase_key, workflow_type.as_deref());
    let iteration_cfg: Option<TestIterationConfig> =
        phase_cfg.and_then(|c| c.test_iteration);
    if !iteration_cfg.as_ref().map(|c| c.enabled).unwrap_or(false) {
        return None;
    }
    let (max_iterations, breaker) = config.iteration_thresholds(iteration_cfg.as_ref());

    let run = parse_result(output, exit_code);
    let iteration = state
        .phase_mut(&phase_key)
        .iteration_requirements
        .test_iteration
        .get_or_insert_with(TestIterationState::default);
    let verdict = record_run(iteration, command, &run, max_iterations, breaker);

    if let Some(reason) = verdict.escalated {
        let reason_name = match reason {
            EscalationReason::CircuitBreaker => "circuit_breaker",
            EscalationReason::MaxIterations => "max_iterations",
        };
        state.push_escalation(Escalation {
            escalation_type: reason_name.to_string(),
            hook: "post_action".to_string(),
            phase: Some(phase_key),
            detail: verdict.message.clone(),
            timestamp: now_rfc3339(),
        });
    }
    Some(verdict.message)
}
