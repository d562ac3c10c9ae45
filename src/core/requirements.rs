//! Requirement checkers: five independent predicates over phase state.
//!
//! Each checker is a pure function from phase state plus configuration to a
//! tagged outcome. Checkers never mutate state and never block on their own;
//! the gate state machine combines them with the diagnoser.

use crate::core::config::{
    ArtifactConfig, ComplianceConfig, DelegationConfig, ElicitationConfig, TestIterationConfig,
};
use crate::core::diagnose::{normalize_agent_name, normalize_phase_key};
use crate::core::state::{
    ComplianceStatus, IterationStatus, PhaseState, PhaseStatus, WorkflowState,
};
use crate::core::time::parse_timestamp;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Satisfied,
    Unsatisfied {
        reason: String,
        action_required: String,
    },
}

impl CheckOutcome {
    pub fn unsatisfied(reason: impl Into<String>, action: impl Into<String>) -> Self {
        CheckOutcome::Unsatisfied {
            reason: reason.into(),
            action_required: action.into(),
        }
    }

    pub fn is_satisfied(&self) -> bool {
        matches!(self, CheckOutcome::Satisfied)
    }
}

/// Names used in diagnoses, escalations, and remediation text.
pub const REQ_TEST_ITERATION: &str = "test_iteration";
pub const REQ_CONSTITUTIONAL: &str = "constitutional_validation";
pub const REQ_ELICITATION: &str = "interactive_elicitation";
pub const REQ_DELEGATION: &str = "agent_delegation";
pub const REQ_ARTIFACTS: &str = "artifact_presence";

pub fn check_test_iteration(
    phase: Option<&PhaseState>,
    cfg: &TestIterationConfig,
) -> CheckOutcome {
    if !cfg.enabled {
        return CheckOutcome::Satisfied;
    }
    let Some(iteration) = phase.and_then(|p| p.iteration_requirements.test_iteration.as_ref())
    else {
        return CheckOutcome::unsatisfied(
            "no test run has been recorded for this phase",
            "run the phase's test command and fix failures until tests pass",
        );
    };
    if iteration.status == IterationStatus::Escalated {
        if iteration.escalation_approved {
            return CheckOutcome::Satisfied;
        }
        return CheckOutcome::unsatisfied(
            "test iteration escalated and awaiting approval",
            "obtain external approval for the recorded escalation",
        );
    }
    if iteration.completed {
        CheckOutcome::Satisfied
    } else {
        CheckOutcome::unsatisfied(
            format!(
                "tests are not passing yet (iteration {} of {})",
                iteration.current_iteration, iteration.max_iterations
            ),
            "re-run the test command until it passes",
        )
    }
}

pub fn check_constitutional_validation(
    phase: Option<&PhaseState>,
    cfg: &ComplianceConfig,
) -> CheckOutcome {
    if !cfg.required {
        return CheckOutcome::Satisfied;
    }
    let Some(compliance) = phase.and_then(|p| p.constitutional_validation.as_ref()) else {
        return CheckOutcome::unsatisfied(
            format!(
                "constitutional validation not started (articles required: {})",
                cfg.articles_required.join(", ")
            ),
            "run compliance validation against the required articles",
        );
    };
    match compliance.status {
        ComplianceStatus::Compliant => CheckOutcome::Satisfied,
        ComplianceStatus::Escalated => {
            if compliance.escalation_approved {
                CheckOutcome::Satisfied
            } else {
                CheckOutcome::unsatisfied(
                    format!(
                        "compliance escalated with unresolved violations: {}",
                        compliance.unresolved_violations.join("; ")
                    ),
                    "resolve the listed violations or obtain escalation approval",
                )
            }
        }
        ComplianceStatus::Pending => {
            if compliance.completed {
                CheckOutcome::Satisfied
            } else {
                CheckOutcome::unsatisfied(
                    format!(
                        "compliance validation incomplete ({} of {} iterations used)",
                        compliance.iterations_used, compliance.max_iterations
                    ),
                    "complete compliance validation for the required articles",
                )
            }
        }
    }
}

pub fn check_interactive_elicitation(
    phase: Option<&PhaseState>,
    cfg: &ElicitationConfig,
) -> CheckOutcome {
    let Some(elicitation) = phase.and_then(|p| p.elicitation.as_ref()) else {
        return CheckOutcome::unsatisfied(
            "no guided interactions recorded",
            format!(
                "complete at least {} guided interactions with the operator",
                cfg.min_interactions
            ),
        );
    };
    if elicitation.interactions < cfg.min_interactions {
        return CheckOutcome::unsatisfied(
            format!(
                "only {} of {} guided interactions recorded",
                elicitation.interactions, cfg.min_interactions
            ),
            "continue the guided elicitation until the minimum is met",
        );
    }
    match &elicitation.final_selection {
        Some(selection) if cfg.allowed_selections.iter().any(|s| s == selection) => {
            CheckOutcome::Satisfied
        }
        Some(selection) => CheckOutcome::unsatisfied(
            format!("final selection '{selection}' is not an accepted outcome"),
            format!("record one of: {}", cfg.allowed_selections.join(", ")),
        ),
        None => CheckOutcome::unsatisfied(
            "no final selection recorded",
            format!("record one of: {}", cfg.allowed_selections.join(", ")),
        ),
    }
}

/// Evidence that the designated agent was actually delegated to.
///
/// Primary evidence is a delegation log entry for the designated agent at
/// or after phase start. Secondary evidence (a still-pending marker naming
/// the agent, or the phase already being in progress) is weaker but
/// sufficient.
pub fn check_agent_delegation(
    state: &WorkflowState,
    phase_key: &str,
    cfg: &DelegationConfig,
) -> CheckOutcome {
    let normalized_phase = normalize_phase_key(phase_key);
    let designated = normalize_agent_name(&cfg.agent);
    let phase_entry = state.phases.get(&normalized_phase);
    let started_at = phase_entry
        .and_then(|p| p.started_at.as_deref())
        .and_then(parse_timestamp);

    let log_match = state.skill_usage_log.iter().any(|record| {
        if normalize_agent_name(&record.agent) != designated {
            return false;
        }
        match (started_at, parse_timestamp(&record.timestamp)) {
            (Some(start), Some(ts)) => ts >= start,
            // Without a phase start time any matching entry counts.
            _ => true,
        }
    });
    if log_match {
        return CheckOutcome::Satisfied;
    }

    if let Some(marker) = &state.pending_delegation {
        if normalize_agent_name(&marker.required_agent) == designated {
            return CheckOutcome::Satisfied;
        }
    }

    if state.phase_status(&normalized_phase) == PhaseStatus::InProgress {
        return CheckOutcome::Satisfied;
    }

    CheckOutcome::unsatisfied(
        format!("no delegation to '{}' recorded for this phase", cfg.agent),
        format!("delegate the phase work to '{}'", cfg.agent),
    )
}

/// Artifact presence over configured path templates.
///
/// Each template substitutes `{artifact_folder}`; a template whose
/// placeholder cannot be resolved is skipped rather than failed. A template
/// is satisfied when any of its spelling variants exists on disk.
pub fn check_artifact_presence(
    root: &Path,
    artifact_folder: Option<&str>,
    cfg: &ArtifactConfig,
) -> CheckOutcome {
    let mut missing = Vec::new();
    for template in &cfg.paths {
        let resolved = if template.contains("{artifact_folder}") {
            match artifact_folder {
                Some(folder) => template.replace("{artifact_folder}", folder),
                // Unresolvable placeholder: skip, fail-open.
                None => continue,
            }
        } else {
            template.clone()
        };
        if template.contains('{') && resolved.contains('{') {
            // Some other unresolved placeholder; same skip policy.
            continue;
        }
        if !path_variants(&resolved)
            .iter()
            .any(|variant| root.join(variant).exists())
        {
            missing.push(resolved);
        }
    }
    if missing.is_empty() {
        CheckOutcome::Satisfied
    } else {
        CheckOutcome::unsatisfied(
            format!("missing artifacts: {}", missing.join(", ")),
            "produce the listed artifact files before advancing",
        )
    }
}

/// Spelling variants for an artifact path: as written, plus the
/// hyphen/underscore swap of its file name.
fn path_variants(path: &str) -> Vec<String> {
    let mut variants = vec![path.to_string()];
    if let Some(idx) = path.rfind('/') {
        let (dir, name) = path.split_at(idx + 1);
        let swapped: String = name
            .chars()
            .map(|c| match c {
                '-' => '_',
                '_' => '-',
                other => other,
            })
            .collect();
        if swapped != name {
            variants.push(format!("{dir}{swapped}"));
        }
    }
    variants
}
