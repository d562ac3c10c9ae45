//! Gate state machine: decides whether a phase gate may open.
//!
//! Combines the five requirement checkers with the self-healing diagnoser.
//! Unsatisfied requirements diagnosed as infrastructure or stale are
//! dropped (and journaled); only genuine failures block. Also validates
//! phase-sequence integrity against the workflow definition, which is the
//! one always-genuine failure class: it indicates state corruption.

use crate::core::config::EngineConfig;
use crate::core::diagnose::{diagnose, normalize_phase_key};
use crate::core::event::{EventKind, HookEvent};
use crate::core::journal::Journal;
use crate::core::patterns::{classify_intent, Intent};
use crate::core::requirements::{
    check_agent_delegation, check_artifact_presence, check_constitutional_validation,
    check_interactive_elicitation, check_test_iteration, CheckOutcome, REQ_ARTIFACTS,
    REQ_CONSTITUTIONAL, REQ_DELEGATION, REQ_ELICITATION, REQ_TEST_ITERATION,
};
use crate::core::state::{Escalation, GateSnapshot, PhaseStatus, WorkflowState};
use crate::core::time::now_rfc3339;
use std::path::Path;

/// Flag set the first time a gate opens, signalling a post-gate follow-up
/// action is now due.
pub const POST_GATE_FOLLOWUP_FLAG: &str = "post_gate_followup_due";

#[derive(Debug, Clone)]
pub enum GateDecision {
    Allow {
        advisory: Option<String>,
        modified: bool,
    },
    Block {
        message: String,
    },
}

/// Whether this event is a gate-advancement attempt.
///
/// Either a delegation to the orchestrator with advance-intent text, or an
/// explicit advance skill invocation. Setup-bypass phrasing suppresses both.
pub fn is_gate_attempt(event: &HookEvent, config: &EngineConfig) -> bool {
    match event.kind() {
        EventKind::Delegation => {
            let is_orchestrator = event
                .delegated_agent()
                .map(|agent| {
                    crate::core::diagnose::normalize_agent_name(agent)
                        == crate::core::diagnose::normalize_agent_name(&config.agents.orchestrator)
                })
                .unwrap_or(false);
            is_orchestrator && classify_intent(&event.prompt_text()) == Intent::Advance
        }
        EventKind::Skill => {
            let Some(skill) = event.skill_name() else {
                return false;
            };
            if config.agents.is_exempt_skill(skill) {
                return false;
            }
            skill.contains("advance") && classify_intent(&event.prompt_text()) != Intent::None
                || skill.ends_with("advance")
        }
        _ => false,
    }
}

/// Validate phase-sequence integrity. A mismatch between the recorded
/// current phase and the workflow definition at the recorded index is
/// state corruption and always blocks.
pub fn validate_phase_sequence(state: &WorkflowState, config: &EngineConfig) -> Option<String> {
    let workflow = state.active_workflow.as_ref()?;
    let definition = config.workflows.phases_for(&workflow.workflow_type)?;
    let expected = definition.get(workflow.current_phase_index)?;
    let recorded = normalize_phase_key(&workflow.current_phase);
    if normalize_phase_key(expected) != recorded {
        return Some(format!(
            "Workflow state mismatch: phase index {} of workflow '{}' should be '{}' \
             but state records '{}'. The state document is corrupt; repair it before \
             continuing (check {} for the last consistent save).",
            workflow.current_phase_index,
            workflow.workflow_type,
            expected,
            workflow.current_phase,
            ".phasegate/state/workflow.json",
        ));
    }
    None
}

/// Evaluate a gate-advancement attempt for the current phase.
pub fn evaluate_gate(
    state: &mut WorkflowState,
    config: &EngineConfig,
    root: &Path,
    journal: &Journal,
) -> GateDecision {
    let Some(phase_key) = state.current_phase_key() else {
        // No active workflow phase: nothing to gate.
        return GateDecision::Allow {
            advisory: None,
            modified: false,
        };
    };

    // Externally marked complete: skip straight to allow.
    if state.phase_status(&phase_key) == PhaseStatus::Completed {
        return GateDecision::Allow {
            advisory: None,
            modified: false,
        };
    }

    let workflow_type = state
        .active_workflow
        .as_ref()
        .map(|w| w.workflow_type.clone())
        .filter(|t| !t.is_empty());
    let Some(phase_cfg) = config
        .requirements
        .phase(&phase_key, workflow_type.as_deref())
    else {
        // Unknown phase key: configuration gap, never a genuine block.
        journal.append(
            "pre_action",
            "self_heal",
            Some(&phase_key),
            "no requirements configured for phase; gate allowed",
        );
        return GateDecision::Allow {
            advisory: None,
            modified: false,
        };
    };

    let artifact_folder = state
        .active_workflow
        .as_ref()
        .and_then(|w| w.artifact_folder.clone());
    let phase_entry = state.phases.get(&phase_key);

    let mut failures: Vec<(&str, String, String)> = Vec::new();
    let mut run = |name: &'static str, outcome: CheckOutcome| {
        if let CheckOutcome::Unsatisfied {
            reason,
            action_required,
        } = outcome
        {
            failures.push((name, reason, action_required));
        }
    };

    if let Some(cfg) = &phase_cfg.test_iteration {
        run(REQ_TEST_ITERATION, check_test_iteration(phase_entry, cfg));
    }
    if let Some(cfg) = &phase_cfg.constitutional_validation {
        run(
            REQ_CONSTITUTIONAL,
            check_constitutional_validation(phase_entry, cfg),
        );
    }
    if let Some(cfg) = &phase_cfg.elicitation {
        run(
            REQ_ELICITATION,
            check_interactive_elicitation(phase_entry, cfg),
        );
    }
    if let Some(cfg) = &phase_cfg.agent_delegation {
        run(REQ_DELEGATION, check_agent_delegation(state, &phase_key, cfg));
    }
    if let Some(cfg) = &phase_cfg.artifacts {
        run(
            REQ_ARTIFACTS,
            check_artifact_presence(root, artifact_folder.as_deref(), cfg),
        );
    }

    // Diagnose each failure; non-genuine causes self-heal and drop out.
    let mut genuine: Vec<(&str, String, String)> = Vec::new();
    for (name, reason, action) in failures {
        let diagnosis = diagnose("pre_action", &phase_key, name, state, &config.requirements);
        if diagnosis.is_genuine() {
            genuine.push((name, reason, action));
        } else {
            journal.append("pre_action", "self_heal", Some(&phase_key), &diagnosis.detail);
        }
    }

    if genuine.is_empty() {
        return allow_and_trigger(state, &phase_key);
    }

    let mut lines = vec![format!(
        "Gate for phase '{}' is closed. {} requirement(s) unmet:",
        phase_key,
        genuine.len()
    )];
    for (name, reason, action) in &genuine {
        lines.push(format!("  - {name}: {reason}. Next step: {action}"));
    }
    let message = lines.join("\n");

    let failed_names: Vec<String> = genuine.iter().map(|(n, ..)| n.to_string()).collect();
    state.push_escalation(Escalation {
        escalation_type: "gate_blocked".to_string(),
        hook: "pre_action".to_string(),
        phase: Some(phase_key.clone()),
        detail: failed_names.join(", "),
        timestamp: now_rfc3339(),
    });
    state.phase_mut(&phase_key).gate_validation = Some(GateSnapshot {
        phase: phase_key.clone(),
        failed_requirements: failed_names,
        timestamp: now_rfc3339(),
    });
    journal.append("pre_action", "gate_blocked", Some(&phase_key), &message);

    GateDecision::Block { message }
}

/// Allow the gate, firing the one-shot post-gate trigger the first time.
fn allow_and_trigger(state: &mut WorkflowState, phase_key: &str) -> GateDecision {
    let mut modified = false;
    let mut advisory = None;
    if let Some(workflow) = state.active_workflow.as_mut() {
        let fired = workflow
            .flags
            .get(POST_GATE_FOLLOWUP_FLAG)
            .copied()
            .unwrap_or(false);
        if !fired {
            workflow
                .flags
                .insert(POST_GATE_FOLLOWUP_FLAG.to_string(), true);
            modified = true;
            advisory = Some(format!(
                "Gate for phase '{phase_key}' is open. Post-gate follow-up is now due."
            ));
        }
    }
    GateDecision::Allow { advisory, modified }
}
