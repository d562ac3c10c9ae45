//! Delegation gate: verifies mandatory sub-agent handoffs at end of turn.
//!
//! Unlike nearly everything else in the engine, an unresolved mandatory
//! delegation fails closed. A consecutive-error safety valve bounds the
//! worst case so an internal fault can never produce a permanent lock.

use crate::core::config::EngineConfig;
use crate::core::diagnose::normalize_agent_name;
use crate::core::event::{EventKind, HookEvent};
use crate::core::journal::Journal;
use crate::core::state::{DelegationMarker, DelegationRecord, PhaseStatus, WorkflowState};
use crate::core::time::{minutes_since, now_rfc3339, parse_timestamp};

/// Markers older than this are treated as expired obligations.
pub const STALENESS_MINUTES: i64 = 30;
/// Consecutive internal errors before the safety valve force-clears.
pub const ERROR_VALVE_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationVerdict {
    /// Nothing pending, or the obligation was satisfied/expired/exempt.
    Clear { modified: bool },
    /// The obligation is live and unproven.
    Block { message: String },
}

/// Set a pending marker when a mandatory-delegation skill is invoked.
/// Returns true when state was modified.
pub fn note_mandatory_skill(
    state: &mut WorkflowState,
    config: &EngineConfig,
    event: &HookEvent,
) -> bool {
    if event.kind() != EventKind::Skill {
        return false;
    }
    let Some(skill) = event.skill_name() else {
        return false;
    };
    let Some(required_agent) = config.agents.mandatory_skills.get(skill) else {
        return false;
    };
    let args = event.prompt_text();
    state.pending_delegation = Some(DelegationMarker {
        skill: skill.to_string(),
        required_agent: required_agent.clone(),
        invoked_at: now_rfc3339(),
        args: (!args.is_empty()).then_some(args),
    });
    true
}

/// Append a delegation record and mark the target phase in progress.
/// Runs post-action on every observed delegation call.
pub fn record_delegation(state: &mut WorkflowState, event: &HookEvent) -> bool {
    if event.kind() != EventKind::Delegation {
        return false;
    }
    let Some(agent) = event.delegated_agent() else {
        return false;
    };
    let phase_key = state.current_phase_key();
    state.skill_usage_log.push(DelegationRecord {
        agent: agent.to_string(),
        timestamp: now_rfc3339(),
        phase: phase_key.clone(),
        status: Some("observed".to_string()),
        reason: None,
    });
    if let Some(key) = phase_key {
        let phase = state.phase_mut(&key);
        if phase.status == PhaseStatus::Pending {
            phase.status = PhaseStatus::InProgress;
            phase.started_at = Some(now_rfc3339());
        }
    }
    true
}

/// End-of-turn verification of a pending mandatory delegation.
pub fn verify_pending_delegation(
    state: &mut WorkflowState,
    config: &EngineConfig,
    journal: &Journal,
) -> DelegationVerdict {
    if !state.skill_enforcement.enabled {
        return DelegationVerdict::Clear { modified: false };
    }
    let Some(marker) = state.pending_delegation.clone() else {
        return DelegationVerdict::Clear { modified: false };
    };

    match resolve_marker(state, config, &marker) {
        Ok(resolution) => {
            state.delegation_error_count = 0;
            match resolution {
                MarkerResolution::Satisfied(detail) => {
                    journal.append("end_of_turn", "delegation_cleared", None, &detail);
                    state.pending_delegation = None;
                    DelegationVerdict::Clear { modified: true }
                }
                MarkerResolution::Unproven => {
                    let message = format!(
                        "Mandatory delegation unresolved: '{}' requires a handoff to \
                         '{}' (invoked via '{}'). Delegate to '{}' before ending the turn.",
                        marker.skill,
                        marker.required_agent,
                        marker.skill,
                        marker.required_agent,
                    );
                    journal.append("end_of_turn", "block", None, &message);
                    DelegationVerdict::Block { message }
                }
            }
        }
        Err(err) => {
            // Internal fault while verifying. Count it; past the valve
            // threshold, force-clear so the block cannot become permanent.
            state.delegation_error_count += 1;
            if state.delegation_error_count >= ERROR_VALVE_THRESHOLD {
                journal.append(
                    "end_of_turn",
                    "safety_valve",
                    None,
                    &format!(
                        "delegation gate failed {} consecutive times ({err}); marker force-cleared",
                        state.delegation_error_count
                    ),
                );
                state.pending_delegation = None;
                state.delegation_error_count = 0;
                return DelegationVerdict::Clear { modified: true };
            }
            DelegationVerdict::Block {
                message: format!(
                    "Delegation verification failed internally ({err}); the pending \
                     handoff to '{}' is preserved. Retry the delegation.",
                    marker.required_agent
                ),
            }
        }
    }
}

enum MarkerResolution {
    Satisfied(String),
    Unproven,
}

fn resolve_marker(
    state: &WorkflowState,
    config: &EngineConfig,
    marker: &DelegationMarker,
) -> Result<MarkerResolution, crate::core::error::PhasegateError> {
    // Exempt actions never carry an obligation.
    if config.agents.is_exempt_skill(&marker.skill) {
        return Ok(MarkerResolution::Satisfied(format!(
            "skill '{}' is delegation-exempt",
            marker.skill
        )));
    }

    // A marker that cannot be evaluated at all is an internal fault, not
    // evidence either way; the caller's error counter bounds it.
    let marker_ts = parse_timestamp(&marker.invoked_at).ok_or_else(|| {
        crate::core::error::PhasegateError::StateError(format!(
            "marker timestamp '{}' is unparsable",
            marker.invoked_at
        ))
    })?;
    let marker_ts = Some(marker_ts);

    // Expired obligations clear rather than perpetually blocking.
    if minutes_since(&marker.invoked_at) >= STALENESS_MINUTES {
        return Ok(MarkerResolution::Satisfied(format!(
            "marker from '{}' is older than {STALENESS_MINUTES} minutes; expired",
            marker.invoked_at
        )));
    }

    // Primary evidence: a log entry at/after the marker naming the agent.
    let required = normalize_agent_name(&marker.required_agent);
    let log_match = state.skill_usage_log.iter().any(|record| {
        if normalize_agent_name(&record.agent) != required {
            return false;
        }
        match (marker_ts, parse_timestamp(&record.timestamp)) {
            (Some(start), Some(ts)) => ts >= start,
            _ => true,
        }
    });
    if log_match {
        return Ok(MarkerResolution::Satisfied(format!(
            "delegation to '{}' found in usage log",
            marker.required_agent
        )));
    }

    // Secondary evidence: the workflow visibly progressed.
    if let Some(workflow) = &state.active_workflow {
        if workflow.current_phase_index > 0 {
            return Ok(MarkerResolution::Satisfied(
                "workflow progressed past the first phase".to_string(),
            ));
        }
        if state.phase_status(&workflow.current_phase) == PhaseStatus::InProgress {
            return Ok(MarkerResolution::Satisfied(
                "current phase is already in progress".to_string(),
            ));
        }
    }

    Ok(MarkerResolution::Unproven)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::ActiveWorkflow;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    fn config() -> EngineConfig {
        EngineConfig {
            requirements: crate::core::config::RequirementsCatalog::embedded_defaults(),
            workflows: crate::core::config::WorkflowCatalog::embedded_defaults(),
            agents: crate::core::config::AgentManifest::embedded_defaults(),
            session: None,
        }
    }

    fn marker(minutes_old: i64) -> DelegationMarker {
        DelegationMarker {
            skill: "sdlc-start".to_string(),
            required_agent: "sdlc-orchestrator".to_string(),
            invoked_at: (Utc::now() - Duration::minutes(minutes_old)).to_rfc3339(),
            args: None,
        }
    }

    #[test]
    fn test_no_marker_is_noop() {
        let dir = TempDir::new().unwrap();
        let mut state = WorkflowState::default();
        let verdict = verify_pending_delegation(&mut state, &config(), &Journal::new(dir.path()));
        assert_eq!(verdict, DelegationVerdict::Clear { modified: false });
    }

    #[test]
    fn test_stale_marker_clears_silently() {
        let dir = TempDir::new().unwrap();
        let mut state = WorkflowState::default();
        state.pending_delegation = Some(marker(45));
        let verdict = verify_pending_delegation(&mut state, &config(), &Journal::new(dir.path()));
        assert_eq!(verdict, DelegationVerdict::Clear { modified: true });
        assert!(state.pending_delegation.is_none());
    }

    #[test]
    fn test_fresh_marker_without_evidence_blocks() {
        let dir = TempDir::new().unwrap();
        let mut state = WorkflowState::default();
        state.pending_delegation = Some(marker(2));
        match verify_pending_delegation(&mut state, &config(), &Journal::new(dir.path())) {
            DelegationVerdict::Block { message } => {
                assert!(message.contains("sdlc-orchestrator"));
            }
            DelegationVerdict::Clear { .. } => panic!("expected block"),
        }
        // Marker preserved for the next turn.
        assert!(state.pending_delegation.is_some());
    }

    #[test]
    fn test_log_entry_after_marker_clears() {
        let dir = TempDir::new().unwrap();
        let mut state = WorkflowState::default();
        state.pending_delegation = Some(marker(2));
        state.skill_usage_log.push(DelegationRecord {
            agent: "SDLC Orchestrator".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            phase: None,
            status: None,
            reason: None,
        });
        let verdict = verify_pending_delegation(&mut state, &config(), &Journal::new(dir.path()));
        assert_eq!(verdict, DelegationVerdict::Clear { modified: true });
        assert!(state.pending_delegation.is_none());
    }

    #[test]
    fn test_log_entry_before_marker_does_not_clear() {
        let dir = TempDir::new().unwrap();
        let mut state = WorkflowState::default();
        state.pending_delegation = Some(marker(2));
        state.skill_usage_log.push(DelegationRecord {
            agent: "sdlc-orchestrator".to_string(),
            timestamp: (Utc::now() - Duration::minutes(20)).to_rfc3339(),
            phase: None,
            status: None,
            reason: None,
        });
        assert!(matches!(
            verify_pending_delegation(&mut state, &config(), &Journal::new(dir.path())),
            DelegationVerdict::Block { .. }
        ));
    }

    #[test]
    fn test_secondary_evidence_progress_clears() {
        let dir = TempDir::new().unwrap();
        let mut state = WorkflowState::default();
        state.pending_delegation = Some(marker(2));
        state.active_workflow = Some(ActiveWorkflow {
            current_phase: "design".to_string(),
            current_phase_index: 1,
            ..Default::default()
        });
        let verdict = verify_pending_delegation(&mut state, &config(), &Journal::new(dir.path()));
        assert_eq!(verdict, DelegationVerdict::Clear { modified: true });
    }

    #[test]
    fn test_exempt_skill_clears_silently() {
        let dir = TempDir::new().unwrap();
        let mut state = WorkflowState::default();
        let mut m = marker(2);
        m.skill = "sdlc-status".to_string();
        state.pending_delegation = Some(m);
        let verdict = verify_pending_delegation(&mut state, &config(), &Journal::new(dir.path()));
        assert_eq!(verdict, DelegationVerdict::Clear { modified: true });
    }

    #[test]
    fn test_marker_cannot_resurrect_after_clear() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::new(dir.path());
        let cfg = config();
        let mut state = WorkflowState::default();
        state.pending_delegation = Some(marker(45));
        verify_pending_delegation(&mut state, &cfg, &journal);
        assert!(state.pending_delegation.is_none());
        // A second pass stays clear.
        let verdict = verify_pending_delegation(&mut state, &cfg, &journal);
        assert_eq!(verdict, DelegationVerdict::Clear { modified: false });
    }

    #[test]
    fn test_safety_valve_after_consecutive_errors() {
        let dir = TempDir::new().unwrap();
        let journal = Journal::new(dir.path());
        let cfg = config();
        let mut state = WorkflowState::default();
        let mut broken = marker(2);
        broken.invoked_at = "garbage".to_string();
        state.pending_delegation = Some(broken);

        // The first four faults block while preserving the marker.
        for attempt in 1..ERROR_VALVE_THRESHOLD {
            assert!(matches!(
                verify_pending_delegation(&mut state, &cfg, &journal),
                DelegationVerdict::Block { .. }
            ));
            assert_eq!(state.delegation_error_count, attempt);
            assert!(state.pending_delegation.is_some());
        }
        // The fifth trips the valve and force-clears.
        let verdict = verify_pending_delegation(&mut state, &cfg, &journal);
        assert_eq!(verdict, DelegationVerdict::Clear { modified: true });
        assert!(state.pending_delegation.is_none());
        assert_eq!(state.delegation_error_count, 0);
        assert!(journal.read_all().iter().any(|e| e.kind == "safety_valve"));
    }

    #[test]
    fn test_note_mandatory_skill_sets_marker() {
        let cfg = config();
        let mut state = WorkflowState::default();
        let event: HookEvent = serde_json::from_value(serde_json::json!({
            "tool_name": "Skill",
            "tool_input": {"skill": "sdlc-start", "args": "feature auth"}
        }))
        .unwrap();
        assert!(note_mandatory_skill(&mut state, &cfg, &event));
        let marker = state.pending_delegation.unwrap();
        assert_eq!(marker.required_agent, "sdlc-orchestrator");

        // Unlisted skills set nothing.
        let mut state = WorkflowState::default();
        let event: HookEvent = serde_json::from_value(serde_json::json!({
            "tool_name": "Skill",
            "tool_input": {"skill": "unrelated", "args": ""}
        }))
        .unwrap();
        assert!(!note_mandatory_skill(&mut state, &cfg, &event));
    }

    #[test]
    fn test_record_delegation_marks_phase_started() {
        let mut state = WorkflowState::default();
        state.active_workflow = Some(ActiveWorkflow {
            current_phase: "design".to_string(),
            ..Default::default()
        });
        let event: HookEvent = serde_json::from_value(serde_json::json!({
            "tool_name": "Task",
            "tool_input": {"subagent_type": "design-architect", "prompt": "do the design"}
        }))
        .unwrap();
        assert!(record_delegation(&mut state, &event));
        assert_eq!(state.skill_usage_log.len(), 1);
        let phase = state.phase("design").unwrap();
        assert_eq!(phase.status, PhaseStatus::InProgress);
        assert!(phase.started_at.is_some());
    }
}
