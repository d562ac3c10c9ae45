//! Versioned workflow-state document.
//!
//! One JSON document per project holds everything the enforcement engine
//! knows: the active workflow, per-phase requirement progress, the
//! delegation audit log, and pending obligations. The document is read
//! fresh at the start of every dispatched event and written back at most
//! once at the end of it; no component keeps a live instance across events.

use crate::core::diagnose::normalize_phase_key;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkflowState {
    /// Monotonic save counter, owned exclusively by the state store.
    /// Never trusted from a caller-supplied copy.
    #[serde(default)]
    pub state_version: u64,
    #[serde(default)]
    pub active_workflow: Option<ActiveWorkflow>,
    /// Phase-key -> phase state, keyed by normalized phase key.
    /// Entries are created lazily and kept for audit after completion.
    #[serde(default)]
    pub phases: BTreeMap<String, PhaseState>,
    /// Append-only record of every observed sub-agent delegation.
    #[serde(default)]
    pub skill_usage_log: Vec<DelegationRecord>,
    #[serde(default)]
    pub pending_delegation: Option<DelegationMarker>,
    #[serde(default)]
    pub pending_escalations: Vec<Escalation>,
    #[serde(default)]
    pub iteration_enforcement: EnforcementToggle,
    #[serde(default)]
    pub skill_enforcement: EnforcementToggle,
    /// Consecutive internal-error count for the delegation gate's
    /// safety valve.
    #[serde(default)]
    pub delegation_error_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ActiveWorkflow {
    #[serde(default, rename = "type")]
    pub workflow_type: String,
    #[serde(default)]
    pub current_phase: String,
    #[serde(default)]
    pub current_phase_index: usize,
    /// Ordered phase keys for this workflow run.
    #[serde(default)]
    pub phases: Vec<String>,
    #[serde(default)]
    pub artifact_folder: Option<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
    /// One-shot trigger flags (e.g. post-gate follow-up due).
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub phase_status: BTreeMap<String, PhaseStatus>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PhaseState {
    #[serde(default)]
    pub status: PhaseStatus,
    /// Set when the phase first moves to `in_progress`.
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub iteration_requirements: IterationRequirements,
    #[serde(default)]
    pub constitutional_validation: Option<ComplianceState>,
    #[serde(default)]
    pub elicitation: Option<ElicitationState>,
    /// Last blocking gate diagnosis; written only when a gate blocks.
    #[serde(default)]
    pub gate_validation: Option<GateSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IterationRequirements {
    #[serde(default)]
    pub test_iteration: Option<TestIterationState>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestRunResult {
    Passed,
    Failed,
    #[default]
    Inconclusive,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    #[default]
    InProgress,
    Success,
    Escalated,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    CircuitBreaker,
    MaxIterations,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TestIterationState {
    #[serde(default)]
    pub current_iteration: u32,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub failures_count: u32,
    #[serde(default)]
    pub identical_failure_count: u32,
    #[serde(default)]
    pub last_test_result: TestRunResult,
    #[serde(default)]
    pub history: Vec<IterationRecord>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub status: IterationStatus,
    #[serde(default)]
    pub escalation_reason: Option<EscalationReason>,
    #[serde(default)]
    pub escalation_approved: bool,
}

pub fn default_max_iterations() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub timestamp: String,
    pub command: String,
    pub result: TestRunResult,
    #[serde(default)]
    pub failures: u32,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    #[default]
    Pending,
    Compliant,
    Escalated,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ComplianceState {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub status: ComplianceStatus,
    #[serde(default)]
    pub iterations_used: u32,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub articles_required: Vec<String>,
    #[serde(default)]
    pub articles_checked: Vec<String>,
    #[serde(default)]
    pub escalation_approved: bool,
    #[serde(default)]
    pub unresolved_violations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ElicitationState {
    #[serde(default)]
    pub interactions: u32,
    #[serde(default)]
    pub final_selection: Option<String>,
}

/// Persisted snapshot of the last gate block for a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSnapshot {
    pub phase: String,
    pub failed_requirements: Vec<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub agent: String,
    pub timestamp: String,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Durable marker that a specific sub-agent handoff is mandatory
/// and not yet confirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationMarker {
    pub skill: String,
    pub required_agent: String,
    pub invoked_at: String,
    #[serde(default)]
    pub args: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    #[serde(rename = "type")]
    pub escalation_type: String,
    pub hook: String,
    #[serde(default)]
    pub phase: Option<String>,
    pub detail: String,
    pub timestamp: String,
}

/// On/off switch for one enforcement family.
///
/// Only `enabled` is consulted at dispatch time. `mode` and
/// `fail_behavior` are carried for schema compatibility with persisted
/// documents; the per-check failure policy lives in the dispatcher's
/// check tables, where the delegation gate's fail-closed exception is
/// fixed rather than configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementToggle {
    pub enabled: bool,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub fail_behavior: FailBehavior,
}

impl Default for EnforcementToggle {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: None,
            fail_behavior: FailBehavior::Open,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailBehavior {
    #[default]
    Open,
    Closed,
}

impl WorkflowState {
    /// Normalized key of the phase the active workflow is currently in.
    pub fn current_phase_key(&self) -> Option<String> {
        self.active_workflow
            .as_ref()
            .filter(|w| !w.current_phase.is_empty())
            .map(|w| normalize_phase_key(&w.current_phase))
    }

    /// Read a phase entry by any spelling of its key.
    pub fn phase(&self, key: &str) -> Option<&PhaseState> {
        self.phases.get(&normalize_phase_key(key))
    }

    /// Get-or-create a phase entry; the key is normalized so two spellings
    /// of the same phase never coexist as separate entries.
    pub fn phase_mut(&mut self, key: &str) -> &mut PhaseState {
        self.phases.entry(normalize_phase_key(key)).or_default()
    }

    /// Effective status of a phase, preferring the workflow's own
    /// `phase_status` map over the phase entry.
    pub fn phase_status(&self, key: &str) -> PhaseStatus {
        let normalized = normalize_phase_key(key);
        if let Some(wf) = &self.active_workflow {
            if let Some(status) = wf.phase_status.get(&normalized) {
                return *status;
            }
        }
        self.phases
            .get(&normalized)
            .map(|p| p.status)
            .unwrap_or_default()
    }

    pub fn push_escalation(&mut self, escalation: Escalation) {
        self.pending_escalations.push(escalation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_mut_normalizes_key() {
        let mut state = WorkflowState::default();
        state.phase_mut("03-Implementation").status = PhaseStatus::InProgress;
        // A second spelling must land on the same entry.
        state.phase_mut("implementation").status = PhaseStatus::Completed;
        assert_eq!(state.phases.len(), 1);
        assert_eq!(
            state.phase("Implementation").unwrap().status,
            PhaseStatus::Completed
        );
    }

    #[test]
    fn test_phase_status_prefers_workflow_map() {
        let mut state = WorkflowState::default();
        state.phase_mut("design").status = PhaseStatus::Pending;
        let mut wf = ActiveWorkflow::default();
        wf.phase_status
            .insert("design".to_string(), PhaseStatus::Completed);
        state.active_workflow = Some(wf);
        assert_eq!(state.phase_status("design"), PhaseStatus::Completed);
    }

    #[test]
    fn test_schema_drift_tolerated() {
        // Unknown fields and missing fields both deserialize.
        let raw = r#"{"state_version": 3, "unknown_field": {"x": 1}}"#;
        let state: WorkflowState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.state_version, 3);
        assert!(state.phases.is_empty());
        assert!(state.iteration_enforcement.enabled);
    }

    #[test]
    fn test_toggle_extras_survive_roundtrip() {
        // mode and fail_behavior are schema-compatibility fields; a
        // persisted document must not lose them on rewrite.
        let raw = r#"{"skill_enforcement": {"enabled": true, "mode": "strict", "fail_behavior": "closed"}}"#;
        let state: WorkflowState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.skill_enforcement.mode.as_deref(), Some("strict"));
        assert_eq!(state.skill_enforcement.fail_behavior, FailBehavior::Closed);
        let back: WorkflowState =
            serde_json::from_str(&serde_json::to_string(&state).unwrap()).unwrap();
        assert_eq!(back.skill_enforcement.fail_behavior, FailBehavior::Closed);
    }

    #[test]
    fn test_roundtrip_preserves_marker() {
        let mut state = WorkflowState::default();
        state.pending_delegation = Some(DelegationMarker {
            skill: "advance".to_string(),
            required_agent: "sdlc-orchestrator".to_string(),
            invoked_at: "2026-01-01T00:00:00Z".to_string(),
            args: None,
        });
        let raw = serde_json::to_string(&state).unwrap();
        let back: WorkflowState = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            back.pending_delegation.unwrap().required_agent,
            "sdlc-orchestrator"
        );
    }
}
