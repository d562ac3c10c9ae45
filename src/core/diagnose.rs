//! Self-healing diagnosis for failing requirement checks.
//!
//! A failing check is not always a policy violation. Missing per-phase
//! configuration, phase-key aliasing, and stale blocking snapshots are
//! infrastructure conditions the engine can heal on its own. The diagnoser
//! runs after requirement evaluation and before the final gate decision so
//! genuine and infrastructure causes stay independently testable.

use crate::core::config::RequirementsCatalog;
use crate::core::state::WorkflowState;
use rustc_hash::FxHashMap;
use std::sync::LazyLock;

/// Alias table for phase keys that appear under more than one name.
static PHASE_ALIASES: LazyLock<FxHashMap<&'static str, &'static str>> = LazyLock::new(|| {
    let mut m = FxHashMap::default();
    m.insert("reqs", "requirements");
    m.insert("requirement", "requirements");
    m.insert("arch", "design");
    m.insert("architecture", "design");
    m.insert("impl", "implementation");
    m.insert("implement", "implementation");
    m.insert("implementing", "implementation");
    m.insert("task", "tasks");
    m.insert("task_breakdown", "tasks");
    m.insert("reviews", "review");
    m.insert("code_review", "review");
    m
});

/// Resolve any spelling of a phase key to one canonical form.
///
/// Lowercases, strips numeric prefixes (`03-design`, `2_tasks`), converts
/// separators to underscores, then applies the alias table. Every component
/// must call this before indexing the `phases` map.
pub fn normalize_phase_key(key: &str) -> String {
    let lowered = key.trim().to_lowercase();
    let stripped = lowered
        .trim_start_matches(|c: char| c.is_ascii_digit())
        .trim_start_matches(['-', '_', '.', ' ']);
    let base = if stripped.is_empty() { lowered.as_str() } else { stripped };
    let canonical: String = base
        .chars()
        .map(|c| if c == '-' || c == ' ' || c == '.' { '_' } else { c })
        .collect();
    match PHASE_ALIASES.get(canonical.as_str()) {
        Some(resolved) => (*resolved).to_string(),
        None => canonical,
    }
}

/// Canonical form for agent names: lowercase with runs of
/// non-alphanumerics collapsed to single hyphens.
pub fn normalize_agent_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosisCause {
    /// A real, correctly-configured requirement is unmet. Blocks.
    Genuine,
    /// Configuration gap or key mismatch, not an agent failure. Self-heals.
    Infrastructure,
    /// Evidence recorded against an older phase key. Self-heals.
    Stale,
}

#[derive(Debug, Clone)]
pub struct Diagnosis {
    pub cause: DiagnosisCause,
    pub detail: String,
    pub remediation: String,
}

impl Diagnosis {
    pub fn is_genuine(&self) -> bool {
        self.cause == DiagnosisCause::Genuine
    }
}

/// Classify one failing requirement check.
///
/// All non-genuine diagnoses are treated as satisfied by the caller; only
/// genuine causes pass through to block.
pub fn diagnose(
    hook: &str,
    phase: &str,
    requirement: &str,
    state: &WorkflowState,
    catalog: &RequirementsCatalog,
) -> Diagnosis {
    let normalized = normalize_phase_key(phase);

    // Requirement configuration entirely absent for this phase: a
    // configuration gap, not an agent failure.
    let phase_cfg = catalog.phase(&normalized, workflow_type(state));
    let configured = phase_cfg
        .as_ref()
        .map(|cfg| cfg.has_requirement(requirement))
        .unwrap_or(false);
    if !configured {
        return Diagnosis {
            cause: DiagnosisCause::Infrastructure,
            detail: format!(
                "no {requirement} configuration for phase '{normalized}' (hook {hook})"
            ),
            remediation: format!(
                "add a {requirement} entry for '{normalized}' to the requirements catalog"
            ),
        };
    }

    // The phase was referenced under a different spelling: normalization
    // healed the mismatch, so evidence stored under the canonical key counts.
    if phase != normalized && state.phases.contains_key(&normalized) {
        return Diagnosis {
            cause: DiagnosisCause::Infrastructure,
            detail: format!("phase key '{phase}' healed to '{normalized}'"),
            remediation: "no action needed; key alias resolved".to_string(),
        };
    }

    // A blocking snapshot recorded against an older, since-normalized key.
    if let Some(entry) = state.phases.get(&normalized) {
        if let Some(snapshot) = &entry.gate_validation {
            if normalize_phase_key(&snapshot.phase) == normalized && snapshot.phase != normalized {
                return Diagnosis {
                    cause: DiagnosisCause::Stale,
                    detail: format!(
                        "gate snapshot for '{}' predates key normalization",
                        snapshot.phase
                    ),
                    remediation: "stale snapshot ignored".to_string(),
                };
            }
        }
    }

    Diagnosis {
        cause: DiagnosisCause::Genuine,
        detail: format!("requirement {requirement} unmet for phase '{normalized}'"),
        remediation: format!("satisfy {requirement} for '{normalized}' before advancing"),
    }
}

fn workflow_type(state: &WorkflowState) -> Option<&str> {
    state
        .active_workflow
        .as_ref()
        .map(|w| w.workflow_type.as_str())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RequirementsCatalog;

    #[test]
    fn test_normalize_strips_numeric_prefix() {
        assert_eq!(normalize_phase_key("03-Design"), "design");
        assert_eq!(normalize_phase_key("2_tasks"), "tasks");
        assert_eq!(normalize_phase_key("01 requirements"), "requirements");
    }

    #[test]
    fn test_normalize_applies_aliases() {
        assert_eq!(normalize_phase_key("impl"), "implementation");
        assert_eq!(normalize_phase_key("Arch"), "design");
        assert_eq!(normalize_phase_key("code-review"), "review");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for key in ["03-Design", "impl", "requirements", "custom_phase"] {
            let once = normalize_phase_key(key);
            assert_eq!(normalize_phase_key(&once), once);
        }
    }

    #[test]
    fn test_normalize_agent_name() {
        assert_eq!(normalize_agent_name("SDLC Orchestrator"), "sdlc-orchestrator");
        assert_eq!(normalize_agent_name("sdlc_orchestrator"), "sdlc-orchestrator");
        assert_eq!(normalize_agent_name("  code--reviewer  "), "code-reviewer");
    }

    #[test]
    fn test_missing_config_is_infrastructure() {
        let state = WorkflowState::default();
        let catalog = RequirementsCatalog::embedded_defaults();
        let d = diagnose("pre_action", "nonexistent_phase", "test_iteration", &state, &catalog);
        assert_eq!(d.cause, DiagnosisCause::Infrastructure);
    }

    #[test]
    fn test_configured_unmet_requirement_is_genuine() {
        let mut state = WorkflowState::default();
        state.phase_mut("implementation");
        let catalog = RequirementsCatalog::embedded_defaults();
        let d = diagnose("pre_action", "implementation", "test_iteration", &state, &catalog);
        assert_eq!(d.cause, DiagnosisCause::Genuine);
    }

    #[test]
    fn test_alias_spelling_heals() {
        let mut state = WorkflowState::default();
        state.phase_mut("implementation");
        let catalog = RequirementsCatalog::embedded_defaults();
        let d = diagnose("pre_action", "03-Implementation", "test_iteration", &state, &catalog);
        assert_eq!(d.cause, DiagnosisCause::Infrastructure);
        assert!(d.detail.contains("healed"));
    }
}
