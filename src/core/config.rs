//! Read-only configuration catalogs consumed from collaborators.
//!
//! Three catalogs drive enforcement: per-phase requirement settings (with
//! workflow-type override deltas), ordered phase lists per workflow type,
//! and the agent ownership manifest. Defaults are embedded at compile time;
//! a project may override any of them under `.phasegate/catalog/`.

use crate::core::error::PhasegateError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

pub const EMBEDDED_REQUIREMENTS: &str = include_str!("../../catalog/requirements.json");
pub const EMBEDDED_WORKFLOWS: &str = include_str!("../../catalog/workflows.json");
pub const EMBEDDED_AGENTS: &str = include_str!("../../catalog/agents.json");

pub const DEFAULT_MAX_ITERATIONS: u32 = 10;
pub const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TestIterationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub circuit_breaker_threshold: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ComplianceConfig {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub articles_required: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ElicitationConfig {
    #[serde(default)]
    pub min_interactions: u32,
    #[serde(default)]
    pub allowed_selections: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DelegationConfig {
    pub agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArtifactConfig {
    /// Path templates; `{artifact_folder}` substitutes the workflow's
    /// artifact folder.
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Fully-merged requirement settings for one phase.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PhaseRequirements {
    #[serde(default)]
    pub test_iteration: Option<TestIterationConfig>,
    #[serde(default)]
    pub constitutional_validation: Option<ComplianceConfig>,
    #[serde(default)]
    pub elicitation: Option<ElicitationConfig>,
    #[serde(default)]
    pub agent_delegation: Option<DelegationConfig>,
    #[serde(default)]
    pub artifacts: Option<ArtifactConfig>,
}

impl PhaseRequirements {
    /// Whether a requirement of the given name is configured at all for
    /// this phase. Absence means the diagnoser treats a failing check as
    /// an infrastructure gap, not a violation.
    pub fn has_requirement(&self, name: &str) -> bool {
        match name {
            "test_iteration" => self
                .test_iteration
                .as_ref()
                .map(|c| c.enabled)
                .unwrap_or(false),
            "constitutional_validation" => self
                .constitutional_validation
                .as_ref()
                .map(|c| c.required)
                .unwrap_or(false),
            "interactive_elicitation" => self.elicitation.is_some(),
            "agent_delegation" => self.agent_delegation.is_some(),
            "artifact_presence" => self.artifacts.is_some(),
            _ => false,
        }
    }
}

/// Per-phase requirement catalog with workflow-type override deltas.
///
/// Kept as raw JSON values internally so workflow overrides can be applied
/// with a deep merge before deserializing into [`PhaseRequirements`].
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RequirementsCatalog {
    #[serde(default)]
    phases: BTreeMap<String, Value>,
    #[serde(default)]
    workflow_overrides: BTreeMap<String, BTreeMap<String, Value>>,
}

impl RequirementsCatalog {
    pub fn embedded_defaults() -> Self {
        // Compiled-in JSON; a parse failure here is a packaging bug.
        serde_json::from_str(EMBEDDED_REQUIREMENTS).unwrap()
    }

    /// Merged requirement settings for a phase, applying the workflow-type
    /// override delta when one exists. `None` when the phase is unknown.
    pub fn phase(&self, phase_key: &str, workflow_type: Option<&str>) -> Option<PhaseRequirements> {
        let base = self.phases.get(phase_key)?.clone();
        let merged = match workflow_type
            .and_then(|t| self.workflow_overrides.get(t))
            .and_then(|per_phase| per_phase.get(phase_key))
        {
            Some(delta) => deep_merge(base, delta.clone()),
            None => base,
        };
        serde_json::from_value(merged).ok()
    }

    pub fn phase_keys(&self) -> impl Iterator<Item = &String> {
        self.phases.keys()
    }
}

/// Ordered phase lists per workflow type.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WorkflowCatalog {
    #[serde(default)]
    pub workflows: BTreeMap<String, Vec<String>>,
}

impl WorkflowCatalog {
    pub fn embedded_defaults() -> Self {
        serde_json::from_str(EMBEDDED_WORKFLOWS).unwrap()
    }

    pub fn phases_for(&self, workflow_type: &str) -> Option<&[String]> {
        self.workflows.get(workflow_type).map(Vec::as_slice)
    }
}

/// Agent/skill ownership manifest.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AgentManifest {
    #[serde(default)]
    pub orchestrator: String,
    #[serde(default)]
    pub phase_owners: BTreeMap<String, String>,
    /// Skill name -> agent that must be delegated to when the skill runs.
    #[serde(default)]
    pub mandatory_skills: BTreeMap<String, String>,
    /// Skills that never create a delegation obligation.
    #[serde(default)]
    pub delegation_exempt_skills: Vec<String>,
}

impl AgentManifest {
    pub fn embedded_defaults() -> Self {
        serde_json::from_str(EMBEDDED_AGENTS).unwrap()
    }

    pub fn owner_of(&self, phase_key: &str) -> Option<&str> {
        self.phase_owners.get(phase_key).map(String::as_str)
    }

    pub fn is_exempt_skill(&self, skill: &str) -> bool {
        self.delegation_exempt_skills.iter().any(|s| s == skill)
    }
}

/// Per-session threshold override. Takes priority over phase-level
/// configuration only when fully configured.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionOverrides {
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub circuit_breaker_threshold: Option<u32>,
}

impl SessionOverrides {
    pub fn is_complete(&self) -> bool {
        self.max_iterations.is_some() && self.circuit_breaker_threshold.is_some()
    }
}

/// Everything the dispatcher reads once per event.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub requirements: RequirementsCatalog,
    pub workflows: WorkflowCatalog,
    pub agents: AgentManifest,
    pub session: Option<SessionOverrides>,
}

impl EngineConfig {
    /// Load catalogs: embedded defaults deep-merged with any project
    /// override files under `.phasegate/catalog/`.
    pub fn load(root: &Path) -> Result<Self, PhasegateError> {
        let catalog_dir = root.join(".phasegate").join("catalog");
        Ok(Self {
            requirements: load_catalog(EMBEDDED_REQUIREMENTS, &catalog_dir.join("requirements.json"))?,
            workflows: load_catalog(EMBEDDED_WORKFLOWS, &catalog_dir.join("workflows.json"))?,
            agents: load_catalog(EMBEDDED_AGENTS, &catalog_dir.join("agents.json"))?,
            session: load_session(&root.join(".phasegate").join("session.json")),
        })
    }

    /// Effective test-iteration thresholds for one phase:
    /// complete session override > phase config > hard defaults.
    pub fn iteration_thresholds(&self, cfg: Option<&TestIterationConfig>) -> (u32, u32) {
        if let Some(session) = self.session.as_ref().filter(|s| s.is_complete()) {
            return (
                session.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
                session
                    .circuit_breaker_threshold
                    .unwrap_or(DEFAULT_CIRCUIT_BREAKER_THRESHOLD),
            );
        }
        match cfg {
            Some(c) => (
                c.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
                c.circuit_breaker_threshold
                    .unwrap_or(DEFAULT_CIRCUIT_BREAKER_THRESHOLD),
            ),
            None => (DEFAULT_MAX_ITERATIONS, DEFAULT_CIRCUIT_BREAKER_THRESHOLD),
        }
    }
}

fn load_catalog<T: serde::de::DeserializeOwned>(
    embedded: &str,
    override_path: &Path,
) -> Result<T, PhasegateError> {
    let base: Value = serde_json::from_str(embedded)?;
    let merged = if override_path.exists() {
        let raw = std::fs::read_to_string(override_path)?;
        match serde_json::from_str::<Value>(&raw) {
            Ok(overlay) => deep_merge(base, overlay),
            // A corrupt override file must not take the engine down.
            Err(_) => base,
        }
    } else {
        base
    };
    Ok(serde_json::from_value(merged)?)
}

fn load_session(path: &Path) -> Option<SessionOverrides> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Recursive merge: objects merge key-by-key, every other value
/// (scalars and arrays included) is replaced by the overlay.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}
