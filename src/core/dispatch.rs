//! Event dispatcher: ordered check tables per hook class.
//!
//! Reads input, state, and config once per event, runs the class's checks
//! in order, short-circuits on the first block, and persists state at most
//! once. A check failing internally is isolated at the dispatcher boundary
//! and mapped through a per-check default-decision policy: allow for every
//! check except the delegation gate, whose fail-closed behavior is the one
//! documented exception.

use crate::core::config::EngineConfig;
use crate::core::corridor;
use crate::core::delegation::{self, DelegationVerdict};
use crate::core::error::PhasegateError;
use crate::core::event::{EventKind, HookEvent};
use crate::core::gate::{self, GateDecision};
use crate::core::gitinfo;
use crate::core::journal::Journal;
use crate::core::output::debug_note;
use crate::core::state::WorkflowState;
use crate::core::store::StateStore;
use crate::core::tracker;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookClass {
    PreAction,
    PostAction,
    EndOfTurn,
}

impl HookClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookClass::PreAction => "pre_action",
            HookClass::PostAction => "post_action",
            HookClass::EndOfTurn => "end_of_turn",
        }
    }
}

pub struct CheckContext<'a> {
    pub event: &'a HookEvent,
    pub state: &'a mut WorkflowState,
    pub config: &'a EngineConfig,
    pub root: &'a Path,
    pub journal: &'a Journal,
    /// Set by a check that staged a state mutation.
    pub modified: bool,
}

#[derive(Debug, Clone)]
pub enum CheckDecision {
    Allow,
    Advisory(String),
    Block(String),
}

/// Default decision when a check fails internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    Allow,
    Block,
}

pub struct CheckDef {
    pub name: &'static str,
    pub guard: fn(&CheckContext) -> bool,
    pub run: fn(&mut CheckContext) -> Result<CheckDecision, PhasegateError>,
    pub on_error: ErrorPolicy,
}

fn has_active_workflow(ctx: &CheckContext) -> bool {
    ctx.state.active_workflow.is_some()
}

fn iteration_enforced(ctx: &CheckContext) -> bool {
    ctx.state.iteration_enforcement.enabled
}

fn check_sequence_integrity(ctx: &mut CheckContext) -> Result<CheckDecision, PhasegateError> {
    match gate::validate_phase_sequence(ctx.state, ctx.config) {
        Some(message) => Ok(CheckDecision::Block(message)),
        None => Ok(CheckDecision::Allow),
    }
}

fn check_corridor(ctx: &mut CheckContext) -> Result<CheckDecision, PhasegateError> {
    let Some(phase_key) = ctx.state.current_phase_key() else {
        return Ok(CheckDecision::Allow);
    };
    let workflow_type = ctx
        .state
        .active_workflow
        .as_ref()
        .map(|w| w.workflow_type.clone())
        .filter(|t| !t.is_empty());
    let phase_cfg = ctx
        .config
        .requirements
        .phase(&phase_key, workflow_type.as_deref());
    let phase = ctx.state.phases.get(&phase_key);
    let active = corridor::classify(phase, phase_cfg.as_ref());
    match corridor::guard(active, &ctx.event.prompt_text(), phase, phase_cfg.as_ref()) {
        Some(message) => Ok(CheckDecision::Block(message)),
        None => Ok(CheckDecision::Allow),
    }
}

fn check_gate(ctx: &mut CheckContext) -> Result<CheckDecision, PhasegateError> {
    match gate::evaluate_gate(ctx.state, ctx.config, ctx.root, ctx.journal) {
        GateDecision::Allow { advisory, modified } => {
            ctx.modified |= modified;
            Ok(match advisory {
                Some(text) => CheckDecision::Advisory(text),
                None => CheckDecision::Allow,
            })
        }
        GateDecision::Block { message } => {
            ctx.modified = true;
            Ok(CheckDecision::Block(message))
        }
    }
}

fn check_mandatory_skill(ctx: &mut CheckContext) -> Result<CheckDecision, PhasegateError> {
    if delegation::note_mandatory_skill(ctx.state, ctx.config, ctx.event) {
        ctx.modified = true;
    }
    Ok(CheckDecision::Allow)
}

fn check_test_tracker(ctx: &mut CheckContext) -> Result<CheckDecision, PhasegateError> {
    let Some(command) = ctx.event.command().map(str::to_string) else {
        return Ok(CheckDecision::Allow);
    };
    let output = ctx.event.result_output();
    let exit_code = ctx.event.exit_code();
    match tracker::handle_test_event(ctx.state, ctx.config, &command, &output, exit_code) {
        Some(message) => {
            ctx.modified = true;
            Ok(CheckDecision::Advisory(message))
        }
        None => Ok(CheckDecision::Allow),
    }
}

fn check_delegation_recorder(ctx: &mut CheckContext) -> Result<CheckDecision, PhasegateError> {
    if delegation::record_delegation(ctx.state, ctx.event) {
        ctx.modified = true;
    }
    Ok(CheckDecision::Allow)
}

fn check_branch_note(ctx: &mut CheckContext) -> Result<CheckDecision, PhasegateError> {
    let Some(recorded) = ctx
        .state
        .active_workflow
        .as_ref()
        .and_then(|w| w.git_branch.clone())
    else {
        return Ok(CheckDecision::Allow);
    };
    match gitinfo::branch_mismatch_note(ctx.root, &recorded) {
        Some(note) => Ok(CheckDecision::Advisory(note)),
        None => Ok(CheckDecision::Allow),
    }
}

fn check_delegation_gate(ctx: &mut CheckContext) -> Result<CheckDecision, PhasegateError> {
    match delegation::verify_pending_delegation(ctx.state, ctx.config, ctx.journal) {
        DelegationVerdict::Clear { modified } => {
            ctx.modified |= modified;
            Ok(CheckDecision::Allow)
        }
        DelegationVerdict::Block { message } => {
            // The error counter and safety valve live in state.
            ctx.modified = true;
            Ok(CheckDecision::Block(message))
        }
    }
}

const PRE_ACTION_CHECKS: &[CheckDef] = &[
    CheckDef {
        name: "sequence_integrity",
        guard: has_active_workflow,
        run: check_sequence_integrity,
        on_error: ErrorPolicy::Allow,
    },
    CheckDef {
        name: "iteration_corridor",
        guard: |ctx| has_active_workflow(ctx) && iteration_enforced(ctx),
        run: check_corridor,
        on_error: ErrorPolicy::Allow,
    },
    CheckDef {
        name: "gate_keeper",
        guard: |ctx| {
            iteration_enforced(ctx) && gate::is_gate_attempt(ctx.event, ctx.config)
        },
        run: check_gate,
        on_error: ErrorPolicy::Allow,
    },
    CheckDef {
        name: "mandatory_skill_marker",
        guard: |ctx| {
            ctx.state.skill_enforcement.enabled && ctx.event.kind() == EventKind::Skill
        },
        run: check_mandatory_skill,
        on_error: ErrorPolicy::Allow,
    },
];

const POST_ACTION_CHECKS: &[CheckDef] = &[
    CheckDef {
        name: "test_tracker",
        guard: |ctx| ctx.event.kind() == EventKind::Shell && iteration_enforced(ctx),
        run: check_test_tracker,
        on_error: ErrorPolicy::Allow,
    },
    CheckDef {
        name: "delegation_recorder",
        guard: |ctx| ctx.event.kind() == EventKind::Delegation,
        run: check_delegation_recorder,
        on_error: ErrorPolicy::Allow,
    },
    CheckDef {
        name: "branch_note",
        guard: has_active_workflow,
        run: check_branch_note,
        on_error: ErrorPolicy::Allow,
    },
];

const END_OF_TURN_CHECKS: &[CheckDef] = &[CheckDef {
    name: "delegation_gate",
    guard: |ctx| ctx.state.skill_enforcement.enabled,
    run: check_delegation_gate,
    // Intentional asymmetry: an unresolved mandatory delegation fails
    // closed, bounded by the in-check safety valve.
    on_error: ErrorPolicy::Block,
}];

pub fn checks_for(class: HookClass) -> &'static [CheckDef] {
    match class {
        HookClass::PreAction => PRE_ACTION_CHECKS,
        HookClass::PostAction => POST_ACTION_CHECKS,
        HookClass::EndOfTurn => END_OF_TURN_CHECKS,
    }
}

#[derive(Debug, Clone, Default)]
pub struct HookOutcome {
    pub block: Option<String>,
    pub advisories: Vec<String>,
    /// Version written by the single save, when state was modified.
    pub persisted_version: Option<u64>,
}

/// Dispatch one raw event through the class's check table.
pub fn run_hook(
    class: HookClass,
    raw_event: &str,
    root: &Path,
    project: Option<&str>,
) -> HookOutcome {
    let Some(event) = HookEvent::from_json(raw_event) else {
        debug_note("unparsable event payload; allowing");
        return HookOutcome::default();
    };
    let store = StateStore::new(root, project);
    let mut state = store.load().unwrap_or_default();
    let config = match EngineConfig::load(root) {
        Ok(config) => config,
        Err(err) => {
            debug_note(&format!("config load failed ({err}); allowing"));
            return HookOutcome::default();
        }
    };
    let journal = Journal::new(root);

    let mut ctx = CheckContext {
        event: &event,
        state: &mut state,
        config: &config,
        root,
        journal: &journal,
        modified: false,
    };

    let mut outcome = HookOutcome::default();
    for check in checks_for(class) {
        if !(check.guard)(&ctx) {
            continue;
        }
        let decision = match (check.run)(&mut ctx) {
            Ok(decision) => decision,
            Err(err) => {
                debug_note(&format!(
                    "check '{}' failed internally on {}: {err}",
                    check.name,
                    class.as_str()
                ));
                match check.on_error {
                    ErrorPolicy::Allow => CheckDecision::Allow,
                    ErrorPolicy::Block => CheckDecision::Block(format!(
                        "check '{}' could not complete; blocked by policy",
                        check.name
                    )),
                }
            }
        };
        match decision {
            CheckDecision::Allow => {}
            CheckDecision::Advisory(text) => outcome.advisories.push(text),
            CheckDecision::Block(message) => {
                if ctx.modified {
                    outcome.persisted_version = persist(&store, ctx.state);
                }
                outcome.block = Some(message);
                return outcome;
            }
        }
    }

    if ctx.modified {
        outcome.persisted_version = persist(&store, ctx.state);
    }
    outcome
}

fn persist(store: &StateStore, state: &WorkflowState) -> Option<u64> {
    match store.save(state) {
        Ok(version) => Some(version),
        Err(err) => {
            debug_note(&format!("state save failed: {err}"));
            None
        }
    }
}
