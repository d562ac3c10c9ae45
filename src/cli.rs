//! Command-line surface: hook entrypoints plus a minimal state viewer.
//!
//! The hook subcommands are the engine's event interface: each reads one
//! JSON event object from stdin and prints either nothing (allow), advisory
//! text, or a block payload. The exit status is always success; control
//! flow is carried by the printed payload.

use crate::core::config::EngineConfig;
use crate::core::dispatch::{run_hook, HookClass};
use crate::core::error::PhasegateError;
use crate::core::gitinfo;
use crate::core::output::{emit, BlockPayload};
use crate::core::store::StateStore;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "phasegate",
    version = env!("CARGO_PKG_VERSION"),
    about = "Phase-gate enforcement for agent-driven delivery workflows"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Project root (defaults to the current working directory).
    #[clap(long)]
    pub root: Option<PathBuf>,
    /// Sub-project id in a monorepo layout.
    #[clap(long)]
    pub project: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a hook against one JSON event read from stdin.
    Hook {
        #[clap(subcommand)]
        class: HookCommand,
    },
    /// Inspect persisted workflow state.
    State {
        #[clap(subcommand)]
        command: StateCommand,
    },
    /// Print the effective configuration catalogs.
    Catalog {
        #[clap(subcommand)]
        command: CatalogCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum HookCommand {
    /// Before a tool call executes.
    PreAction(CommonArgs),
    /// After a tool call returned.
    PostAction(CommonArgs),
    /// When the agent's turn ends.
    EndOfTurn(CommonArgs),
}

#[derive(Subcommand, Debug)]
pub enum StateCommand {
    /// Show the current workflow state.
    Show {
        #[clap(flatten)]
        common: CommonArgs,
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum CatalogCommand {
    /// Merged per-phase requirement settings.
    Requirements(CommonArgs),
    /// Ordered phase lists per workflow type.
    Workflows(CommonArgs),
    /// Agent ownership manifest.
    Agents(CommonArgs),
}

fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf, PhasegateError> {
    match root {
        Some(path) => Ok(path),
        None => Ok(std::env::current_dir()?),
    }
}

fn read_stdin_event() -> Result<String, PhasegateError> {
    let mut raw = String::new();
    std::io::stdin().read_to_string(&mut raw)?;
    Ok(raw)
}

pub fn run_cli(cli: Cli) -> Result<(), PhasegateError> {
    match cli.command {
        Command::Hook { class } => {
            let (hook_class, common) = match class {
                HookCommand::PreAction(common) => (HookClass::PreAction, common),
                HookCommand::PostAction(common) => (HookClass::PostAction, common),
                HookCommand::EndOfTurn(common) => (HookClass::EndOfTurn, common),
            };
            let root = resolve_root(common.root)?;
            let raw = read_stdin_event()?;
            let outcome = run_hook(hook_class, &raw, &root, common.project.as_deref());
            let block = outcome.block.map(BlockPayload::new);
            emit(block.as_ref(), &outcome.advisories);
            Ok(())
        }
        Command::State {
            command: StateCommand::Show { common, format },
        } => {
            let root = resolve_root(common.root)?;
            let store = StateStore::new(&root, common.project.as_deref());
            let state = store.load().unwrap_or_default();
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&state)?);
                return Ok(());
            }
            println!("{}", "Workflow state".bold());
            println!("  version: {}", state.state_version);
            match &state.active_workflow {
                Some(workflow) => {
                    println!(
                        "  workflow: {} (phase {} of {}: {})",
                        workflow.workflow_type.cyan(),
                        workflow.current_phase_index + 1,
                        workflow.phases.len().max(workflow.current_phase_index + 1),
                        workflow.current_phase.green(),
                    );
                    if let Some(branch) = &workflow.git_branch {
                        match gitinfo::branch_mismatch_note(&root, branch) {
                            Some(note) => println!("  {}", note.yellow()),
                            None => println!("  branch: {branch}"),
                        }
                    }
                }
                None => println!("  workflow: {}", "none active".dimmed()),
            }
            println!("  phases tracked: {}", state.phases.len());
            println!("  delegations logged: {}", state.skill_usage_log.len());
            match &state.pending_delegation {
                Some(marker) => println!(
                    "  pending delegation: {} via '{}'",
                    marker.required_agent.red(),
                    marker.skill
                ),
                None => println!("  pending delegation: none"),
            }
            if !state.pending_escalations.is_empty() {
                println!(
                    "  {}",
                    format!("{} pending escalation(s)", state.pending_escalations.len()).red()
                );
            }
            Ok(())
        }
        Command::Catalog { command } => {
            let (common, which) = match command {
                CatalogCommand::Requirements(c) => (c, "requirements"),
                CatalogCommand::Workflows(c) => (c, "workflows"),
                CatalogCommand::Agents(c) => (c, "agents"),
            };
            let root = resolve_root(common.root)?;
            let config = EngineConfig::load(&root)?;
            let rendered = match which {
                "requirements" => {
                    let mut entries = serde_json::Map::new();
                    for key in config.requirements.phase_keys() {
                        if let Some(phase) = config.requirements.phase(key, None) {
                            entries.insert(key.clone(), serde_json::to_value(phase)?);
                        }
                    }
                    serde_json::to_string_pretty(&entries)?
                }
                "workflows" => serde_json::to_string_pretty(&config.workflows.workflows)?,
                _ => serde_json::to_string_pretty(&serde_json::json!({
                    "orchestrator": config.agents.orchestrator,
                    "phase_owners": config.agents.phase_owners,
                    "mandatory_skills": config.agents.mandatory_skills,
                    "delegation_exempt_skills": config.agents.delegation_exempt_skills,
                }))?,
            };
            println!("{rendered}");
            Ok(())
        }
    }
}
