//! Phasegate: phase-gate enforcement for agent-driven delivery workflows.
//!
//! Autonomous coding agents move through an ordered sequence of lifecycle
//! phases (requirements, design, implementation, review). Phasegate sits
//! between the agent and its tools: it intercepts tool invocations,
//! inspects accumulated workflow state, and either allows, warns, or
//! blocks each action.
//!
//! # How enforcement works
//!
//! - **Gates**: advancing past a phase requires every configured
//!   requirement to be satisfied: passing tests, compliance validation
//!   against the rule set ("constitution"), completed guided elicitation,
//!   delegation evidence, and artifact presence.
//! - **Corridors**: while a phase has failing tests or pending compliance
//!   validation, escape actions (advance/delegate) are blocked; everything
//!   else stays open for investigation and remediation.
//! - **Circuit breaker**: when the same normalized test failure repeats a
//!   configured number of times, the loop escalates for external review
//!   instead of spinning.
//! - **Self-healing**: failures caused by missing configuration or
//!   phase-key aliasing are diagnosed as infrastructure conditions and
//!   allowed through rather than blocking the agent.
//! - **Delegation gate**: mandatory sub-agent handoffs are verified at end
//!   of turn; this is the one fail-closed check in the engine.
//!
//! # Event interface
//!
//! Each hook invocation reads one JSON event from stdin and prints either
//! nothing (allow), advisory text on stderr, or a block payload
//! `{"decision":"block","stopReason":"..."}` on stdout. The process exit
//! code is always success.
//!
//! ```bash
//! echo '{"tool_name":"Bash","tool_input":{"command":"cargo test"}}' \
//!   | phasegate hook post-action
//! ```
//!
//! # Crate structure
//!
//! - [`core`]: state document, store, checkers, gate machine, dispatcher
//! - [`cli`]: hook entrypoints and the state/catalog viewers

pub mod cli;
pub mod core;

use clap::Parser;

/// Binary entrypoint: parse arguments and run the selected command.
pub fn run() -> Result<(), core::error::PhasegateError> {
    let cli = cli::Cli::parse();
    cli::run_cli(cli)
}
