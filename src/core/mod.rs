//! Core modules of the phase-gate enforcement engine.
//!
//! Everything shares one versioned state document; the dispatcher owns
//! reading and persisting it, every other module only stages mutations.

pub mod config;
pub mod corridor;
pub mod delegation;
pub mod diagnose;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod gate;
pub mod gitinfo;
pub mod journal;
pub mod output;
pub mod patterns;
pub mod requirements;
pub mod state;
pub mod store;
pub mod time;
pub mod tracker;
