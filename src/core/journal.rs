//! Append-only enforcement journal.
//!
//! Every self-heal, escalation, block, and safety-valve event is appended
//! as one JSON line to `.phasegate/events.jsonl` so enforcement decisions
//! stay auditable after the fact. Journal failures are swallowed: audit
//! logging must never change a decision.

use crate::core::time::{new_event_id, now_rfc3339};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const JOURNAL_FILE: &str = ".phasegate/events.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEvent {
    pub ts: String,
    pub event_id: String,
    pub hook: String,
    pub kind: String,
    #[serde(default)]
    pub phase: Option<String>,
    pub detail: String,
}

pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(JOURNAL_FILE),
        }
    }

    pub fn append(&self, hook: &str, kind: &str, phase: Option<&str>, detail: &str) {
        let event = JournalEvent {
            ts: now_rfc3339(),
            event_id: new_event_id(),
            hook: hook.to_string(),
            kind: kind.to_string(),
            phase: phase.map(str::to_string),
            detail: detail.to_string(),
        };
        let Ok(line) = serde_json::to_string(&event) else {
            return;
        };
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(mut f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            let _ = writeln!(f, "{line}");
        }
    }

    /// Read back all journal lines, skipping unparsable ones.
    pub fn read_all(&self) -> Vec<JournalEvent> {
        let Ok(raw) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        raw.lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}
