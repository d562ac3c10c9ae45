//! Versioned document store for workflow state.
//!
//! One JSON document per project at a well-known relative path. `save`
//! owns the version counter: it re-reads the on-disk version at save time
//! and writes `disk + 1` onto a copy of the caller's document, so a stale
//! in-memory version can never roll the counter back. Writes go through a
//! temp sibling + rename for atomicity.

use crate::core::error::PhasegateError;
use crate::core::output::debug_note;
use crate::core::state::WorkflowState;
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const STATE_DIR: &str = ".phasegate/state";
pub const STATE_FILE: &str = "workflow.json";

pub struct StateStore {
    root: PathBuf,
    /// Sub-project namespace in a monorepo layout.
    project: Option<String>,
}

impl StateStore {
    pub fn new(root: &Path, project: Option<&str>) -> Self {
        Self {
            root: root.to_path_buf(),
            project: project.map(str::to_string),
        }
    }

    pub fn state_path(&self) -> PathBuf {
        let base = self.root.join(STATE_DIR);
        match &self.project {
            Some(project) => base.join(project).join(STATE_FILE),
            None => base.join(STATE_FILE),
        }
    }

    /// Load the current document. Absent or unreadable files read as
    /// `None`; an unparsable document is logged and also reads as `None`
    /// rather than blocking anything.
    pub fn load(&self) -> Option<WorkflowState> {
        let path = self.state_path();
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(err) => {
                debug_note(&format!(
                    "state document at {} unparsable ({err}); treating as absent",
                    path.display()
                ));
                None
            }
        }
    }

    /// Version currently on disk, if a readable document exists.
    pub fn disk_version(&self) -> Option<u64> {
        let raw = std::fs::read_to_string(self.state_path()).ok()?;
        let value: Value = serde_json::from_str(&raw).ok()?;
        value.get("state_version").and_then(Value::as_u64)
    }

    /// Persist a candidate document, computing `next = disk + 1` (or 1 when
    /// no file exists) on a clone. The caller's document is never mutated.
    /// Returns the persisted version.
    pub fn save(&self, candidate: &WorkflowState) -> Result<u64, PhasegateError> {
        let next_version = self.disk_version().unwrap_or(0) + 1;
        let mut persisted = candidate.clone();
        persisted.state_version = next_version;

        let path = self.state_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&persisted)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(next_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_absent_is_none() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), None);
        assert!(store.load().is_none());
    }

    #[test]
    fn test_first_save_is_version_one() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), None);
        let version = store.save(&WorkflowState::default()).unwrap();
        assert_eq!(version, 1);
        assert_eq!(store.load().unwrap().state_version, 1);
    }

    #[test]
    fn test_save_increments_disk_version_not_caller_version() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), None);

        let mut doc = WorkflowState::default();
        // Caller holds a bogus version; disk is authoritative.
        doc.state_version = 999;
        store.save(&doc).unwrap();
        assert_eq!(store.disk_version(), Some(1));

        // A stale caller copy still produces disk + 1.
        for expected in 2..=5u64 {
            let version = store.save(&doc).unwrap();
            assert_eq!(version, expected);
        }
        // The caller's document was never mutated.
        assert_eq!(doc.state_version, 999);
    }

    #[test]
    fn test_disk_version_five_saves_as_six() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), None);
        let mut doc = WorkflowState::default();
        doc.state_version = 5;
        std::fs::create_dir_all(store.state_path().parent().unwrap()).unwrap();
        std::fs::write(
            store.state_path(),
            serde_json::to_string(&doc).unwrap(),
        )
        .unwrap();

        let version = store.save(&WorkflowState::default()).unwrap();
        assert_eq!(version, 6);
    }

    #[test]
    fn test_project_namespacing() {
        let dir = TempDir::new().unwrap();
        let store_a = StateStore::new(dir.path(), Some("svc-a"));
        let store_b = StateStore::new(dir.path(), Some("svc-b"));
        store_a.save(&WorkflowState::default()).unwrap();
        assert!(store_a.load().is_some());
        assert!(store_b.load().is_none());
    }

    #[test]
    fn test_corrupt_document_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), None);
        std::fs::create_dir_all(store.state_path().parent().unwrap()).unwrap();
        std::fs::write(store.state_path(), "{broken").unwrap();
        assert!(store.load().is_none());
        // And the next save starts the counter fresh.
        assert_eq!(store.save(&WorkflowState::default()).unwrap(), 1);
    }
}
