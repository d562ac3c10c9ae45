//! Bounded source-control queries.
//!
//! The only blocking external call in the engine. Each query runs with an
//! explicit deadline; a timeout or failure reads as `None` and the calling
//! check fails open.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

pub const GIT_DEADLINE: Duration = Duration::from_secs(3);

/// Run a git subcommand with a deadline. `None` on spawn failure,
/// non-zero exit, or deadline overrun (the child is killed).
fn run_git(repo_root: &Path, args: &[&str], deadline: Duration) -> Option<String> {
    let mut child = Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .stdin(Stdio::null())
        .spawn()
        .ok()?;

    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    return None;
                }
                let mut out = String::new();
                use std::io::Read;
                child.stdout.take()?.read_to_string(&mut out).ok()?;
                return Some(out.trim().to_string());
            }
            Ok(None) => {
                if started.elapsed() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(_) => {
                let _ = child.kill();
                return None;
            }
        }
    }
}

/// Currently checked-out branch, if the root is a git work tree.
pub fn current_branch(repo_root: &Path) -> Option<String> {
    run_git(repo_root, &["rev-parse", "--abbrev-ref", "HEAD"], GIT_DEADLINE)
        .filter(|b| !b.is_empty())
}

/// Advisory when the active workflow's recorded branch differs from the
/// checked-out one. Fail-open: no repo, no advisory.
pub fn branch_mismatch_note(repo_root: &Path, recorded: &str) -> Option<String> {
    let actual = current_branch(repo_root)?;
    if actual != recorded {
        Some(format!(
            "Note: workflow was started on branch '{recorded}' but '{actual}' is checked out."
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_non_repo_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(current_branch(dir.path()).is_none());
        assert!(branch_mismatch_note(dir.path(), "main").is_none());
    }
}
