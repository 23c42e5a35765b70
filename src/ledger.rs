//! Attempt ledger
//!
//! Persists how many automated repairs were tried for each failing commit,
//! as a flat JSON object of `sha -> count`. An attempt is written to disk
//! before any repair work starts, so a crashed run still counts.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Commit SHA to attempt count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptState {
    entries: BTreeMap<String, u32>,
}

impl AttemptState {
    /// Attempts recorded for `sha`; unknown commits have zero.
    pub fn attempts(&self, sha: &str) -> u32 {
        self.entries.get(sha).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(sha, count)| (sha.as_str(), *count))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn bump(&mut self, sha: &str) -> u32 {
        let count = self.entries.entry(sha.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }
}

/// Result of asking the ledger for another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Attempt granted and persisted; carries the new count.
    Recorded(u32),
    /// Ceiling already hit; nothing was written. Carries the current count.
    CeilingReached(u32),
}

/// Durable per-commit attempt counter with a fixed ceiling.
#[derive(Debug)]
pub struct AttemptLedger {
    path: PathBuf,
    ceiling: u32,
    state: AttemptState,
}

impl AttemptLedger {
    /// Read the ledger at `path`. A missing file is an empty ledger.
    ///
    /// A file that exists but does not parse is an error: silently starting
    /// over would hand every commit a fresh set of attempts.
    pub fn load(path: impl Into<PathBuf>, ceiling: u32) -> Result<Self> {
        let path = path.into();
        let state = load_state(&path)?;
        debug!(path = %path.display(), entries = state.len(), "loaded attempt ledger");
        Ok(Self {
            path,
            ceiling,
            state,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    pub fn attempts(&self, sha: &str) -> u32 {
        self.state.attempts(sha)
    }

    /// Attempts left for `sha` before the ceiling.
    pub fn remaining(&self, sha: &str) -> u32 {
        self.ceiling.saturating_sub(self.attempts(sha))
    }

    /// Check the ceiling without mutating anything.
    pub fn peek(&self, sha: &str) -> RecordOutcome {
        let current = self.attempts(sha);
        if current >= self.ceiling {
            RecordOutcome::CeilingReached(current)
        } else {
            RecordOutcome::Recorded(current + 1)
        }
    }

    /// Count one more attempt for `sha` and persist synchronously.
    ///
    /// At the ceiling nothing changes, in memory or on disk.
    pub fn record(&mut self, sha: &str) -> Result<RecordOutcome> {
        if let RecordOutcome::CeilingReached(current) = self.peek(sha) {
            return Ok(RecordOutcome::CeilingReached(current));
        }
        let mut next = self.state.clone();
        let count = next.bump(sha);
        save_state(&self.path, &next)?;
        self.state = next;
        debug!(sha, attempt = count, "attempt recorded");
        Ok(RecordOutcome::Recorded(count))
    }
}

/// Read a persisted state file; absence yields an empty mapping.
pub fn load_state(path: &Path) -> Result<AttemptState> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(AttemptState::default())
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("Failed to read attempt ledger {}", path.display()))
        }
    };
    if content.trim().is_empty() {
        return Ok(AttemptState::default());
    }
    serde_json::from_str(&content)
        .with_context(|| format!("Attempt ledger {} is corrupted", path.display()))
}

/// Write the whole mapping, creating the parent directory first.
pub fn save_state(path: &Path, state: &AttemptState) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create ledger directory {}", parent.display())
            })?;
        }
    }
    let content = serde_json::to_string(state)?;
    write_atomic(path, &content)
        .with_context(|| format!("Failed to write attempt ledger {}", path.display()))
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content)?;

    // rename replaces the target on every platform; the old ledger stays
    // readable until the new one is in place
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "3f786850e387550fdab836ed7e6dc881de23001b";

    fn ledger_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join(".selfheal").join("state.json")
    }

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = AttemptLedger::load(ledger_path(&dir), 3).unwrap();
        assert!(ledger.state().is_empty());
        assert_eq!(ledger.attempts(SHA), 0);
        assert_eq!(ledger.remaining(SHA), 3);
    }

    #[test]
    fn test_record_counts_across_runs_then_stops() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(&dir);

        for expected in 1..=3 {
            let mut ledger = AttemptLedger::load(&path, 3).unwrap();
            assert_eq!(ledger.record(SHA).unwrap(), RecordOutcome::Recorded(expected));
        }

        let before = fs::read_to_string(&path).unwrap();
        let mut ledger = AttemptLedger::load(&path, 3).unwrap();
        assert_eq!(ledger.record(SHA).unwrap(), RecordOutcome::CeilingReached(3));
        assert_eq!(ledger.attempts(SHA), 3);
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_record_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(&dir);
        assert!(!path.parent().unwrap().exists());

        let mut ledger = AttemptLedger::load(&path, 3).unwrap();
        ledger.record(SHA).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_record_persists_before_returning() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(&dir);

        let mut ledger = AttemptLedger::load(&path, 3).unwrap();
        ledger.record(SHA).unwrap();
        drop(ledger);

        let on_disk = load_state(&path).unwrap();
        assert_eq!(on_disk.attempts(SHA), 1);
    }

    #[test]
    fn test_record_keeps_other_commits() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(&dir);

        let mut ledger = AttemptLedger::load(&path, 3).unwrap();
        ledger.record("aaa").unwrap();
        let mut ledger = AttemptLedger::load(&path, 3).unwrap();
        ledger.record("bbb").unwrap();

        let state = load_state(&path).unwrap();
        assert_eq!(state.attempts("aaa"), 1);
        assert_eq!(state.attempts("bbb"), 1);
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(&dir);

        let mut state = AttemptState::default();
        state.bump("aaa");
        state.bump("aaa");
        state.bump("bbb");
        save_state(&path, &state).unwrap();

        assert_eq!(load_state(&path).unwrap(), state);
    }

    #[test]
    fn test_on_disk_format_is_flat_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(&dir);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"abc123": 2}"#).unwrap();

        let ledger = AttemptLedger::load(&path, 3).unwrap();
        assert_eq!(ledger.attempts("abc123"), 2);
        assert_eq!(ledger.remaining("abc123"), 1);
    }

    #[test]
    fn test_corrupted_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(&dir);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();

        let err = AttemptLedger::load(&path, 3).unwrap_err();
        assert!(err.to_string().contains("corrupted"));
    }

    #[test]
    fn test_peek_does_not_mutate() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(&dir);

        let ledger = AttemptLedger::load(&path, 1).unwrap();
        assert_eq!(ledger.peek(SHA), RecordOutcome::Recorded(1));
        assert_eq!(ledger.attempts(SHA), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_save_replaces_existing_ledger_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(&dir);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!(r#"{{"{}": 2}}"#, SHA)).unwrap();

        let mut ledger = AttemptLedger::load(&path, 3).unwrap();
        assert_eq!(ledger.record(SHA).unwrap(), RecordOutcome::Recorded(3));

        assert_eq!(load_state(&path).unwrap().attempts(SHA), 3);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_leftover_temp_file_does_not_hide_saved_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(&dir);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, format!(r#"{{"{}": 3}}"#, SHA)).unwrap();
        fs::write(path.with_extension("tmp"), "{}").unwrap();

        let mut ledger = AttemptLedger::load(&path, 3).unwrap();
        assert_eq!(ledger.record(SHA).unwrap(), RecordOutcome::CeilingReached(3));
        assert_eq!(load_state(&path).unwrap().attempts(SHA), 3);
    }
}
