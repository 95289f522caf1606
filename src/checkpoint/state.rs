//! Durable "next question index" for resumable runs.
//!
//! - The file holds a single `next_index`
//! - Saved atomically (write-then-rename)
//! - Absent or unreadable file → start from 0
//! - Removed once the whole question list has been examined

use super::atomic::write_json_atomic;
use crate::models::{AskbatchError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// On-disk checkpoint contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Index of the next question to examine
    #[serde(alias = "last_index")]
    pub next_index: usize,

    /// Last write time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Owner of the checkpoint file.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a resumable run exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the saved index, or 0 if there is none.
    pub fn load(&self) -> usize {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Unreadable checkpoint, starting from 0");
                return 0;
            }
        };

        match serde_json::from_str::<Checkpoint>(&content) {
            Ok(checkpoint) => {
                debug!(next_index = checkpoint.next_index, "Loaded checkpoint");
                checkpoint.next_index
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Malformed checkpoint, starting from 0");
                0
            }
        }
    }

    /// Persist `next_index`, replacing any previous value.
    pub fn save(&self, next_index: usize) -> Result<()> {
        let checkpoint = Checkpoint {
            next_index,
            updated_at: Some(Utc::now()),
        };
        write_json_atomic(&self.path, &checkpoint)?;
        debug!(next_index, "Checkpoint saved");
        Ok(())
    }

    /// Remove the checkpoint file. Missing file is fine.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Run complete, checkpoint cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AskbatchError::io("removing checkpoint", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> CheckpointStore {
        CheckpointStore::new(dir.path().join("checkpoint.json"))
    }

    #[test]
    fn test_missing_checkpoint_is_zero() {
        let dir = TempDir::new().unwrap();
        let cp = store(&dir);
        assert!(!cp.exists());
        assert_eq!(cp.load(), 0);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let cp = store(&dir);
        cp.save(7).unwrap();
        assert!(cp.exists());
        assert_eq!(cp.load(), 7);

        cp.save(8).unwrap();
        assert_eq!(cp.load(), 8);
    }

    #[test]
    fn test_malformed_checkpoint_is_zero() {
        let dir = TempDir::new().unwrap();
        let cp = store(&dir);
        fs::write(cp.path(), "{\"next_index\": ").unwrap();
        assert_eq!(cp.load(), 0);
    }

    #[test]
    fn test_legacy_field_name() {
        let dir = TempDir::new().unwrap();
        let cp = store(&dir);
        fs::write(cp.path(), r#"{"last_index": 12}"#).unwrap();
        assert_eq!(cp.load(), 12);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cp = store(&dir);
        cp.save(3).unwrap();
        cp.clear().unwrap();
        assert!(!cp.exists());
        cp.clear().unwrap();
        assert_eq!(cp.load(), 0);
    }
}
