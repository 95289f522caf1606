//! Append-only result collection persisted as one JSON array.
//!
//! Every append reloads the file, pushes the record and rewrites the whole
//! array atomically, so the file on disk is always a complete snapshot.

use crate::checkpoint::write_json_atomic;
use crate::models::{AnswerRecord, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Owner of the result file and the in-memory set of answered questions.
#[derive(Debug)]
pub struct ResultStore {
    path: PathBuf,
    /// Question texts already present; built once at open
    seen: HashSet<String>,
    /// Records on disk after the last load or append
    count: usize,
}

impl ResultStore {
    /// Open the store at `path`, indexing any records already saved.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = load_records(&path);
        let seen: HashSet<String> = records.iter().map(|r| r.question.clone()).collect();

        if !records.is_empty() {
            info!(
                path = %path.display(),
                records = records.len(),
                distinct = seen.len(),
                "Found existing results"
            );
        }

        Self {
            path,
            count: records.len(),
            seen,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records in the store.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Read the full persisted collection.
    pub fn load(&self) -> Vec<AnswerRecord> {
        load_records(&self.path)
    }

    /// Whether `question` already has a stored record.
    pub fn contains(&self, question: &str) -> bool {
        self.seen.contains(question)
    }

    /// Add `question` to the in-memory set without touching disk.
    pub fn remember(&mut self, question: &str) {
        self.seen.insert(question.to_string());
    }

    /// Persist `record` at the end of the collection.
    ///
    /// Returns the total number of records after the write.
    pub fn append(&mut self, record: &AnswerRecord) -> Result<usize> {
        let mut records = load_records(&self.path);
        records.push(record.clone());
        write_json_atomic(&self.path, &records)?;

        self.count = records.len();
        debug!(total = self.count, "Result appended");
        Ok(self.count)
    }
}

/// Load records from disk; absent or malformed files read as empty.
fn load_records(path: &Path) -> Vec<AnswerRecord> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Unreadable result file, treating as empty");
            return Vec::new();
        }
    };

    if content.trim().is_empty() {
        return Vec::new();
    }

    let items: Vec<Value> = match serde_json::from_str(&content) {
        Ok(items) => items,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Malformed result file, treating as empty");
            return Vec::new();
        }
    };

    let total = items.len();
    let records: Vec<AnswerRecord> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();

    if records.len() < total {
        warn!(
            path = %path.display(),
            skipped = total - records.len(),
            "Ignoring entries without a question"
        );
    }

    records
}
