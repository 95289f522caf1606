//! Ordered question list read from a text file.

use crate::models::{AskbatchError, InputConfig, Result, SourceFormat};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::info;

/// Restartable source of questions in file order.
#[derive(Debug, Clone)]
pub struct QuestionSource {
    path: PathBuf,
    format: SourceFormat,
    skip_lines: usize,
}

impl QuestionSource {
    /// Create a source, failing if the file does not exist.
    pub fn new(path: impl Into<PathBuf>, format: SourceFormat, skip_lines: usize) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(AskbatchError::SourceNotFound(path));
        }
        Ok(Self {
            path,
            format,
            skip_lines,
        })
    }

    pub fn from_config(input: &InputConfig) -> Result<Self> {
        Self::new(&input.path, input.format, input.skip_lines)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Iterate questions lazily. Each call re-reads the file from the top.
    pub fn questions(&self) -> Result<Box<dyn Iterator<Item = Result<String>>>> {
        let file = File::open(&self.path).map_err(|e| AskbatchError::io("opening question list", e))?;
        let reader = BufReader::new(file);

        let questions: Box<dyn Iterator<Item = Result<String>>> = match self.format {
            SourceFormat::Lines => Box::new(reader.lines().skip(self.skip_lines).filter_map(
                |line| match line {
                    Ok(line) => non_blank(&line).map(Ok),
                    Err(e) => Some(Err(AskbatchError::io("reading question list", e))),
                },
            )),
            SourceFormat::Csv => Box::new(
                csv::ReaderBuilder::new()
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(reader)
                    .into_records()
                    .skip(self.skip_lines)
                    .filter_map(|record| match record {
                        Ok(record) => record.get(0).and_then(non_blank).map(Ok),
                        Err(e) => Some(Err(AskbatchError::Csv(e))),
                    }),
            ),
        };
        Ok(questions)
    }

    /// Collect all questions.
    pub fn load(&self) -> Result<Vec<String>> {
        let questions = self.questions()?.collect::<Result<Vec<_>>>()?;
        info!(count = questions.len(), path = %self.path.display(), "Loaded questions");
        Ok(questions)
    }
}

/// Trimmed question text, or None for a blank record.
fn non_blank(text: &str) -> Option<String> {
    let text = text.trim_start_matches('\u{feff}').trim();
    (!text.is_empty()).then(|| text.to_string())
}
