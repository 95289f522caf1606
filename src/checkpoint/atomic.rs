//! Crash-safe whole-file replacement.
//!
//! Writes go to a sibling temp file which is flushed, synced and then renamed
//! over the target. A crash leaves either the previous complete file or the
//! new complete file on disk, never a truncated one.

use crate::models::{AskbatchError, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Temp path used while replacing `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

/// Serialize `value` as pretty JSON (4-space indent) and atomically replace `path`.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| AskbatchError::io("creating output dir", e))?;
    }

    let temp = temp_path(path);
    {
        let file = File::create(&temp).map_err(|e| AskbatchError::io("creating temp file", e))?;
        let mut writer = BufWriter::new(file);

        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut writer, formatter);
        value
            .serialize(&mut ser)
            .map_err(|e| AskbatchError::Serialize(e.to_string()))?;
        writer
            .write_all(b"\n")
            .map_err(|e| AskbatchError::io("writing temp file", e))?;

        let file = writer
            .into_inner()
            .map_err(|e| AskbatchError::io("flushing temp file", e.into_error()))?;
        file.sync_all()
            .map_err(|e| AskbatchError::io("syncing temp file", e))?;
    }

    fs::rename(&temp, path).map_err(|e| AskbatchError::io("renaming temp file", e))?;
    Ok(())
}
