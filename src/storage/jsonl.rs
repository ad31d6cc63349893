//! Append-only JSONL logs.
//!
//! Streaming run buckets (§4.7) and any other append-only record log are
//! stored as one JSON value per line. Appends open the file in append mode
//! and write a single line plus newline; nothing here buffers writes across
//! calls, so a crash mid-run loses at most the in-flight append.

use crate::storage::atomic::ensure_dir;
use crate::storage::traits::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

fn io_err(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Appends one JSON-encoded line to `path`, creating the file and its parent
/// directory if they do not exist yet.
pub fn append_jsonl_line<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }

    let mut line = serde_json::to_string(value)?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    file.write_all(line.as_bytes()).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// Returns a lazy iterator over the parsed records in a JSONL file.
///
/// Blank lines are skipped. A missing file yields an empty iterator rather
/// than an error, matching the tolerant-read convention used throughout
/// storage. Each item is itself a `Result`, so one malformed line doesn't
/// abort records read before or after it.
pub fn read_jsonl_lines<T>(
    path: &Path,
) -> StorageResult<Box<dyn Iterator<Item = StorageResult<T>>>>
where
    T: DeserializeOwned + 'static,
{
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Box::new(std::iter::empty()));
        }
        Err(e) => return Err(io_err(path, e)),
    };

    let path_owned = path.to_path_buf();
    let reader = BufReader::new(file);
    let iter = reader.lines().filter_map(move |line| match line {
        Ok(l) if l.trim().is_empty() => None,
        Ok(l) => Some(
            serde_json::from_str::<T>(&l).map_err(|e| StorageError::Serialization(e)),
        ),
        Err(e) => Some(Err(io_err(&path_owned, e))),
    });

    Ok(Box::new(iter))
}
