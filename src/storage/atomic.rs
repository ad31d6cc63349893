//! Atomic JSON persistence, safe path joining, and directory creation.
//!
//! All JSON writes go through [`write_json_atomic`]: the value is serialized
//! to a temp file in the same directory as the target, flushed and synced,
//! then renamed over the target. A reader can never observe a half-written
//! file. On a failed write the temp file is left behind (its name carries
//! the PID, a timestamp, and a random suffix) for the next write to
//! overwrite — see §5 Resource discipline.

use crate::storage::traits::{StorageError, StorageResult};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

fn io_err(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Recursively creates a directory (and its parents) if it does not exist.
pub fn ensure_dir(path: &Path) -> StorageResult<()> {
    fs::create_dir_all(path).map_err(|e| io_err(path, e))
}

/// Serializes `value` as two-space-indented JSON and writes it atomically to
/// `path`: write to a uniquely-named temp file beside the target, flush and
/// sync it, then rename over the target.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    ensure_dir(parent)?;

    let content = serde_json::to_vec_pretty(value)?;
    let tmp_path = parent.join(temp_file_name(path));

    {
        let mut file = fs::File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
        file.write_all(&content).map_err(|e| io_err(&tmp_path, e))?;
        file.sync_all().map_err(|e| io_err(&tmp_path, e))?;
    }

    fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// Reads and parses JSON from `path`, tolerating a missing file by invoking
/// `default` instead of erroring.
pub fn read_json_or_default<T, F>(path: &Path, default: F) -> StorageResult<T>
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(default()),
        Err(e) => Err(io_err(path, e)),
    }
}

/// Builds a temp-file name carrying the PID, a timestamp, and a random
/// suffix, keyed off the target file's own name so concurrent writers to
/// different artifacts never collide.
fn temp_file_name(target: &Path) -> String {
    let stem = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    let pid = std::process::id();
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
    let suffix: u32 = rand::rng().random();
    format!(".{stem}.{pid}.{nanos}.{suffix:08x}.tmp")
}

/// Joins `relative` onto `root`, refusing to escape `root` via `..` or an
/// embedded absolute path. Used whenever a path stored in persistent state
/// (always relative to the project root, §4.2) is resolved to an absolute
/// filesystem path.
pub fn safe_join(root: &Path, relative: &str) -> StorageResult<PathBuf> {
    let mut result = root.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => result.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StorageError::PathEscape(relative.to_string()));
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_write_and_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sub/state.json");
        let value = json!({"a": 1, "b": [1, 2, 3]});

        write_json_atomic(&path, &value).unwrap();

        let read_back: serde_json::Value =
            read_json_or_default(&path, || json!(null)).unwrap();
        assert_eq!(read_back, value);
    }

    #[test]
    fn test_write_is_two_space_indented() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_json_atomic(&path, &json!({"a": 1})).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\n  \"a\""));
    }

    #[test]
    fn test_write_leaves_no_temp_file_behind_on_success() {
        let dir = tempdir().unwrap();
        write_json_atomic(&dir.path().join("state.json"), &json!({"a": 1})).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], "state.json");
    }

    #[test]
    fn test_read_missing_file_returns_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let value: serde_json::Value =
            read_json_or_default(&path, || json!({"default": true})).unwrap();
        assert_eq!(value, json!({"default": true}));
    }

    #[test]
    fn test_safe_join_rejects_parent_dir() {
        let root = Path::new("/project/root");
        assert!(safe_join(root, "../../etc/passwd").is_err());
    }

    #[test]
    fn test_safe_join_rejects_absolute() {
        let root = Path::new("/project/root");
        assert!(safe_join(root, "/etc/passwd").is_err());
    }

    #[test]
    fn test_safe_join_accepts_normal_relative() {
        let root = Path::new("/project/root");
        let joined = safe_join(root, "downloads/example.com/file.pdf").unwrap();
        assert_eq!(joined, Path::new("/project/root/downloads/example.com/file.pdf"));
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
    }
}
