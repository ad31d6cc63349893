//! Artifact writer: encodes a row set to disk, with optional chunking (§4.6).
//!
//! Two shapes are supported, selected per domain by `ArtifactEncoding`:
//! meta-first-row (metadata folded into the first real row, minimizing
//! duplication across millions of rows) and legacy (every row carries its
//! own `level`/`kind`). Both go through the same chunking logic.

use crate::config::ArtifactEncoding;
use crate::storage::{ensure_dir, write_json_atomic, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// A single output row before encoding: either a plain URL or a richer
/// value (e.g. a file candidate). Kept as `serde_json::Value` so the
/// artifact writer stays agnostic to the caller's concrete row type.
pub fn rows_from_urls(urls: &[String]) -> Vec<Value> {
    urls.iter().map(|u| json!({ "url": u })).collect()
}

/// Reads a previously-written artifact and extracts its `url` field from
/// every row, in file order. Returns an empty list for a missing or
/// unparseable file.
pub fn read_url_rows(path: &Path) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let Ok(rows) = serde_json::from_str::<Vec<Value>>(&content) else {
        return Vec::new();
    };
    rows.into_iter()
        .filter_map(|row| row.get("url").and_then(|u| u.as_str()).map(str::to_string))
        .collect()
}

/// Same as [`read_url_rows`] but deduplicated into a set.
pub fn read_url_set(path: &Path) -> BTreeSet<String> {
    read_url_rows(path).into_iter().collect()
}

/// Reads a previously-written artifact and deserializes every row as `T`.
/// Returns an empty list for a missing or unparseable file.
pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Vec<T> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    serde_json::from_str::<Vec<T>>(&content).unwrap_or_default()
}

pub fn rows_from_serializable<T: Serialize>(items: &[T]) -> Vec<Value> {
    items
        .iter()
        .map(|item| serde_json::to_value(item).unwrap_or(Value::Null))
        .collect()
}

/// One manifest part entry.
#[derive(Debug, Clone, Serialize)]
pub struct PartEntry {
    pub index: usize,
    pub path: String,
    pub count: usize,
}

/// The `base.parts.json` chunk manifest.
#[derive(Debug, Clone, Serialize)]
pub struct PartsManifest {
    pub kind: String,
    pub level: u32,
    pub chunk_size: usize,
    pub total: usize,
    pub parts: Vec<PartEntry>,
}

/// Encodes `rows` to `base_path`, folding `meta` into the first row when
/// `encoding` is [`ArtifactEncoding::MetaFirstRow`], or attaching it to every
/// row when [`ArtifactEncoding::Legacy`].
///
/// An empty `rows` removes any pre-existing artifact at `base_path` (§4.6:
/// "Empty input removes pre-existing artifact files at the same base path").
pub fn write_artifact(
    base_path: &Path,
    rows: Vec<Value>,
    meta: &Value,
    encoding: ArtifactEncoding,
) -> Result<(), StorageError> {
    if rows.is_empty() {
        let _ = std::fs::remove_file(base_path);
        return Ok(());
    }

    let encoded = encode_rows(rows, meta, encoding);
    write_json_atomic(base_path, &encoded)
}

fn encode_rows(mut rows: Vec<Value>, meta: &Value, encoding: ArtifactEncoding) -> Vec<Value> {
    match encoding {
        ArtifactEncoding::Legacy => {
            for row in rows.iter_mut() {
                merge_object(row, meta);
            }
            rows
        }
        ArtifactEncoding::MetaFirstRow => {
            if let Some(first) = rows.first_mut() {
                merge_object(first, meta);
                let mut with_meta_flag = json!({ "_meta": true });
                merge_object(&mut with_meta_flag, first);
                *first = with_meta_flag;
            }
            rows
        }
    }
}

fn merge_object(target: &mut Value, extra: &Value) {
    if let (Value::Object(target_map), Value::Object(extra_map)) = (target, extra) {
        for (k, v) in extra_map {
            target_map.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

/// Splits `items` into contiguous chunks of at most `chunk_size`, writes
/// `base.part-<i>-of-<N>.json` (index zero-padded to width ≥ 4) for each,
/// and writes a `base.parts.json` manifest describing them.
///
/// An empty `items` removes any pre-existing part files and manifest.
pub fn write_chunked(
    base_path: &Path,
    kind: &str,
    level: u32,
    items: &[Value],
    chunk_size: usize,
    meta: &Value,
    encoding: ArtifactEncoding,
) -> Result<PartsManifest, StorageError> {
    let manifest_path = parts_manifest_path(base_path);

    if items.is_empty() {
        remove_existing_parts(base_path)?;
        let _ = std::fs::remove_file(&manifest_path);
        return Ok(PartsManifest {
            kind: kind.to_string(),
            level,
            chunk_size,
            total: 0,
            parts: vec![],
        });
    }

    let chunk_size = chunk_size.max(1);
    let chunks: Vec<&[Value]> = items.chunks(chunk_size).collect();
    let total = chunks.len();
    let width = total.to_string().len().max(4);

    let mut parts = Vec::with_capacity(total);
    for (i, chunk) in chunks.iter().enumerate() {
        let part_path = part_path(base_path, i, total, width);
        let encoded = encode_rows(chunk.to_vec(), meta, encoding);
        write_json_atomic(&part_path, &encoded)?;
        parts.push(PartEntry {
            index: i,
            path: part_path.display().to_string(),
            count: chunk.len(),
        });
    }

    let manifest = PartsManifest {
        kind: kind.to_string(),
        level,
        chunk_size,
        total,
        parts,
    };
    write_json_atomic(&manifest_path, &manifest)?;
    Ok(manifest)
}

fn part_path(base_path: &Path, index: usize, total: usize, width: usize) -> PathBuf {
    let stem = base_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    let parent = base_path.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(
        "{stem}.part-{:0width$}-of-{total}.json",
        index,
        width = width
    ))
}

fn parts_manifest_path(base_path: &Path) -> PathBuf {
    let stem = base_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    let parent = base_path.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{stem}.parts.json"))
}

fn remove_existing_parts(base_path: &Path) -> Result<(), StorageError> {
    let parent = base_path.parent().unwrap_or_else(|| Path::new("."));
    ensure_dir(parent)?;
    let stem = base_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    let prefix = format!("{stem}.part-");

    if let Ok(entries) = std::fs::read_dir(parent) {
        for entry in entries.flatten() {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(&prefix) {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }
    }
    Ok(())
}
