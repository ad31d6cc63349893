//! Streaming run manager (§4.7).
//!
//! A long crawl run streams its discoveries one batch at a time instead of
//! holding everything in memory: `start` truncates a JSONL bucket,
//! `append` writes one record per batch, and `finalize` replays the whole
//! bucket through the frontier engine as if it had arrived in one shot.
//! An idle-bucket watchdog finalizes runs a client forgot to close.

use crate::artifacts::{self, rows_from_urls};
use crate::config::ArtifactEncoding;
use crate::domain::DomainKey;
use crate::frontier::{self, FrontierOptions, FrontierRequest};
use crate::state::{FileCandidate, StateResult, StateStore};
use crate::storage::append_jsonl_line;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const MAX_RUN_ID_LEN: usize = 120;

/// One line of a streaming run bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRecord {
    pub ts: String,
    pub level: u32,
    pub run_id: String,
    #[serde(default)]
    pub visited: Vec<String>,
    #[serde(default)]
    pub pages: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileCandidate>,
}

/// `.done` marker contents: a finalize summary, re-read verbatim by a
/// repeat finalize call so the operation is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeSummary {
    pub level: u32,
    pub run_id: String,
    pub visited_count: usize,
    pub pages_count: usize,
    pub files_count: usize,
    pub remaining_count: usize,
}

/// Sanitizes a run id for use in a filename: non-`[A-Za-z0-9._-]`
/// characters become `_`, capped to 120 characters.
pub fn safe_run_id(run_id: &str) -> String {
    let sanitized: String = run_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    sanitized.chars().take(MAX_RUN_ID_LEN).collect()
}

fn bucket_filename(level: u32, run_id: &str) -> String {
    format!("discover_level_{level}_{}.jsonl", safe_run_id(run_id))
}

pub fn bucket_path(store: &StateStore, level: u32, run_id: &str) -> PathBuf {
    store.runs_dir().join(bucket_filename(level, run_id))
}

fn done_marker_path(bucket: &Path) -> PathBuf {
    let mut name = bucket.as_os_str().to_os_string();
    name.push(".done");
    PathBuf::from(name)
}

/// Truncates the bucket for `(level, run_id)` and clears any `.done`
/// marker, starting a fresh streaming run.
pub fn start(store: &StateStore, level: u32, run_id: &str) -> StateResult<()> {
    store.ensure_layout()?;
    let path = bucket_path(store, level, run_id);
    if let Some(parent) = path.parent() {
        crate::storage::ensure_dir(parent)?;
    }
    std::fs::write(&path, b"").map_err(|e| crate::storage::StorageError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let _ = std::fs::remove_file(done_marker_path(&path));
    Ok(())
}

/// Appends one batch record to the bucket for `(level, run_id)`.
pub fn append(store: &StateStore, level: u32, run_id: &str, batch: RunBatch) -> StateResult<()> {
    let path = bucket_path(store, level, run_id);
    let record = RunRecord {
        ts: chrono::Utc::now().to_rfc3339(),
        level,
        run_id: run_id.to_string(),
        visited: batch.visited,
        pages: batch.pages,
        files: batch.files,
    };
    append_jsonl_line(&path, &record)?;
    Ok(())
}

/// One batch of a streaming append call.
#[derive(Debug, Clone, Default)]
pub struct RunBatch {
    pub visited: Vec<String>,
    pub pages: Vec<String>,
    pub files: Vec<FileCandidate>,
}

/// Replays the bucket for `(level, run_id)`, unions all visited/pages,
/// merges files by URL, and invokes the frontier engine as if the whole
/// batch had arrived at once. Writes the usual frontier artifacts plus a
/// `urls-level-L.remaining.json` (input frontier for L minus visited) and
/// a `.done` marker. A repeat call for an already-finalized bucket returns
/// the marker's recorded summary unchanged.
pub fn finalize(
    store: &StateStore,
    encoding: ArtifactEncoding,
    chunk_size: usize,
    level: u32,
    run_id: &str,
) -> StateResult<FinalizeSummary> {
    let path = bucket_path(store, level, run_id);
    let marker = done_marker_path(&path);

    if marker.exists() {
        if let Ok(content) = std::fs::read_to_string(&marker) {
            if let Ok(summary) = serde_json::from_str::<FinalizeSummary>(&content) {
                return Ok(summary);
            }
        }
    }

    let records: Vec<RunRecord> = crate::storage::read_jsonl_lines::<RunRecord>(&path)?
        .filter_map(Result::ok)
        .collect();

    let mut visited_set: BTreeSet<String> = BTreeSet::new();
    let mut pages_ordered: Vec<String> = Vec::new();
    let mut files_ordered: Vec<FileCandidate> = Vec::new();

    for record in &records {
        visited_set.extend(record.visited.iter().cloned());
        pages_ordered.extend(record.pages.iter().cloned());
        files_ordered.extend(record.files.iter().cloned());
    }

    let merged_files = frontier::merge_files_by_url(files_ordered);

    let outcome = frontier::apply(
        store,
        encoding,
        chunk_size,
        FrontierRequest {
            level,
            visited: visited_set.iter().cloned().collect(),
            discovered_pages: pages_ordered,
            discovered_files: merged_files,
            options: FrontierOptions::default(),
        },
    )?;

    let input_frontier_path = store.artifacts_dir().join(format!("urls-level-{level}.json"));
    let input_frontier = artifacts::read_url_rows(&input_frontier_path);
    let remaining: Vec<String> = input_frontier
        .into_iter()
        .filter(|u| !visited_set.contains(u))
        .collect();

    let remaining_path = store
        .artifacts_dir()
        .join(format!("urls-level-{level}.remaining.json"));
    artifacts::write_artifact(
        &remaining_path,
        rows_from_urls(&remaining),
        &json!({ "level": level, "kind": "urls_remaining" }),
        encoding,
    )?;
    artifacts::write_chunked(
        &remaining_path,
        "urls_remaining",
        level,
        &rows_from_urls(&remaining),
        chunk_size,
        &json!({ "level": level, "kind": "urls_remaining" }),
        encoding,
    )?;

    let summary = FinalizeSummary {
        level,
        run_id: run_id.to_string(),
        visited_count: visited_set.len(),
        pages_count: outcome.next_frontier.len(),
        files_count: outcome.new_files.len(),
        remaining_count: remaining.len(),
    };

    crate::storage::write_json_atomic(&marker, &summary)?;
    Ok(summary)
}

/// Scans `runs/<domain>/*.jsonl` for buckets lacking a `.done` sibling
/// whose mtime is older than `idle_ms` and whose size is non-zero, and
/// finalizes each one. Intended to run under the same mutation lock as
/// every other mutating handler, on an `interval_ms` tick.
pub fn run_watchdog_sweep(
    store: &StateStore,
    encoding: ArtifactEncoding,
    chunk_size: usize,
    idle_ms: u64,
    now: std::time::SystemTime,
) -> StateResult<Vec<FinalizeSummary>> {
    let dir = store.runs_dir();
    let mut finalized = Vec::new();

    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Ok(finalized);
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        if done_marker_path(&path).exists() {
            continue;
        }

        let Ok(metadata) = entry.metadata() else { continue };
        if metadata.len() == 0 {
            continue;
        }
        let Ok(modified) = metadata.modified() else { continue };
        let Ok(age) = now.duration_since(modified) else { continue };
        if age.as_millis() < idle_ms as u128 {
            continue;
        }

        if let Some((level, run_id)) = parse_bucket_filename(&path) {
            let summary = finalize(store, encoding, chunk_size, level, &run_id)?;
            finalized.push(summary);
        }
    }

    Ok(finalized)
}

/// Counts streaming buckets across every domain under `runs/` that are
/// JSONL-present but lack a `.done` marker — the "currently open" count
/// `GET /health` reports (§4.10).
pub fn count_open_buckets(project_root: &Path) -> usize {
    let runs_root = project_root.join("BFS_crawl").join("runs");
    let Ok(domains) = std::fs::read_dir(&runs_root) else {
        return 0;
    };

    let mut count = 0;
    for domain_entry in domains.flatten() {
        let domain_dir = domain_entry.path();
        if !domain_dir.is_dir() {
            continue;
        }
        let Ok(entries) = std::fs::read_dir(&domain_dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if !done_marker_path(&path).exists() {
                count += 1;
            }
        }
    }
    count
}

fn parse_bucket_filename(path: &Path) -> Option<(u32, String)> {
    let stem = path.file_stem()?.to_str()?;
    let rest = stem.strip_prefix("discover_level_")?;
    let (level_str, run_id) = rest.split_once('_')?;
    let level: u32 = level_str.parse().ok()?;
    Some((level, run_id.to_string()))
}

/// Locates a run bucket by filename across every domain under `runs/`,
/// for a finalize request that arrived without a domain hint and found no
/// match in the default namespace. Selects the largest match by file size.
pub fn find_bucket_across_domains(
    project_root: &Path,
    level: u32,
    run_id: &str,
) -> Option<(DomainKey, PathBuf)> {
    let runs_root = project_root.join("BFS_crawl").join("runs");
    let target_name = bucket_filename(level, run_id);

    let mut best: Option<(DomainKey, PathBuf, u64)> = None;

    let entries = std::fs::read_dir(&runs_root).ok()?;
    for domain_entry in entries.flatten() {
        let domain_dir = domain_entry.path();
        if !domain_dir.is_dir() {
            continue;
        }
        let candidate = domain_dir.join(&target_name);
        if let Ok(metadata) = std::fs::metadata(&candidate) {
            let domain_name = domain_entry.file_name().to_string_lossy().to_string();
            let size = metadata.len();
            let better = match &best {
                Some((_, _, best_size)) => size > *best_size,
                None => true,
            };
            if better {
                best = Some((DomainKey::from_host(&domain_name), candidate, size));
            }
        }
    }

    best.map(|(domain, path, _)| (domain, path))
}

/// What's left to download at one level after comparing `files-level-L.json`
/// against the hash registry's saved files.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub level: u32,
    pub expected: usize,
    pub remaining: Vec<FileCandidate>,
}

/// Reconciles discovered-but-possibly-undownloaded files for one level:
/// `files-level-L.json` names what was expected; a file counts as
/// downloaded if some source observation in the registry cites this level
/// for a record whose `saved_to` still exists on disk. Emits
/// `files-level-L.remaining.json` and its chunked variants.
pub fn reconcile_level_files(
    store: &StateStore,
    encoding: ArtifactEncoding,
    chunk_size: usize,
    level: u32,
) -> StateResult<ReconcileOutcome> {
    let state = store.load_state()?;
    let expected: Vec<FileCandidate> = state
        .levels
        .get(&level)
        .map(|lvl| lvl.discovered_files.clone())
        .unwrap_or_default();

    let registry = store.load_hash_registry()?;
    let root = store.project_root();
    let downloaded_urls: BTreeSet<String> = registry
        .records
        .values()
        .filter(|r| r.saved_to.as_ref().is_some_and(|p| root.join(p).is_file()))
        .flat_map(|r| r.sources.iter())
        .filter(|s| s.level == level)
        .map(|s| s.url.clone())
        .collect();

    let remaining: Vec<FileCandidate> = expected
        .iter()
        .filter(|f| !downloaded_urls.contains(&f.url))
        .cloned()
        .collect();

    let remaining_path = store.artifacts_dir().join(format!("files-level-{level}.remaining.json"));
    artifacts::write_artifact(
        &remaining_path,
        crate::artifacts::rows_from_serializable(&remaining),
        &json!({ "level": level, "kind": "files_remaining" }),
        encoding,
    )?;
    artifacts::write_chunked(
        &remaining_path,
        "files_remaining",
        level,
        &crate::artifacts::rows_from_serializable(&remaining),
        chunk_size,
        &json!({ "level": level, "kind": "files_remaining" }),
        encoding,
    )?;

    Ok(ReconcileOutcome { level, expected: expected.len(), remaining })
}

/// Reconciles every level with at least one discovered file, skipping
/// levels already fully downloaded.
pub fn reconcile_incomplete_levels(
    store: &StateStore,
    encoding: ArtifactEncoding,
    chunk_size: usize,
) -> StateResult<Vec<ReconcileOutcome>> {
    let state = store.load_state()?;
    let mut outcomes = Vec::new();
    for level in state.levels.keys().copied().collect::<Vec<_>>() {
        let outcome = reconcile_level_files(store, encoding, chunk_size, level)?;
        if !outcome.remaining.is_empty() {
            outcomes.push(outcome);
        }
    }
    Ok(outcomes)
}

/// Summary of a `/runs/start/files` hard reset.
#[derive(Debug, Clone, Serialize)]
pub struct ResetFilesOutcome {
    pub level: u32,
    pub deleted: usize,
    pub retained: usize,
}

/// Hard-resets a file-download level: any registry record whose sources
/// only ever cited this level is deleted along with its on-disk file; a
/// record also cited by another level keeps its file and just drops the
/// source observations for this level. The level's manifest is cleared.
pub fn reset_level_files(store: &StateStore, level: u32) -> StateResult<ResetFilesOutcome> {
    let mut registry = store.load_hash_registry()?;
    let manifest = store.load_level_file_manifest(level)?;
    let root = store.project_root();

    let mut deleted = 0usize;
    let mut retained = 0usize;

    for entry in &manifest.entries {
        let Some(mut record) = registry.records.get(&entry.sha256).cloned() else {
            continue;
        };
        record.sources.retain(|s| s.level != level);

        if record.sources.is_empty() {
            if let Some(saved_to) = &record.saved_to {
                let _ = std::fs::remove_file(root.join(saved_to));
            }
            registry.records.remove(&entry.sha256);
            deleted += 1;
        } else {
            registry.records.insert(entry.sha256.clone(), record);
            retained += 1;
        }
    }

    store.save_hash_registry(&registry)?;
    store.save_level_file_manifest(level, &crate::state::LevelFileManifest::default())?;

    append_jsonl_line(
        &store.level_resets_log_path(),
        &json!({
            "ts": chrono::Utc::now().to_rfc3339(),
            "level": level,
            "deleted": deleted,
            "retained": retained,
        }),
    )?;

    Ok(ResetFilesOutcome { level, deleted, retained })
}
