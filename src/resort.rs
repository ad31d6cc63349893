//! Reconciliation / resort (§4.9).
//!
//! Makes the download tree consistent with the hash registry after a
//! routing-policy change or ad-hoc filesystem edits. Phase A walks the
//! registry and relocates files to where the current policy says they
//! belong; Phase B sweeps the disk for files the registry doesn't know
//! about. Both phases share the same conflict-resolution rules and audit
//! trail.

use crate::routing::{RouteInput, RoutingPolicy};
use crate::state::{HashRecord, ManifestEntry, StateResult, StateStore};
use crate::storage::append_jsonl_line;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const MAX_DUP_SUFFIX: u32 = 999;

/// Whether a resort run actually touches the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    DryRun,
    Apply,
}

/// How to resolve a residual name collision after a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    Suffix,
    Skip,
    Overwrite,
}

/// One action taken (or, in dry-run mode, that would be taken) during a
/// resort pass.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action")]
pub enum ResortAction {
    Missing { sha256: String, saved_to: Option<String> },
    Refresh { sha256: String },
    Move { sha256: String, from: String, to: String },
    Dedupe { sha256: String, deleted: String, canonical: String },
    Displace { sha256: String, occupant_sha256: String, occupant_new_path: String, moved_to: String },
    Suffixed { sha256: String, from: String, to: String },
    Promote { sha256: String, path: String },
    Adopt { sha256: String, path: String },
    DiskDedupe { path: String, canonical: String },
    Renamed { path: String, to: String },
    ConflictSkip { sha256: String, path: String },
}

impl ResortAction {
    fn verb_tag(&self) -> &'static str {
        match self {
            ResortAction::Missing { .. } => "MISSING",
            ResortAction::Refresh { .. } => "REFRESH",
            ResortAction::Move { .. } => "MOVE",
            ResortAction::Dedupe { .. } => "DEDUPE",
            ResortAction::Displace { .. } => "DISPLACE",
            ResortAction::Suffixed { .. } => "DUP",
            ResortAction::Promote { .. } => "PROMOTE",
            ResortAction::Adopt { .. } => "ADOPT",
            ResortAction::DiskDedupe { .. } => "DEDUPE",
            ResortAction::Renamed { .. } => "DUP",
            ResortAction::ConflictSkip { .. } => "MOVE",
        }
    }
}

/// Formats one action as the fixed console trace line: `[MODE|TAG] verb
/// sha8… from\n           -> to`.
pub fn format_console_line(mode: Mode, action: &ResortAction) -> String {
    let mode_tag = if mode == Mode::DryRun { "DRY" } else { action.verb_tag() };
    let sha8 = |s: &str| s.chars().take(8).collect::<String>();

    match action {
        ResortAction::Missing { sha256, saved_to } => format!(
            "[{mode_tag}] missing {}… {}",
            sha8(sha256),
            saved_to.clone().unwrap_or_else(|| "<none>".to_string())
        ),
        ResortAction::Refresh { sha256 } => format!("[{mode_tag}] refresh {}…", sha8(sha256)),
        ResortAction::Move { sha256, from, to }
        | ResortAction::Suffixed { sha256, from, to } => {
            format!("[{mode_tag}] move {}… {}\n           -> {}", sha8(sha256), from, to)
        }
        ResortAction::Dedupe { sha256, deleted, canonical } => format!(
            "[{mode_tag}] dedupe {}… {}\n           -> {}",
            sha8(sha256),
            deleted,
            canonical
        ),
        ResortAction::Displace { sha256, occupant_sha256, occupant_new_path, moved_to } => format!(
            "[{mode_tag}] displace {}… occupant {}… -> {}\n           -> {}",
            sha8(sha256),
            sha8(occupant_sha256),
            occupant_new_path,
            moved_to
        ),
        ResortAction::Promote { sha256, path } => format!("[{mode_tag}] promote {}… {}", sha8(sha256), path),
        ResortAction::Adopt { sha256, path } => format!("[{mode_tag}] adopt {}… {}", sha8(sha256), path),
        ResortAction::DiskDedupe { path, canonical } => {
            format!("[{mode_tag}] dedupe <unindexed> {}\n           -> {}", path, canonical)
        }
        ResortAction::Renamed { path, to } => {
            format!("[{mode_tag}] dup <unindexed> {}\n           -> {}", path, to)
        }
        ResortAction::ConflictSkip { sha256, path } => {
            format!("[{mode_tag}] conflict_skip {}… {}", sha8(sha256), path)
        }
    }
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)?;
            Ok(())
        }
    }
}

/// Finds the first free `base__dupN.ext` path for `N` in `1..=999`, or
/// `None` if every slot is occupied.
fn find_dup_slot(target: &Path) -> Option<PathBuf> {
    let stem = target.file_stem()?.to_string_lossy().to_string();
    let ext = target.extension().map(|e| e.to_string_lossy().to_string());
    let parent = target.parent()?;

    for n in 1..=MAX_DUP_SUFFIX {
        let name = match &ext {
            Some(ext) => format!("{stem}__dup{n}.{ext}"),
            None => format!("{stem}__dup{n}"),
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

fn relative_to_root(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).to_string_lossy().replace('\\', "/")
}

/// Summary of a full resort pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResortSummary {
    pub actions: Vec<String>,
    pub moved: usize,
    pub deduped: usize,
    pub conflicts_skipped: usize,
}

/// Runs Phase A (registry-driven) followed by Phase B (disk-driven sweep),
/// appending every action to the audit log and returning a summary.
pub fn run(
    store: &StateStore,
    policy: &dyn RoutingPolicy,
    policy_metadata: &Value,
    mode: Mode,
    conflict_policy: ConflictPolicy,
    limit: Option<usize>,
) -> StateResult<ResortSummary> {
    store.ensure_layout()?;
    let mut summary = ResortSummary::default();

    let mut registry = store.load_hash_registry()?;
    let shas: Vec<String> = registry.records.keys().cloned().collect();
    let limited: Vec<&String> = match limit {
        Some(n) => shas.iter().take(n).collect(),
        None => shas.iter().collect(),
    };

    for sha in limited {
        let record = registry.records.get(sha).cloned().unwrap();
        let action = phase_a_one(store, policy, policy_metadata, mode, conflict_policy, &mut registry, sha, &record)?;
        log_action(store, &action)?;
        tally(&mut summary, &action);
        summary.actions.push(format_console_line(mode, &action));
    }

    store.save_hash_registry(&registry)?;

    let phase_b_actions = phase_b_sweep(store, &mut registry, mode)?;
    for action in &phase_b_actions {
        log_action(store, action)?;
        tally(&mut summary, action);
        summary.actions.push(format_console_line(mode, action));
    }
    store.save_hash_registry(&registry)?;

    Ok(summary)
}

fn tally(summary: &mut ResortSummary, action: &ResortAction) {
    match action {
        ResortAction::Move { .. } | ResortAction::Suffixed { .. } | ResortAction::Displace { .. } => {
            summary.moved += 1;
        }
        ResortAction::Dedupe { .. } | ResortAction::DiskDedupe { .. } => summary.deduped += 1,
        ResortAction::ConflictSkip { .. } => summary.conflicts_skipped += 1,
        _ => {}
    }
}

fn log_action(store: &StateStore, action: &ResortAction) -> StateResult<()> {
    let entry = json!({
        "ts": Utc::now().to_rfc3339(),
        "action": action,
    });
    append_jsonl_line(&store.dedupe_log_path(), &entry)?;
    Ok(())
}

fn phase_a_one(
    store: &StateStore,
    policy: &dyn RoutingPolicy,
    policy_metadata: &Value,
    mode: Mode,
    conflict_policy: ConflictPolicy,
    registry: &mut crate::state::HashRegistry,
    sha: &str,
    record: &HashRecord,
) -> StateResult<ResortAction> {
    let root = store.project_root();

    let current_path = record.saved_to.as_ref().map(|p| root.join(p));
    let file_present = current_path.as_ref().is_some_and(|p| p.is_file());

    if !file_present {
        return Ok(ResortAction::Missing { sha256: sha.to_string(), saved_to: record.saved_to.clone() });
    }
    let current_path = current_path.unwrap();

    let Some(best) = record.best_source() else {
        return Ok(ResortAction::Missing { sha256: sha.to_string(), saved_to: record.saved_to.clone() });
    };

    let filename_override = current_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string());

    let route_input = RouteInput {
        file_url: &best.url,
        source_page_url: best.source_page_url.as_deref(),
        ext: Some(&record.ext),
        filename_override: filename_override.as_deref(),
        policy_metadata,
    };
    let routed = policy.route(&store.downloads_dir(), store.domain().as_str(), &route_input);
    let desired_path = routed.out_path.clone();

    if desired_path == current_path {
        return Ok(ResortAction::Refresh { sha256: sha.to_string() });
    }

    if !desired_path.exists() {
        if mode == Mode::Apply {
            move_file(&current_path, &desired_path).map_err(|e| crate::storage::StorageError::Io {
                path: desired_path.display().to_string(),
                source: e,
            })?;
            update_record_saved_to(registry, sha, &relative_to_root(root, &desired_path));
            update_level_manifests(store, sha, &relative_to_root(root, &desired_path))?;
        }
        return Ok(ResortAction::Move {
            sha256: sha.to_string(),
            from: relative_to_root(root, &current_path),
            to: relative_to_root(root, &desired_path),
        });
    }

    let occupant_sha = sha256_file(&desired_path).map_err(|e| crate::storage::StorageError::Io {
        path: desired_path.display().to_string(),
        source: e,
    })?;

    if occupant_sha == sha {
        if mode == Mode::Apply {
            std::fs::remove_file(&current_path).map_err(|e| crate::storage::StorageError::Io {
                path: current_path.display().to_string(),
                source: e,
            })?;
            update_record_saved_to(registry, sha, &relative_to_root(root, &desired_path));
            update_level_manifests(store, sha, &relative_to_root(root, &desired_path))?;
        }
        return Ok(ResortAction::Dedupe {
            sha256: sha.to_string(),
            deleted: relative_to_root(root, &current_path),
            canonical: relative_to_root(root, &desired_path),
        });
    }

    let occupant_indexed = registry.records.get(&occupant_sha).cloned();
    let occupant_routes_to_desired = occupant_indexed
        .as_ref()
        .and_then(|occ| occ.best_source())
        .map(|occ_best| {
            let occ_filename = registry
                .records
                .get(&occupant_sha)
                .and_then(|r| r.saved_to.as_ref())
                .and_then(|p| Path::new(p).file_name())
                .map(|n| n.to_string_lossy().to_string());
            let occ_input = RouteInput {
                file_url: &occ_best.url,
                source_page_url: occ_best.source_page_url.as_deref(),
                ext: occupant_indexed.as_ref().map(|r| r.ext.as_str()),
                filename_override: occ_filename.as_deref(),
                policy_metadata,
            };
            policy.route(&store.downloads_dir(), store.domain().as_str(), &occ_input).out_path == desired_path
        })
        .unwrap_or(false);

    let incoming_wins = occupant_indexed.is_none() || !occupant_routes_to_desired;

    if incoming_wins {
        let Some(slot) = find_dup_slot(&desired_path) else {
            return Ok(ResortAction::ConflictSkip { sha256: sha.to_string(), path: relative_to_root(root, &desired_path) });
        };

        if mode == Mode::Apply {
            move_file(&desired_path, &slot).map_err(|e| crate::storage::StorageError::Io {
                path: slot.display().to_string(),
                source: e,
            })?;
            if let Some(mut occ_record) = registry.records.get(&occupant_sha).cloned() {
                occ_record.saved_to = Some(relative_to_root(root, &slot));
                registry.records.insert(occupant_sha.clone(), occ_record);
            }
            move_file(&current_path, &desired_path).map_err(|e| crate::storage::StorageError::Io {
                path: desired_path.display().to_string(),
                source: e,
            })?;
            update_record_saved_to(registry, sha, &relative_to_root(root, &desired_path));
            update_level_manifests(store, sha, &relative_to_root(root, &desired_path))?;
        }

        Ok(ResortAction::Displace {
            sha256: sha.to_string(),
            occupant_sha256: occupant_sha,
            occupant_new_path: relative_to_root(root, &slot),
            moved_to: relative_to_root(root, &desired_path),
        })
    } else {
        let resolved = match conflict_policy {
            ConflictPolicy::Overwrite => Some(desired_path.clone()),
            ConflictPolicy::Skip => None,
            ConflictPolicy::Suffix => find_dup_slot(&current_path),
        };

        let Some(target) = resolved else {
            return Ok(ResortAction::ConflictSkip { sha256: sha.to_string(), path: relative_to_root(root, &current_path) });
        };

        if mode == Mode::Apply {
            move_file(&current_path, &target).map_err(|e| crate::storage::StorageError::Io {
                path: target.display().to_string(),
                source: e,
            })?;
            update_record_saved_to(registry, sha, &relative_to_root(root, &target));
            update_level_manifests(store, sha, &relative_to_root(root, &target))?;
        }

        Ok(ResortAction::Suffixed {
            sha256: sha.to_string(),
            from: relative_to_root(root, &current_path),
            to: relative_to_root(root, &target),
        })
    }
}

fn update_record_saved_to(registry: &mut crate::state::HashRegistry, sha: &str, new_path: &str) {
    if let Some(record) = registry.records.get_mut(sha) {
        record.saved_to = Some(new_path.to_string());
        record.last_seen_ts = Utc::now().to_rfc3339();
        if record.first_seen_ts.is_empty() {
            record.first_seen_ts = record.last_seen_ts.clone();
        }
    }
}

fn update_level_manifests(store: &StateStore, sha: &str, new_path: &str) -> StateResult<()> {
    let dir = store.level_files_dir();
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Ok(());
    };
    for entry in entries.flatten() {
        let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str().map(str::to_string)) else {
            continue;
        };
        let Ok(level) = stem.parse::<u32>() else { continue };
        let mut manifest = store.load_level_file_manifest(level)?;
        let mut changed = false;
        for e in manifest.entries.iter_mut() {
            if e.sha256 == sha && e.saved_to != new_path {
                e.saved_to = new_path.to_string();
                changed = true;
            }
        }
        if changed {
            let mut deduped: Vec<ManifestEntry> = Vec::new();
            for e in manifest.entries {
                if !deduped.contains(&e) {
                    deduped.push(e);
                }
            }
            manifest.entries = deduped;
            store.save_level_file_manifest(level, &manifest)?;
        }
    }
    Ok(())
}

/// Walks every file under `downloads/<domain>/` not referenced by any
/// `saved_to`, hashes it, and reconciles it against the registry.
fn phase_b_sweep(
    store: &StateStore,
    registry: &mut crate::state::HashRegistry,
    mode: Mode,
) -> StateResult<Vec<ResortAction>> {
    let root = store.project_root();
    let referenced: std::collections::BTreeSet<PathBuf> = registry
        .records
        .values()
        .filter_map(|r| r.saved_to.as_ref())
        .map(|p| root.join(p))
        .collect();

    let mut actions = Vec::new();
    let mut by_stem: std::collections::BTreeMap<String, Vec<PathBuf>> = std::collections::BTreeMap::new();

    for entry in walk_files(&store.downloads_dir()) {
        if referenced.contains(&entry) {
            continue;
        }

        let sha = match sha256_file(&entry) {
            Ok(s) => s,
            Err(_) => continue,
        };

        if let Some(record) = registry.records.get(&sha).cloned() {
            match &record.saved_to {
                Some(saved_to) if root.join(saved_to).is_file() => {
                    if mode == Mode::Apply {
                        let _ = std::fs::remove_file(&entry);
                    }
                    actions.push(ResortAction::DiskDedupe {
                        path: relative_to_root(root, &entry),
                        canonical: saved_to.clone(),
                    });
                }
                Some(saved_to) => {
                    if mode == Mode::Apply {
                        let target = root.join(saved_to);
                        let _ = move_file(&entry, &target);
                    }
                    actions.push(ResortAction::Promote { sha256: sha, path: saved_to.clone() });
                }
                None => {
                    let rel = relative_to_root(root, &entry);
                    update_record_saved_to(registry, &sha, &rel);
                    actions.push(ResortAction::Adopt { sha256: sha, path: rel });
                }
            }
        } else {
            let stem = strip_dup_suffix(&entry);
            by_stem.entry(stem).or_default().push(entry.clone());
        }
    }

    for (_, mut group) in by_stem {
        if group.len() < 2 {
            continue;
        }
        group.sort();
        for twin in group.into_iter().skip(1) {
            if let Some(slot) = find_dup_slot(&twin) {
                if mode == Mode::Apply {
                    let _ = move_file(&twin, &slot);
                }
                actions.push(ResortAction::Renamed {
                    path: relative_to_root(root, &twin),
                    to: relative_to_root(root, &slot),
                });
            }
        }
    }

    Ok(actions)
}

fn strip_dup_suffix(path: &Path) -> String {
    let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    match stem.split_once("__dup") {
        Some((base, _)) => base.to_string(),
        None => stem,
    }
}

fn walk_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                out.push(path);
            }
        }
    }
    out
}
