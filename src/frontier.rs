//! Frontier / dedupe engine (§4.3).
//!
//! Takes one domain's discoveries for a level and works out what's actually
//! new: pages not seen at any earlier level become next level's frontier,
//! files not seen at any earlier level become the download queue. The pure
//! set algebra lives in [`compute_frontier`]; [`apply`] wires it to state
//! persistence and artifact emission.

use crate::artifacts::{self, rows_from_serializable, rows_from_urls};
use crate::config::ArtifactEncoding;
use crate::state::{FileCandidate, LevelState, StateResult, StateStore};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

/// Options accompanying a frontier-merge request.
#[derive(Debug, Clone, Default)]
pub struct FrontierOptions {
    /// Diff against the previous on-disk artifact and emit add/remove files.
    pub update: bool,
    /// When `update` is set, merge adds (and removals, if `prune`) into the
    /// main artifact instead of overwriting it wholesale.
    pub patch: bool,
    /// When patching, also apply removals (not just additions).
    pub prune: bool,
    /// Overwrite the stored level entirely instead of merging with it.
    pub replace: bool,
}

/// One frontier-merge request for one domain and level.
#[derive(Debug, Clone)]
pub struct FrontierRequest {
    pub level: u32,
    pub visited: Vec<String>,
    pub discovered_pages: Vec<String>,
    pub discovered_files: Vec<FileCandidate>,
    pub options: FrontierOptions,
}

/// The pure result of merging one request against prior-level state,
/// before anything is written to disk.
#[derive(Debug, Clone, Default)]
pub struct FrontierComputation {
    /// Pages discovered by this call that were never seen at an earlier
    /// level and are not repeats of this level's own seeds: the frontier
    /// for level + 1.
    pub next_frontier: Vec<String>,
    /// Files discovered by this call that were never seen at an earlier
    /// level.
    pub new_files: Vec<FileCandidate>,
    /// This call's `discovered_files`, merged by URL (duplicate URLs within
    /// the call collapse, preferring non-null `source_page_url` and a
    /// non-`"bin"` extension).
    pub merged_files: Vec<FileCandidate>,
}

/// De-duplicates `items`, keeping the first occurrence of each value and
/// preserving input order (`stableUniq`, §4.3).
pub fn stable_uniq(items: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if seen.insert(item.clone()) {
            out.push(item);
        }
    }
    out
}

/// Merges file candidates by URL, keeping first-occurrence order and
/// folding later duplicates into the earlier entry via [`FileCandidate::merge`].
pub fn merge_files_by_url(items: Vec<FileCandidate>) -> Vec<FileCandidate> {
    let mut order: Vec<String> = Vec::new();
    let mut by_url: BTreeMap<String, FileCandidate> = BTreeMap::new();

    for item in items {
        match by_url.get(&item.url).cloned() {
            Some(existing) => {
                by_url.insert(item.url.clone(), existing.merge(item));
            }
            None => {
                order.push(item.url.clone());
                by_url.insert(item.url.clone(), item);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|url| by_url.remove(&url))
        .collect()
}

/// Computes the union of `visited` and `discovered_pages` over every stored
/// level strictly below `level`, and the set of file URLs discovered at
/// those levels.
fn seen_prior(levels: &BTreeMap<u32, LevelState>, level: u32) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut seen_pages = BTreeSet::new();
    let mut seen_files = BTreeSet::new();

    for (lvl, state) in levels.range(..level) {
        let _ = lvl;
        seen_pages.extend(state.visited.iter().cloned());
        seen_pages.extend(state.discovered_pages.iter().cloned());
        seen_files.extend(state.discovered_files.iter().map(|f| f.url.clone()));
    }

    (seen_pages, seen_files)
}

/// Runs the pure frontier algorithm (§4.3 steps 1-4) against already-loaded
/// level state, without touching disk.
pub fn compute_frontier(levels: &BTreeMap<u32, LevelState>, request: &FrontierRequest) -> FrontierComputation {
    let (seen_pages_prior, seen_files_prior) = seen_prior(levels, request.level);

    let merged_files = merge_files_by_url(request.discovered_files.clone());

    let visited_set: BTreeSet<String> = request.visited.iter().cloned().collect();
    let next_frontier: Vec<String> = stable_uniq(request.discovered_pages.clone())
        .into_iter()
        .filter(|url| !seen_pages_prior.contains(url) && !visited_set.contains(url))
        .collect();

    let new_files: Vec<FileCandidate> = merged_files
        .iter()
        .filter(|f| !seen_files_prior.contains(&f.url))
        .cloned()
        .collect();

    FrontierComputation {
        next_frontier,
        new_files,
        merged_files,
    }
}

/// Merges a request's visited/pages/files into the stored `LevelState` for
/// `request.level`, either replacing it outright or unioning it with
/// whatever was already there (§4.3 step 5).
fn merge_level_state(
    existing: Option<LevelState>,
    request: &FrontierRequest,
    merged_files: &[FileCandidate],
) -> LevelState {
    if request.options.replace || existing.is_none() {
        return LevelState {
            visited: request.visited.iter().cloned().collect(),
            discovered_pages: request.discovered_pages.iter().cloned().collect(),
            discovered_files: merged_files.to_vec(),
        };
    }

    let existing = existing.unwrap();
    let mut visited = existing.visited;
    visited.extend(request.visited.iter().cloned());

    let mut discovered_pages = existing.discovered_pages;
    discovered_pages.extend(request.discovered_pages.iter().cloned());

    let mut by_url: BTreeMap<String, FileCandidate> = existing
        .discovered_files
        .into_iter()
        .map(|f| (f.url.clone(), f))
        .collect();
    for file in merged_files.iter().cloned() {
        by_url
            .entry(file.url.clone())
            .and_modify(|e| *e = e.clone().merge(file.clone()))
            .or_insert(file);
    }
    let discovered_files: Vec<FileCandidate> = by_url.into_values().collect();

    LevelState {
        visited,
        discovered_pages,
        discovered_files,
    }
}

/// The outcome of [`apply`]: what was newly discovered, for the caller to
/// report back to the client.
#[derive(Debug, Clone, Default)]
pub struct FrontierOutcome {
    pub next_frontier: Vec<String>,
    pub new_files: Vec<FileCandidate>,
    pub added_pages: Vec<String>,
    pub removed_pages: Vec<String>,
}

/// Applies a frontier-merge request end to end: load state, merge, persist,
/// write `urls-level-(L+1).json` and `files-level-L.json`, and (when
/// `update` is set) diff against the previous artifacts on disk.
pub fn apply(
    store: &StateStore,
    encoding: ArtifactEncoding,
    chunk_size: usize,
    request: FrontierRequest,
) -> StateResult<FrontierOutcome> {
    store.ensure_layout()?;
    let mut state = store.load_state()?;

    let computation = compute_frontier(&state.levels, &request);
    let existing_entry = state.levels.get(&request.level).cloned();
    let new_level_state = merge_level_state(existing_entry, &request, &computation.merged_files);

    let next_level = request.level + 1;
    let urls_path = store.artifacts_dir().join(format!("urls-level-{next_level}.json"));
    let files_path = store.artifacts_dir().join(format!("files-level-{}.json", request.level));

    let previous_urls: Vec<String> = artifacts::read_url_rows(&urls_path);

    let (emitted_pages, added_pages, removed_pages) = if request.options.update {
        let previous_set: BTreeSet<String> = previous_urls.iter().cloned().collect();
        let next_set: BTreeSet<String> = computation.next_frontier.iter().cloned().collect();
        let added: Vec<String> = computation
            .next_frontier
            .iter()
            .filter(|u| !previous_set.contains(*u))
            .cloned()
            .collect();
        let removed: Vec<String> = previous_urls
            .iter()
            .filter(|u| !next_set.contains(*u))
            .cloned()
            .collect();

        let diff_path = store.artifacts_dir().join(format!("urls-diff-level-{next_level}.json"));
        artifacts::write_artifact(
            &diff_path,
            rows_from_urls(&added),
            &json!({ "level": next_level, "kind": "urls_diff" }),
            encoding,
        )?;

        let removed_path = store.artifacts_dir().join(format!("urls-removed-level-{next_level}.json"));
        artifacts::write_artifact(
            &removed_path,
            rows_from_urls(&removed),
            &json!({ "level": next_level, "kind": "urls_removed" }),
            encoding,
        )?;

        if request.options.patch {
            let mut patched = previous_urls.clone();
            patched.extend(added.iter().cloned());
            if request.options.prune {
                let removed_set: BTreeSet<String> = removed.iter().cloned().collect();
                patched.retain(|u| !removed_set.contains(u));
            }
            (stable_uniq(patched), added, removed)
        } else {
            (computation.next_frontier.clone(), added, removed)
        }
    } else {
        (computation.next_frontier.clone(), vec![], vec![])
    };

    artifacts::write_artifact(
        &urls_path,
        rows_from_urls(&emitted_pages),
        &json!({ "level": next_level, "kind": "urls" }),
        encoding,
    )?;
    artifacts::write_chunked(
        &urls_path,
        "urls",
        next_level,
        &rows_from_urls(&emitted_pages),
        chunk_size,
        &json!({ "level": next_level, "kind": "urls" }),
        encoding,
    )?;

    artifacts::write_artifact(
        &files_path,
        rows_from_serializable(&new_level_state.discovered_files),
        &json!({ "level": request.level, "kind": "files" }),
        encoding,
    )?;
    artifacts::write_chunked(
        &files_path,
        "files",
        request.level,
        &rows_from_serializable(&new_level_state.discovered_files),
        chunk_size,
        &json!({ "level": request.level, "kind": "files" }),
        encoding,
    )?;

    if request.options.update {
        let files_diff_path = store
            .artifacts_dir()
            .join(format!("files-diff-level-{}.json", request.level));
        artifacts::write_artifact(
            &files_diff_path,
            rows_from_serializable(&computation.new_files),
            &json!({ "level": request.level, "kind": "files_diff" }),
            encoding,
        )?;
    }

    state.levels.insert(request.level, new_level_state);
    store.save_state(&state)?;

    Ok(FrontierOutcome {
        next_frontier: emitted_pages,
        new_files: computation.new_files,
        added_pages,
        removed_pages,
    })
}
