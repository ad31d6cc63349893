//! Per-domain filesystem layout and load/save primitives (§6 Persistent layout).

use crate::domain::DomainKey;
use crate::state::types::{DomainState, HashRegistry, LevelFileManifest, ProbeIndex, TermMetaMap};
use crate::storage::{ensure_dir, read_json_or_default, write_json_atomic, StorageError};
use std::path::{Path, PathBuf};

pub type StateResult<T> = Result<T, StorageError>;

/// Resolves the on-disk paths for one domain's state under a project root,
/// and loads/saves the JSON-backed entities that live there.
///
/// Mirrors the layout tree: `BFS_crawl/_meta/<domain>/...`. `StateStore`
/// itself holds no lock; callers serialize mutating access through
/// [`crate::coordinator::Coordinator`].
#[derive(Debug, Clone)]
pub struct StateStore {
    root: PathBuf,
    domain: DomainKey,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>, domain: DomainKey) -> Self {
        StateStore {
            root: root.into(),
            domain,
        }
    }

    pub fn domain(&self) -> &DomainKey {
        &self.domain
    }

    pub fn project_root(&self) -> &Path {
        &self.root
    }

    fn meta_dir(&self) -> PathBuf {
        self.root
            .join("BFS_crawl")
            .join("_meta")
            .join(self.domain.as_str())
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root
            .join("BFS_crawl")
            .join("runs")
            .join(self.domain.as_str())
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads").join(self.domain.as_str())
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.meta_dir().join("artifacts")
    }

    pub fn level_files_dir(&self) -> PathBuf {
        self.meta_dir().join("level_files")
    }

    pub fn state_json_path(&self) -> PathBuf {
        self.meta_dir().join("state.json")
    }

    pub fn hash_index_path(&self) -> PathBuf {
        self.meta_dir().join("downloaded_hash_index.json")
    }

    pub fn probe_index_path(&self) -> PathBuf {
        self.meta_dir().join("probe_meta_index.json")
    }

    pub fn electorates_by_term_path(&self) -> PathBuf {
        self.meta_dir().join("electorates_by_term.json")
    }

    pub fn electorates_by_term_log_path(&self) -> PathBuf {
        self.meta_dir().join("electorates_by_term.jsonl")
    }

    pub fn level_resets_log_path(&self) -> PathBuf {
        self.meta_dir().join("level_resets.jsonl")
    }

    pub fn meta_probes_log_path(&self) -> PathBuf {
        self.meta_dir().join("meta_probes.jsonl")
    }

    pub fn dedupe_log_path(&self) -> PathBuf {
        self.runs_dir().join("dedupe_log.jsonl")
    }

    pub fn file_saves_log_path(&self) -> PathBuf {
        self.runs_dir().join("file_saves.jsonl")
    }

    pub fn level_file_manifest_path(&self, level: u32) -> PathBuf {
        self.level_files_dir().join(format!("{level}.json"))
    }

    pub fn ensure_layout(&self) -> StateResult<()> {
        ensure_dir(&self.meta_dir())?;
        ensure_dir(&self.artifacts_dir())?;
        ensure_dir(&self.level_files_dir())?;
        ensure_dir(&self.runs_dir())?;
        ensure_dir(&self.downloads_dir())?;
        Ok(())
    }

    pub fn load_state(&self) -> StateResult<DomainState> {
        read_json_or_default(&self.state_json_path(), DomainState::default)
    }

    pub fn save_state(&self, state: &DomainState) -> StateResult<()> {
        write_json_atomic(&self.state_json_path(), state)
    }

    pub fn load_hash_registry(&self) -> StateResult<HashRegistry> {
        read_json_or_default(&self.hash_index_path(), HashRegistry::default)
    }

    pub fn save_hash_registry(&self, registry: &HashRegistry) -> StateResult<()> {
        write_json_atomic(&self.hash_index_path(), registry)
    }

    pub fn load_probe_index(&self) -> StateResult<ProbeIndex> {
        read_json_or_default(&self.probe_index_path(), ProbeIndex::default)
    }

    pub fn save_probe_index(&self, index: &ProbeIndex) -> StateResult<()> {
        write_json_atomic(&self.probe_index_path(), index)
    }

    pub fn load_term_meta(&self) -> StateResult<TermMetaMap> {
        read_json_or_default(&self.electorates_by_term_path(), TermMetaMap::default)
    }

    pub fn save_term_meta(&self, meta: &TermMetaMap) -> StateResult<()> {
        write_json_atomic(&self.electorates_by_term_path(), meta)
    }

    pub fn load_level_file_manifest(&self, level: u32) -> StateResult<LevelFileManifest> {
        read_json_or_default(&self.level_file_manifest_path(level), LevelFileManifest::default)
    }

    pub fn save_level_file_manifest(
        &self,
        level: u32,
        manifest: &LevelFileManifest,
    ) -> StateResult<()> {
        write_json_atomic(&self.level_file_manifest_path(level), manifest)
    }
}
