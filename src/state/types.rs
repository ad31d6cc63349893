//! Persistent data types (§3 Data Model).
//!
//! Every type here round-trips through JSON exactly as stored on disk.
//! Optional fields use `#[serde(default)]` so that artifacts written by an
//! older version of the schema still load.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One BFS level's frontier bookkeeping for a single domain.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LevelState {
    #[serde(default)]
    pub visited: BTreeSet<String>,
    #[serde(default)]
    pub discovered_pages: BTreeSet<String>,
    #[serde(default)]
    pub discovered_files: Vec<FileCandidate>,
}

/// A file discovered while crawling a page, keyed by its normalized URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileCandidate {
    pub url: String,
    pub ext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_page_url: Option<String>,
}

impl FileCandidate {
    /// Merges two candidates for the same URL, preferring a non-null
    /// `source_page_url` and a non-`"bin"` extension from either side.
    pub fn merge(mut self, other: FileCandidate) -> FileCandidate {
        if self.source_page_url.is_none() && other.source_page_url.is_some() {
            self.source_page_url = other.source_page_url;
        }
        if self.ext == "bin" && other.ext != "bin" {
            self.ext = other.ext;
        }
        self
    }
}

/// Domain-wide state: one `LevelState` per level, stored in `state.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainState {
    #[serde(default)]
    pub levels: BTreeMap<u32, LevelState>,
}

/// One observation of a URL producing a given content hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceObservation {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_page_url: Option<String>,
    pub level: u32,
    pub ts: String,
}

impl SourceObservation {
    fn identity(&self) -> (&str, Option<&str>, u32) {
        (&self.url, self.source_page_url.as_deref(), self.level)
    }
}

/// A content-addressed registry entry, keyed by lowercase hex SHA-256.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashRecord {
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_to: Option<String>,
    pub bytes: u64,
    pub ext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub term_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub electorate_folder: Option<String>,
    pub first_seen_ts: String,
    pub last_seen_ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default)]
    pub sources: Vec<SourceObservation>,
}

impl HashRecord {
    /// Appends an observation unless its identity `(url, source_page_url,
    /// level)` is already present (§3 coalescing rule).
    pub fn push_observation(&mut self, obs: SourceObservation) {
        let exists = self
            .sources
            .iter()
            .any(|existing| existing.identity() == obs.identity());
        if !exists {
            self.sources.push(obs);
        }
    }

    /// The most recent source by timestamp, falling back to the first.
    pub fn best_source(&self) -> Option<&SourceObservation> {
        self.sources
            .iter()
            .max_by(|a, b| a.ts.cmp(&b.ts))
            .or_else(|| self.sources.first())
    }
}

/// The full content-hash registry for one domain, stored in
/// `downloaded_hash_index.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HashRegistry {
    #[serde(default)]
    pub records: BTreeMap<String, HashRecord>,
}

/// One entry of a per-level manifest of saved files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ManifestEntry {
    pub sha256: String,
    pub saved_to: String,
}

/// `LevelFileManifest`: ordered, deduplicated list of saved files for one
/// `(domain, level)`, stored in `level_files/<L>.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LevelFileManifest {
    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
}

impl LevelFileManifest {
    /// Appends an entry if its `(sha256, saved_to)` pair is not already
    /// present.
    pub fn push_if_absent(&mut self, entry: ManifestEntry) {
        if !self.entries.contains(&entry) {
            self.entries.push(entry);
        }
    }
}

/// A resource signature used to detect whether a probed URL has changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Signature {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl Signature {
    /// Whether this signature carries any HEAD-derived field.
    pub fn has_head_fields(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some() || self.content_length.is_some()
    }

    /// Element-wise inequality across {etag, last_modified, content_length,
    /// content_type}.
    pub fn differs_from(&self, other: &Signature) -> bool {
        self.etag != other.etag
            || self.last_modified != other.last_modified
            || self.content_length != other.content_length
            || self.content_type != other.content_type
    }
}

/// One URL's probe history, stored as part of `probe_meta_index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeEntry {
    pub last_seen_ts: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    pub signature: Signature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_range: Option<bool>,
}

/// `ProbeIndex`: URL → [`ProbeEntry`], stored in `probe_meta_index.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeIndex {
    #[serde(default)]
    pub entries: BTreeMap<String, ProbeEntry>,
}

/// Routing-policy-owned term/electorate metadata, stored in
/// `electorates_by_term.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermMeta {
    #[serde(default)]
    pub official_order: BTreeMap<String, String>,
    #[serde(default)]
    pub alphabetical_order: BTreeMap<String, u32>,
}

impl TermMeta {
    /// Rebuilds `alphabetical_order` from the names in `official_order`.
    pub fn rebuild_alphabetical_order(&mut self) {
        let mut names: Vec<&String> = self.official_order.values().collect();
        names.sort();
        self.alphabetical_order = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i as u32))
            .collect();
    }
}

/// The full term map for one domain, stored in `electorates_by_term.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TermMetaMap {
    #[serde(default)]
    pub terms: BTreeMap<String, TermMeta>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_candidate_merge_prefers_source_page_url() {
        let a = FileCandidate {
            url: "https://x/a.pdf".into(),
            ext: "pdf".into(),
            source_page_url: None,
        };
        let b = FileCandidate {
            url: "https://x/a.pdf".into(),
            ext: "pdf".into(),
            source_page_url: Some("https://x/page".into()),
        };
        let merged = a.merge(b);
        assert_eq!(merged.source_page_url, Some("https://x/page".into()));
    }

    #[test]
    fn test_file_candidate_merge_prefers_non_bin_ext() {
        let a = FileCandidate {
            url: "https://x/a".into(),
            ext: "bin".into(),
            source_page_url: None,
        };
        let b = FileCandidate {
            url: "https://x/a".into(),
            ext: "pdf".into(),
            source_page_url: None,
        };
        let merged = a.merge(b);
        assert_eq!(merged.ext, "pdf");
    }

    #[test]
    fn test_hash_record_push_observation_coalesces_duplicates() {
        let mut record = HashRecord {
            sha256: "abc".into(),
            saved_to: None,
            bytes: 10,
            ext: "pdf".into(),
            term_key: None,
            electorate_folder: None,
            first_seen_ts: "t0".into(),
            last_seen_ts: "t0".into(),
            note: None,
            sources: vec![],
        };
        let obs = SourceObservation {
            url: "https://x/a".into(),
            source_page_url: None,
            level: 1,
            ts: "t0".into(),
        };
        record.push_observation(obs.clone());
        record.push_observation(obs);
        assert_eq!(record.sources.len(), 1);
    }

    #[test]
    fn test_hash_record_best_source_prefers_latest_ts() {
        let record = HashRecord {
            sha256: "abc".into(),
            saved_to: None,
            bytes: 10,
            ext: "pdf".into(),
            term_key: None,
            electorate_folder: None,
            first_seen_ts: "t0".into(),
            last_seen_ts: "t1".into(),
            note: None,
            sources: vec![
                SourceObservation { url: "a".into(), source_page_url: None, level: 1, ts: "t0".into() },
                SourceObservation { url: "b".into(), source_page_url: None, level: 1, ts: "t1".into() },
            ],
        };
        assert_eq!(record.best_source().unwrap().url, "b");
    }

    #[test]
    fn test_manifest_push_if_absent_dedupes() {
        let mut manifest = LevelFileManifest::default();
        let entry = ManifestEntry { sha256: "abc".into(), saved_to: "p".into() };
        manifest.push_if_absent(entry.clone());
        manifest.push_if_absent(entry);
        assert_eq!(manifest.entries.len(), 1);
    }

    #[test]
    fn test_signature_differs_from() {
        let a = Signature { etag: Some("e1".into()), ..Default::default() };
        let b = Signature { etag: Some("e2".into()), ..Default::default() };
        assert!(a.differs_from(&b));
        assert!(!a.differs_from(&a.clone()));
    }

    #[test]
    fn test_term_meta_rebuild_alphabetical_order() {
        let mut meta = TermMeta {
            official_order: BTreeMap::from([
                ("1".to_string(), "Zeta".to_string()),
                ("2".to_string(), "Alpha".to_string()),
            ]),
            alphabetical_order: BTreeMap::new(),
        };
        meta.rebuild_alphabetical_order();
        assert_eq!(meta.alphabetical_order.get("Alpha"), Some(&0));
        assert_eq!(meta.alphabetical_order.get("Zeta"), Some(&1));
    }
}
