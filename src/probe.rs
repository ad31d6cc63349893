//! Probe & diff (§4.8).
//!
//! A probe is a cheap signal — HEAD or ranged-GET headers an external
//! crawler already fetched — that tells us whether a previously-seen file
//! has likely changed without re-downloading it. This module only compares
//! and records signatures; it never performs network I/O itself.

use crate::artifacts::{self, rows_from_serializable, rows_from_urls};
use crate::config::ArtifactEncoding;
use crate::state::{FileCandidate, ProbeEntry, Signature, StateResult, StateStore};
use crate::storage::append_jsonl_line;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;

/// One probe-ingestion request.
#[derive(Debug, Clone, Default)]
pub struct ProbeRequest {
    pub url: String,
    pub level: Option<u32>,
    pub head: Option<Signature>,
    pub get_range: Option<Signature>,
}

/// The outcome of ingesting a probe.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub changed: bool,
    pub signature: Signature,
}

/// Builds the effective signature for a probe: HEAD wins when it carries
/// any of {etag, last_modified, content_length}; otherwise fall back to
/// the ranged-GET signature.
fn build_signature(head: Option<&Signature>, get_range: Option<&Signature>) -> Signature {
    if let Some(head) = head {
        if head.has_head_fields() {
            return head.clone();
        }
    }
    get_range.cloned().unwrap_or_default()
}

/// Ingests one probe observation: compares against the prior signature for
/// this URL, persists a raw log line, updates the probe index, and — when
/// the signature changed and a level is known — updates the level's diff
/// artifacts.
pub fn ingest_probe(
    store: &StateStore,
    encoding: ArtifactEncoding,
    request: ProbeRequest,
) -> StateResult<ProbeOutcome> {
    store.ensure_layout()?;

    let signature = build_signature(request.head.as_ref(), request.get_range.as_ref());
    let mut index = store.load_probe_index()?;

    let changed = match index.entries.get(&request.url) {
        Some(prior) => prior.signature.differs_from(&signature),
        None => false,
    };

    let ts = Utc::now().to_rfc3339();
    append_jsonl_line(
        &store.meta_probes_log_path(),
        &json!({
            "ts": ts,
            "url": request.url,
            "level": request.level,
            "signature": signature,
            "changed": changed,
        }),
    )?;

    index.entries.insert(
        request.url.clone(),
        ProbeEntry {
            last_seen_ts: ts,
            level: request.level,
            signature: signature.clone(),
            head: Some(request.head.is_some()),
            get_range: Some(request.get_range.is_some()),
        },
    );
    store.save_probe_index(&index)?;

    if changed {
        if let Some(level) = request.level {
            record_change_in_level_diffs(store, encoding, level, &request.url)?;
        }
    }

    Ok(ProbeOutcome { changed, signature })
}

fn record_change_in_level_diffs(
    store: &StateStore,
    encoding: ArtifactEncoding,
    level: u32,
    url: &str,
) -> StateResult<()> {
    let meta_diff_path = store
        .artifacts_dir()
        .join(format!("files-meta-diff-level-{level}.json"));
    let mut modified: BTreeSet<String> = artifacts::read_url_set(&meta_diff_path);
    modified.insert(url.to_string());
    let modified_rows: Vec<String> = modified.into_iter().collect();
    artifacts::write_artifact(
        &meta_diff_path,
        rows_from_urls(&modified_rows),
        &json!({ "level": level, "kind": "files_meta_diff", "status": "modified" }),
        encoding,
    )?;

    let state = store.load_state()?;
    let resolved = state
        .levels
        .get(&level)
        .and_then(|lvl| lvl.discovered_files.iter().find(|f| f.url == url))
        .cloned()
        .unwrap_or_else(|| FileCandidate {
            url: url.to_string(),
            ext: "bin".to_string(),
            source_page_url: None,
        });

    let files_diff_path = store.artifacts_dir().join(format!("files-diff-level-{level}.json"));
    let mut existing: Vec<FileCandidate> = artifacts::read_rows(&files_diff_path);
    existing.retain(|f| f.url != url);
    existing.push(resolved);

    artifacts::write_artifact(
        &files_diff_path,
        rows_from_serializable(&existing),
        &json!({ "level": level, "kind": "files_diff" }),
        encoding,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainKey;
    use tempfile::tempdir;

    fn store(root: &std::path::Path) -> StateStore {
        StateStore::new(root, DomainKey::from_host("example.com"))
    }

    #[test]
    fn test_first_probe_is_not_changed() {
        let dir = tempdir().unwrap();
        let s = store(dir.path());

        let outcome = ingest_probe(
            &s,
            ArtifactEncoding::MetaFirstRow,
            ProbeRequest {
                url: "https://example.com/a.pdf".into(),
                level: Some(1),
                head: Some(Signature { etag: Some("e1".into()), ..Default::default() }),
                get_range: None,
            },
        )
        .unwrap();

        assert!(!outcome.changed);
    }

    #[test]
    fn test_changed_signature_is_detected_and_diffed() {
        let dir = tempdir().unwrap();
        let s = store(dir.path());

        ingest_probe(
            &s,
            ArtifactEncoding::MetaFirstRow,
            ProbeRequest {
                url: "https://example.com/a.pdf".into(),
                level: Some(1),
                head: Some(Signature { etag: Some("e1".into()), ..Default::default() }),
                get_range: None,
            },
        )
        .unwrap();

        let outcome = ingest_probe(
            &s,
            ArtifactEncoding::MetaFirstRow,
            ProbeRequest {
                url: "https://example.com/a.pdf".into(),
                level: Some(1),
                head: Some(Signature { etag: Some("e2".into()), ..Default::default() }),
                get_range: None,
            },
        )
        .unwrap();

        assert!(outcome.changed);
        let meta_diff = s.artifacts_dir().join("files-meta-diff-level-1.json");
        assert!(meta_diff.exists());
        let files_diff = s.artifacts_dir().join("files-diff-level-1.json");
        assert!(files_diff.exists());
    }

    #[test]
    fn test_head_preferred_over_get_range() {
        let head = Signature { etag: Some("head-etag".into()), ..Default::default() };
        let get_range = Signature { content_type: Some("text/html".into()), ..Default::default() };
        let sig = build_signature(Some(&head), Some(&get_range));
        assert_eq!(sig.etag.as_deref(), Some("head-etag"));
    }

    #[test]
    fn test_get_range_used_when_head_has_no_fields() {
        let head = Signature::default();
        let get_range = Signature { content_type: Some("application/pdf".into()), ..Default::default() };
        let sig = build_signature(Some(&head), Some(&get_range));
        assert_eq!(sig.content_type.as_deref(), Some("application/pdf"));
    }
}
