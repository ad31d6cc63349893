//! Upload & content-hash registry (§4.5).
//!
//! Every uploaded file is content-addressed by SHA-256. A hash already in
//! the registry is never stored twice: its existing file is left in place
//! (or relocated, if routing now yields a more specific placement) and the
//! new observation is appended to its source history.

use crate::routing::{RouteInput, RoutingPolicy};
use crate::state::{HashRecord, ManifestEntry, SourceObservation, StateResult, StateStore};
use crate::storage::{append_jsonl_line, ensure_dir, write_json_atomic};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const PDF_MAGIC: &[u8] = b"%PDF-";

/// The result of an upload call.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub sha256: String,
    pub saved_to: String,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// One request to persist a downloaded file.
pub struct UploadRequest<'a> {
    pub file_url: &'a str,
    pub content: &'a [u8],
    pub ext: Option<&'a str>,
    pub filename_override: Option<&'a str>,
    pub source_page_url: Option<&'a str>,
    pub bfs_level: u32,
}

fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn looks_like_html(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(512)];
    let lower = String::from_utf8_lossy(head).to_lowercase();
    lower.contains("<html") || lower.contains("<!doctype html")
}

fn expects_pdf(ext: &str, filename: &str) -> bool {
    ext.eq_ignore_ascii_case("pdf") || filename.to_lowercase().ends_with(".pdf")
}

fn quarantine_path(bucket_dir: &Path, filename: &str, reason: &str) -> PathBuf {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string());
    bucket_dir.join("_bad").join(format!("{stem}__{reason}.html"))
}

/// Renames `from` to `to`, falling back to copy-then-delete when the move
/// crosses a filesystem boundary.
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

/// Persists one downloaded file under the global mutation lock's caller
/// (the HTTP handler acquires the lock; this function assumes exclusivity).
pub fn upload(
    store: &StateStore,
    policy: &dyn RoutingPolicy,
    policy_metadata: &Value,
    request: UploadRequest<'_>,
) -> StateResult<UploadReceipt> {
    store.ensure_layout()?;

    let sha = sha256_hex(request.content);
    let route_input = RouteInput {
        file_url: request.file_url,
        source_page_url: request.source_page_url,
        ext: request.ext,
        filename_override: request.filename_override,
        policy_metadata,
    };
    let routed = policy.route(&store.downloads_dir(), store.domain().as_str(), &route_input);

    let mut registry = store.load_hash_registry()?;
    let mut out_path = routed.out_path.clone();
    let mut quarantined_note = None;

    if expects_pdf(&routed.ext, &routed.filename) && !request.content.starts_with(PDF_MAGIC) {
        let reason = if looks_like_html(request.content) {
            "bad_pdf_got_html"
        } else {
            "bad_pdf_not_pdf"
        };
        let bucket_dir = out_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| store.downloads_dir());
        out_path = quarantine_path(&bucket_dir, &routed.filename, reason);
        quarantined_note = Some(reason.to_string());
    }

    let project_root = store.project_root();
    let relative_out = relative_to_root(project_root, &out_path);

    let receipt = match registry.records.get(&sha).cloned() {
        Some(mut record) if record.saved_to.as_ref().is_some_and(|p| project_root.join(p).is_file()) => {
            record.last_seen_ts = now_ts();

            let current_path = project_root.join(record.saved_to.clone().unwrap());
            let should_relocate = quarantined_note.is_none()
                && routed.sub_bucket.is_some()
                && !path_contains_component(&current_path, routed.sub_bucket.as_deref().unwrap());

            if should_relocate {
                move_file(&current_path, &out_path)
                    .map_err(|e| crate::storage::StorageError::Io {
                        path: out_path.display().to_string(),
                        source: e,
                    })?;
                record.saved_to = Some(relative_out.clone());
            }

            record.push_observation(SourceObservation {
                url: request.file_url.to_string(),
                source_page_url: request.source_page_url.map(str::to_string),
                level: request.bfs_level,
                ts: record.last_seen_ts.clone(),
            });
            registry.records.insert(sha.clone(), record.clone());

            append_file_save_log(store, &sha, record.saved_to.as_deref().unwrap_or(&relative_out), true)?;

            UploadReceipt {
                sha256: sha.clone(),
                saved_to: record.saved_to.unwrap_or(relative_out),
                skipped: true,
                note: Some("duplicate_content_skipped".to_string()),
            }
        }
        Some(mut record) => {
            write_bytes(&out_path, request.content)?;
            record.saved_to = Some(relative_out.clone());
            record.last_seen_ts = now_ts();
            record.push_observation(SourceObservation {
                url: request.file_url.to_string(),
                source_page_url: request.source_page_url.map(str::to_string),
                level: request.bfs_level,
                ts: record.last_seen_ts.clone(),
            });
            registry.records.insert(sha.clone(), record);

            append_file_save_log(store, &sha, &relative_out, false)?;

            UploadReceipt {
                sha256: sha.clone(),
                saved_to: relative_out,
                skipped: false,
                note: quarantined_note,
            }
        }
        None => {
            write_bytes(&out_path, request.content)?;
            let ts = now_ts();
            let record = HashRecord {
                sha256: sha.clone(),
                saved_to: Some(relative_out.clone()),
                bytes: request.content.len() as u64,
                ext: routed.ext.clone(),
                term_key: None,
                electorate_folder: None,
                first_seen_ts: ts.clone(),
                last_seen_ts: ts.clone(),
                note: quarantined_note.clone(),
                sources: vec![SourceObservation {
                    url: request.file_url.to_string(),
                    source_page_url: request.source_page_url.map(str::to_string),
                    level: request.bfs_level,
                    ts,
                }],
            };
            registry.records.insert(sha.clone(), record);

            append_file_save_log(store, &sha, &relative_out, false)?;

            UploadReceipt {
                sha256: sha.clone(),
                saved_to: relative_out,
                skipped: false,
                note: quarantined_note,
            }
        }
    };

    store.save_hash_registry(&registry)?;

    let mut manifest = store.load_level_file_manifest(request.bfs_level)?;
    manifest.push_if_absent(ManifestEntry {
        sha256: sha,
        saved_to: receipt.saved_to.clone(),
    });
    store.save_level_file_manifest(request.bfs_level, &manifest)?;

    Ok(receipt)
}

fn write_bytes(path: &Path, content: &[u8]) -> StateResult<()> {
    ensure_dir(path.parent().unwrap_or_else(|| Path::new(".")))?;
    std::fs::write(path, content).map_err(|e| crate::storage::StorageError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(())
}

fn relative_to_root(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn path_contains_component(path: &Path, component: &str) -> bool {
    path.components()
        .any(|c| c.as_os_str().to_string_lossy() == component)
}

fn append_file_save_log(
    store: &StateStore,
    sha: &str,
    saved_to: &str,
    skipped: bool,
) -> StateResult<()> {
    let entry = serde_json::json!({
        "ts": now_ts(),
        "sha256": sha,
        "saved_to": saved_to,
        "skipped": skipped,
    });
    append_jsonl_line(&store.file_saves_log_path(), &entry)?;
    Ok(())
}

/// Writes a routing-policy-visible marker file so a fresh reconciliation
/// run can detect an interrupted upload. Unused by default policies; kept
/// as a building block for domain-specific policies that need it.
#[allow(dead_code)]
fn write_marker(path: &Path, value: &Value) -> StateResult<()> {
    write_json_atomic(path, value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DomainKey;
    use crate::routing::ExtensionBucketPolicy;
    use serde_json::json;
    use tempfile::tempdir;

    fn store(root: &Path) -> StateStore {
        StateStore::new(root, DomainKey::from_host("example.com"))
    }

    #[test]
    fn test_upload_new_file_writes_bytes_and_registry() {
        let dir = tempdir().unwrap();
        let s = store(dir.path());
        let policy = ExtensionBucketPolicy;
        let meta = json!({});

        let receipt = upload(
            &s,
            &policy,
            &meta,
            UploadRequest {
                file_url: "https://example.com/report.pdf",
                content: b"%PDF-1.4 fake",
                ext: None,
                filename_override: None,
                source_page_url: None,
                bfs_level: 1,
            },
        )
        .unwrap();

        assert!(!receipt.skipped);
        assert!(dir.path().join(&receipt.saved_to).is_file());

        let registry = s.load_hash_registry().unwrap();
        assert_eq!(registry.records.len(), 1);
    }

    #[test]
    fn test_upload_duplicate_content_is_skipped() {
        let dir = tempdir().unwrap();
        let s = store(dir.path());
        let policy = ExtensionBucketPolicy;
        let meta = json!({});

        let first = upload(
            &s,
            &policy,
            &meta,
            UploadRequest {
                file_url: "https://example.com/a.pdf",
                content: b"%PDF-1.4 same-bytes",
                ext: None,
                filename_override: None,
                source_page_url: None,
                bfs_level: 1,
            },
        )
        .unwrap();
        assert!(!first.skipped);

        let second = upload(
            &s,
            &policy,
            &meta,
            UploadRequest {
                file_url: "https://example.com/b.pdf",
                content: b"%PDF-1.4 same-bytes",
                ext: None,
                filename_override: None,
                source_page_url: None,
                bfs_level: 1,
            },
        )
        .unwrap();
        assert!(second.skipped);
        assert_eq!(second.sha256, first.sha256);
        assert_eq!(second.saved_to, first.saved_to);
    }

    #[test]
    fn test_upload_quarantines_mislabeled_html() {
        let dir = tempdir().unwrap();
        let s = store(dir.path());
        let policy = ExtensionBucketPolicy;
        let meta = json!({});

        let receipt = upload(
            &s,
            &policy,
            &meta,
            UploadRequest {
                file_url: "https://example.com/report.pdf",
                content: b"<html><body>not a pdf</body></html>",
                ext: None,
                filename_override: None,
                source_page_url: None,
                bfs_level: 1,
            },
        )
        .unwrap();

        assert!(receipt.saved_to.contains("_bad"));
        assert!(receipt.saved_to.ends_with("bad_pdf_got_html.html"));
    }

    #[test]
    fn test_upload_appends_source_observation_on_duplicate() {
        let dir = tempdir().unwrap();
        let s = store(dir.path());
        let policy = ExtensionBucketPolicy;
        let meta = json!({});

        upload(
            &s,
            &policy,
            &meta,
            UploadRequest {
                file_url: "https://example.com/a.pdf",
                content: b"%PDF-1.4 xyz",
                ext: None,
                filename_override: None,
                source_page_url: None,
                bfs_level: 1,
            },
        )
        .unwrap();

        let receipt = upload(
            &s,
            &policy,
            &meta,
            UploadRequest {
                file_url: "https://example.com/b.pdf",
                content: b"%PDF-1.4 xyz",
                ext: None,
                filename_override: None,
                source_page_url: None,
                bfs_level: 2,
            },
        )
        .unwrap();

        let registry = s.load_hash_registry().unwrap();
        let record = &registry.records[&receipt.sha256];
        assert_eq!(record.sources.len(), 2);
    }

    #[test]
    fn test_upload_adds_manifest_entry() {
        let dir = tempdir().unwrap();
        let s = store(dir.path());
        let policy = ExtensionBucketPolicy;
        let meta = json!({});

        upload(
            &s,
            &policy,
            &meta,
            UploadRequest {
                file_url: "https://example.com/a.pdf",
                content: b"%PDF-1.4 xyz",
                ext: None,
                filename_override: None,
                source_page_url: None,
                bfs_level: 3,
            },
        )
        .unwrap();

        let manifest = s.load_level_file_manifest(3).unwrap();
        assert_eq!(manifest.entries.len(), 1);
    }
}
