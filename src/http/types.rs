//! HTTP request/response DTOs (§6 HTTP surface).

use crate::state::{FileCandidate, Signature};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Domain-hint fields shared by most mutating requests, used by the
/// domain-key resolution precedence chain (§6).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DomainHints {
    #[serde(alias = "domain_key", alias = "domain")]
    pub domain_key: Option<String>,
    #[serde(alias = "crawl_root", alias = "root_url", alias = "base_url")]
    pub crawl_root: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub visited: Vec<String>,
    #[serde(default)]
    pub pages: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileCandidate>,
}

impl DomainHints {
    /// Every URL across `visited`, `pages`, and `files`, in that order —
    /// candidates for the "first URL in visited|pages|files" resolution
    /// fallback (§6).
    pub fn list_urls(&self) -> Vec<&str> {
        self.visited
            .iter()
            .map(String::as_str)
            .chain(self.pages.iter().map(String::as_str))
            .chain(self.files.iter().map(|f| f.url.as_str()))
            .collect()
    }

    pub fn resolve_domain(&self) -> crate::domain::DomainKey {
        crate::domain::resolve(
            self.domain_key.as_deref(),
            self.crawl_root.as_deref(),
            self.url.as_deref(),
            self.list_urls(),
        )
    }
}

/// Domain-hint fields accepted as query parameters on bodyless GET routes
/// (e.g. `GET /meta/electorates`), mirroring [`DomainHints`]'s resolution
/// fields without its JSON-body-only `visited`/`pages`/`files` lists.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DomainQuery {
    #[serde(alias = "domain_key", alias = "domain")]
    pub domain_key: Option<String>,
    #[serde(alias = "crawl_root", alias = "root_url", alias = "base_url")]
    pub crawl_root: Option<String>,
    pub url: Option<String>,
}

impl DomainQuery {
    pub fn resolve_domain(&self) -> crate::domain::DomainKey {
        crate::domain::resolve(
            self.domain_key.as_deref(),
            self.crawl_root.as_deref(),
            self.url.as_deref(),
            std::iter::empty(),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct ElectorateUpsertRequest {
    pub term_key: String,
    #[serde(default)]
    pub official_order: BTreeMap<String, String>,
    #[serde(default)]
    pub alphabetical_order: BTreeMap<String, u32>,
    #[serde(flatten)]
    pub hints: DomainHints,
}

#[derive(Debug, Deserialize)]
pub struct DedupeLevelRequest {
    pub level: u32,
    #[serde(default)]
    pub visited: Vec<String>,
    #[serde(default)]
    pub pages: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileCandidate>,
    #[serde(default)]
    pub update: bool,
    #[serde(default)]
    pub full: bool,
    #[serde(default)]
    pub prune: bool,
    #[serde(default)]
    pub replace: bool,
    #[serde(flatten)]
    pub hints: DomainHints,
}

#[derive(Debug, Deserialize)]
pub struct RunsStartRequest {
    pub level: u32,
    pub run_id: String,
    #[serde(flatten)]
    pub hints: DomainHints,
}

#[derive(Debug, Deserialize)]
pub struct RunsAppendRequest {
    pub level: u32,
    pub run_id: String,
    #[serde(default)]
    pub visited: Vec<String>,
    #[serde(default)]
    pub pages: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileCandidate>,
    #[serde(flatten)]
    pub hints: DomainHints,
}

#[derive(Debug, Deserialize)]
pub struct RunsFinalizeRequest {
    pub level: u32,
    pub run_id: String,
    #[serde(flatten)]
    pub hints: DomainHints,
}

#[derive(Debug, Deserialize)]
pub struct RunsChunkUrlsRequest {
    pub level: u32,
    pub chunk_size: Option<usize>,
    #[serde(flatten)]
    pub hints: DomainHints,
}

#[derive(Debug, Deserialize)]
pub struct RunsChunkFilesRequest {
    pub level: u32,
    pub chunk_size: Option<usize>,
    #[serde(flatten)]
    pub hints: DomainHints,
}

#[derive(Debug, Deserialize)]
pub struct RunsChunkFilesIncompleteRequest {
    pub chunk_size: Option<usize>,
    #[serde(flatten)]
    pub hints: DomainHints,
}

#[derive(Debug, Deserialize)]
pub struct RunsStartFilesRequest {
    pub level: u32,
    #[serde(flatten)]
    pub hints: DomainHints,
}

#[derive(Debug, Deserialize)]
pub struct UploadFileRequest {
    pub url: String,
    pub content_base64: String,
    pub ext: Option<String>,
    pub filename: Option<String>,
    pub source_page_url: Option<String>,
    pub bfs_level: u32,
    #[serde(flatten)]
    pub hints: DomainHints,
}

#[derive(Debug, Deserialize)]
pub struct ProbeMetaRequest {
    pub url: String,
    pub level: Option<u32>,
    pub crawl_root: Option<String>,
    pub head: Option<Signature>,
    pub get_range: Option<Signature>,
    #[serde(flatten)]
    pub hints: DomainHints,
}

/// Success envelope: `{ok: true, ...fields}`.
pub fn ok_envelope(fields: Value) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("ok".to_string(), Value::Bool(true));
    if let Value::Object(map) = fields {
        obj.extend(map);
    }
    Value::Object(obj)
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: String,
}

impl ErrorEnvelope {
    pub fn new(error: impl Into<String>) -> Self {
        ErrorEnvelope { ok: false, error: error.into() }
    }
}
