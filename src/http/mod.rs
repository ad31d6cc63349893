//! HTTP surface (§6): Axum routes wiring the component operations together.
//!
//! Handlers are thin: resolve the domain, normalize every URL-bearing field
//! immediately (§9 Design Notes — "the core never deals with raw strings"),
//! acquire the mutation lock for anything that reads-modifies-writes shared
//! state, call into the component module, and wrap the result in the
//! `{ok:true, ...}` / `{ok:false, error}` envelope (§6, §7).

pub mod types;

use crate::coordinator::Coordinator;
use crate::frontier::{self, FrontierOptions, FrontierRequest};
use crate::probe::{self, ProbeRequest};
use crate::runs::{self, RunBatch};
use crate::state::FileCandidate;
use crate::upload::{self, UploadRequest};
use crate::url as urlnorm;
use crate::SinkError;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use types::{
    DedupeLevelRequest, DomainQuery, ElectorateUpsertRequest, ErrorEnvelope, ProbeMetaRequest,
    RunsAppendRequest, RunsChunkFilesIncompleteRequest, RunsChunkFilesRequest,
    RunsChunkUrlsRequest, RunsFinalizeRequest, RunsStartFilesRequest, RunsStartRequest,
    UploadFileRequest,
};

impl IntoResponse for SinkError {
    fn into_response(self) -> Response {
        let status = match &self {
            SinkError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_client_error() {
            warn!(error = %self, "rejecting request");
        } else {
            error!(error = %self, "request failed");
        }
        (status, Json(ErrorEnvelope::new(self.to_string()))).into_response()
    }
}

type HandlerResult = Result<Json<Value>, SinkError>;

fn validate(condition: bool, message: impl Into<String>) -> Result<(), SinkError> {
    if condition {
        Ok(())
    } else {
        Err(SinkError::Validation(message.into()))
    }
}

fn normalize_list(urls: &[String]) -> Vec<String> {
    urls.iter().map(|u| urlnorm::normalize(u)).collect()
}

fn normalize_files(files: &[FileCandidate]) -> Vec<FileCandidate> {
    files
        .iter()
        .map(|f| FileCandidate {
            url: urlnorm::normalize(&f.url),
            ext: f.ext.clone(),
            source_page_url: f.source_page_url.as_deref().map(urlnorm::normalize),
        })
        .collect()
}

/// Builds the Axum router for the sink's HTTP surface (§6), with request
/// body size capped at `server.max_body_bytes`, gzip compression, and
/// request tracing layered on top.
pub fn router(coordinator: Arc<Coordinator>) -> Router {
    let max_body = coordinator.config().server.max_body_bytes;

    Router::new()
        .route("/health", get(health))
        .route(
            "/meta/electorates",
            get(get_electorates).post(upsert_electorates),
        )
        .route("/meta/electorates/reset", post(reset_electorates))
        .route("/dedupe/level", post(dedupe_level))
        .route("/runs/start/urls", post(runs_start_urls))
        .route("/runs/append/urls", post(runs_append_urls))
        .route("/runs/finalize/urls", post(runs_finalize_urls))
        .route("/runs/chunk/urls", post(runs_chunk_urls))
        .route("/runs/chunk/files", post(runs_chunk_files))
        .route(
            "/runs/chunk/files/incomplete",
            post(runs_chunk_files_incomplete),
        )
        .route("/runs/start/files", post(runs_start_files))
        .route("/upload/file", post(upload_file))
        .route("/probe/meta", post(probe_meta))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(coordinator)
}

/// `GET /health` (§6, §4.10). Read-only: skips the mutation lock.
async fn health(State(coordinator): State<Arc<Coordinator>>) -> Json<Value> {
    let (last_tick, ticking) = coordinator.watchdog_status();
    Json(json!({
        "ok": true,
        "project_root": coordinator.project_root().display().to_string(),
        "config_hash": coordinator.config_hash(),
        "watchdog": {
            "last_tick": last_tick,
            "ticking": ticking,
            "interval_ms": coordinator.config().watchdog.interval_ms,
            "idle_ms": coordinator.config().watchdog.idle_ms,
        },
        "open_streaming_buckets": coordinator.open_bucket_count(),
    }))
}

/// `GET /meta/electorates` (§6). Takes no request body; the domain is
/// resolved from query parameters, falling back to the `"default"`
/// namespace per the domain-key resolution precedence chain.
async fn get_electorates(
    State(coordinator): State<Arc<Coordinator>>,
    Query(hints): Query<DomainQuery>,
) -> HandlerResult {
    let domain = hints.resolve_domain();
    let store = coordinator.store_for(domain);
    let _guard = coordinator.lock().await;
    let meta = store.load_term_meta()?;
    Ok(Json(json!({ "ok": true, "terms": meta.terms })))
}

/// `POST /meta/electorates` (§6): upsert one term's routing-policy metadata,
/// rebuilding its alphabetical order from the supplied names.
async fn upsert_electorates(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<ElectorateUpsertRequest>,
) -> HandlerResult {
    validate(!req.term_key.trim().is_empty(), "termKey must not be empty")?;

    let domain = req.hints.resolve_domain();
    let store = coordinator.store_for(domain.clone());

    let _guard = coordinator.lock().await;
    let mut meta = store.load_term_meta()?;
    let mut term = crate::state::TermMeta {
        official_order: req.official_order,
        alphabetical_order: req.alphabetical_order,
    };
    term.rebuild_alphabetical_order();
    meta.terms.insert(req.term_key.clone(), term);
    store.save_term_meta(&meta)?;

    info!(domain = %domain, term_key = %req.term_key, "upserted electorate term metadata");
    Ok(Json(json!({ "ok": true, "term_key": req.term_key })))
}

/// `POST /meta/electorates/reset` (§6): clears the term map.
async fn reset_electorates(
    State(coordinator): State<Arc<Coordinator>>,
    Json(hints): Json<types::DomainHints>,
) -> HandlerResult {
    let domain = hints.resolve_domain();
    let store = coordinator.store_for(domain.clone());

    let _guard = coordinator.lock().await;
    store.save_term_meta(&crate::state::TermMetaMap::default())?;

    info!(domain = %domain, "reset electorate term metadata");
    Ok(Json(json!({ "ok": true })))
}

/// `POST /dedupe/level` (§6, §4.3): non-streaming batch frontier merge.
async fn dedupe_level(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<DedupeLevelRequest>,
) -> HandlerResult {
    validate(req.level > 0, "level must be a positive integer")?;

    let domain = req.hints.resolve_domain();
    let store = coordinator.store_for(domain.clone());
    let encoding = coordinator.encoding_for(&domain);
    let chunk_size = coordinator.chunk_size_for(&domain);

    let request = FrontierRequest {
        level: req.level,
        visited: normalize_list(&req.visited),
        discovered_pages: normalize_list(&req.pages),
        discovered_files: normalize_files(&req.files),
        options: FrontierOptions {
            update: req.update || req.full,
            patch: req.full,
            prune: req.prune,
            replace: req.replace,
        },
    };

    let _guard = coordinator.lock().await;
    let outcome = frontier::apply(&store, encoding, chunk_size, request)?;

    info!(
        domain = %domain, level = req.level,
        next_frontier = outcome.next_frontier.len(), new_files = outcome.new_files.len(),
        "merged level into frontier"
    );

    Ok(Json(json!({
        "ok": true,
        "level": req.level,
        "next_frontier_count": outcome.next_frontier.len(),
        "new_files_count": outcome.new_files.len(),
        "added_pages": outcome.added_pages,
        "removed_pages": outcome.removed_pages,
    })))
}

/// `POST /runs/start/urls` (§6, §4.7): truncate a streaming bucket.
async fn runs_start_urls(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<RunsStartRequest>,
) -> HandlerResult {
    validate(req.level > 0, "level must be a positive integer")?;
    validate(!req.run_id.trim().is_empty(), "run_id must not be empty")?;

    let domain = req.hints.resolve_domain();
    let store = coordinator.store_for(domain.clone());

    let _guard = coordinator.lock().await;
    runs::start(&store, req.level, &req.run_id)?;

    info!(domain = %domain, level = req.level, run_id = %req.run_id, "started streaming run bucket");
    Ok(Json(json!({ "ok": true })))
}

/// `POST /runs/append/urls` (§6, §4.7): append one JSONL record.
async fn runs_append_urls(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<RunsAppendRequest>,
) -> HandlerResult {
    validate(req.level > 0, "level must be a positive integer")?;
    validate(!req.run_id.trim().is_empty(), "run_id must not be empty")?;

    let domain = req.hints.resolve_domain();
    let store = coordinator.store_for(domain.clone());

    let batch = RunBatch {
        visited: normalize_list(&req.visited),
        pages: normalize_list(&req.pages),
        files: normalize_files(&req.files),
    };

    let _guard = coordinator.lock().await;
    runs::append(&store, req.level, &req.run_id, batch)?;

    Ok(Json(json!({ "ok": true })))
}

/// `POST /runs/finalize/urls` (§6, §4.7): reduce the bucket, emit artifacts,
/// write the `.done` marker. Falls back to a cross-domain bucket lookup
/// (§4.7) when no domain hint resolves anything in the default namespace.
async fn runs_finalize_urls(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<RunsFinalizeRequest>,
) -> HandlerResult {
    validate(req.level > 0, "level must be a positive integer")?;
    validate(!req.run_id.trim().is_empty(), "run_id must not be empty")?;

    let explicit_hint = req.hints.domain_key.is_some()
        || req.hints.crawl_root.is_some()
        || req.hints.url.is_some()
        || !req.hints.list_urls().is_empty();

    let domain = req.hints.resolve_domain();
    let root = coordinator.project_root().to_path_buf();

    let _guard = coordinator.lock().await;

    let resolved_domain = if !explicit_hint
        && !runs::bucket_path(&coordinator.store_for(domain.clone()), req.level, &req.run_id).exists()
    {
        match runs::find_bucket_across_domains(&root, req.level, &req.run_id) {
            Some((found, _)) => found,
            None => domain,
        }
    } else {
        domain
    };

    let store = coordinator.store_for(resolved_domain.clone());
    let encoding = coordinator.encoding_for(&resolved_domain);
    let chunk_size = coordinator.chunk_size_for(&resolved_domain);

    let summary = runs::finalize(&store, encoding, chunk_size, req.level, &req.run_id)?;

    info!(
        domain = %resolved_domain, level = req.level, run_id = %req.run_id,
        visited = summary.visited_count, "finalized streaming run bucket"
    );

    Ok(Json(json!({ "ok": true, "domain": resolved_domain.as_str(), "summary": summary })))
}

/// `POST /runs/chunk/urls` (§6, §4.6): re-chunk an existing `urls-level-L`
/// artifact at a (possibly new) chunk size.
async fn runs_chunk_urls(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<RunsChunkUrlsRequest>,
) -> HandlerResult {
    validate(req.level > 0, "level must be a positive integer")?;

    let domain = req.hints.resolve_domain();
    let store = coordinator.store_for(domain.clone());
    let encoding = coordinator.encoding_for(&domain);
    let chunk_size = req.chunk_size.unwrap_or_else(|| coordinator.chunk_size_for(&domain));

    let _guard = coordinator.lock().await;

    let path = store.artifacts_dir().join(format!("urls-level-{}.json", req.level));
    let urls = crate::artifacts::read_url_rows(&path);
    let manifest = crate::artifacts::write_chunked(
        &path,
        "urls",
        req.level,
        &crate::artifacts::rows_from_urls(&urls),
        chunk_size,
        &json!({ "level": req.level, "kind": "urls" }),
        encoding,
    )?;

    Ok(Json(json!({ "ok": true, "total": manifest.total, "chunk_size": manifest.chunk_size })))
}

/// `POST /runs/chunk/files` (§6, §4.7): reconcile downloaded vs. expected
/// files for one level, emit the remaining-queue artifact and its chunks.
async fn runs_chunk_files(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<RunsChunkFilesRequest>,
) -> HandlerResult {
    validate(req.level > 0, "level must be a positive integer")?;

    let domain = req.hints.resolve_domain();
    let store = coordinator.store_for(domain.clone());
    let encoding = coordinator.encoding_for(&domain);
    let chunk_size = req.chunk_size.unwrap_or_else(|| coordinator.chunk_size_for(&domain));

    let _guard = coordinator.lock().await;
    let outcome = runs::reconcile_level_files(&store, encoding, chunk_size, req.level)?;

    Ok(Json(json!({
        "ok": true,
        "level": outcome.level,
        "expected": outcome.expected,
        "remaining": outcome.remaining.len(),
    })))
}

/// `POST /runs/chunk/files/incomplete` (§6, §4.7): sweep every level for one
/// domain, reconciling only levels that still have undownloaded files.
async fn runs_chunk_files_incomplete(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<RunsChunkFilesIncompleteRequest>,
) -> HandlerResult {
    let domain = req.hints.resolve_domain();
    let store = coordinator.store_for(domain.clone());
    let encoding = coordinator.encoding_for(&domain);
    let chunk_size = req.chunk_size.unwrap_or_else(|| coordinator.chunk_size_for(&domain));

    let _guard = coordinator.lock().await;
    let outcomes = runs::reconcile_incomplete_levels(&store, encoding, chunk_size)?;

    Ok(Json(json!({
        "ok": true,
        "levels": outcomes.iter().map(|o| json!({
            "level": o.level,
            "expected": o.expected,
            "remaining": o.remaining.len(),
        })).collect::<Vec<_>>(),
    })))
}

/// `POST /runs/start/files` (§6, §4.7): hard-reset a file-download level.
async fn runs_start_files(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<RunsStartFilesRequest>,
) -> HandlerResult {
    validate(req.level > 0, "level must be a positive integer")?;

    let domain = req.hints.resolve_domain();
    let store = coordinator.store_for(domain.clone());

    let _guard = coordinator.lock().await;
    let outcome = runs::reset_level_files(&store, req.level)?;

    warn!(domain = %domain, level = req.level, deleted = outcome.deleted, retained = outcome.retained, "hard-reset file download level");
    Ok(Json(json!({ "ok": true, "deleted": outcome.deleted, "retained": outcome.retained })))
}

/// `POST /upload/file` (§6, §4.5): persist one downloaded file.
async fn upload_file(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<UploadFileRequest>,
) -> HandlerResult {
    validate(!req.url.trim().is_empty(), "url must not be empty")?;
    validate(!req.content_base64.trim().is_empty(), "content_base64 must not be empty")?;
    validate(req.bfs_level > 0, "bfs_level must be a positive integer")?;

    use base64::Engine;
    let content = base64::engine::general_purpose::STANDARD
        .decode(req.content_base64.trim())
        .map_err(|e| SinkError::Validation(format!("invalid content_base64: {e}")))?;

    let file_url = urlnorm::normalize(&req.url);
    let source_page_url = req.source_page_url.as_deref().map(urlnorm::normalize);

    let domain = crate::domain::resolve(
        req.hints.domain_key.as_deref(),
        req.hints.crawl_root.as_deref(),
        req.hints.url.as_deref().or(Some(file_url.as_str())),
        std::iter::empty(),
    );
    let store = coordinator.store_for(domain.clone());
    let policy = coordinator.policy();
    let policy_metadata = {
        let term_meta = store.load_term_meta()?;
        serde_json::to_value(&term_meta).unwrap_or(Value::Null)
    };

    let request = UploadRequest {
        file_url: &file_url,
        content: &content,
        ext: req.ext.as_deref(),
        filename_override: req.filename.as_deref(),
        source_page_url: source_page_url.as_deref(),
        bfs_level: req.bfs_level,
    };

    let _guard = coordinator.lock().await;
    let receipt = upload::upload(&store, policy, &policy_metadata, request)?;

    info!(
        domain = %domain, sha256 = %receipt.sha256, saved_to = %receipt.saved_to,
        skipped = receipt.skipped, "upload processed"
    );

    Ok(Json(json!({
        "ok": true,
        "sha256": receipt.sha256,
        "saved_to": receipt.saved_to,
        "skipped": receipt.skipped,
        "note": receipt.note,
    })))
}

/// `POST /probe/meta` (§6, §4.8): ingest one HEAD/range-GET signature.
async fn probe_meta(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<ProbeMetaRequest>,
) -> HandlerResult {
    validate(!req.url.trim().is_empty(), "url must not be empty")?;

    let url = urlnorm::normalize(&req.url);
    let domain = crate::domain::resolve(
        req.hints.domain_key.as_deref(),
        req.crawl_root.as_deref(),
        req.hints.url.as_deref().or(Some(url.as_str())),
        std::iter::empty(),
    );
    let store = coordinator.store_for(domain.clone());
    let encoding = coordinator.encoding_for(&domain);

    let request = ProbeRequest {
        url,
        level: req.level,
        head: req.head,
        get_range: req.get_range,
    };

    let _guard = coordinator.lock().await;
    let outcome = probe::ingest_probe(&store, encoding, request)?;

    Ok(Json(json!({ "ok": true, "changed": outcome.changed, "signature": outcome.signature })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode as HttpStatus};
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn app(root: &std::path::Path) -> Router {
        let coordinator = Arc::new(Coordinator::new(Config::default(), root));
        router(coordinator)
    }

    #[tokio::test]
    async fn test_health_returns_ok() {
        let dir = tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), HttpStatus::OK);
    }

    #[tokio::test]
    async fn test_dedupe_level_requires_positive_level() {
        let dir = tempdir().unwrap();
        let body = json!({
            "level": 0,
            "domain_key": "example.com",
            "visited": [],
            "pages": [],
            "files": [],
        });
        let response = app(dir.path())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/dedupe/level")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), HttpStatus::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_dedupe_level_then_upload_roundtrip() {
        let dir = tempdir().unwrap();
        let app = app(dir.path());

        let dedupe_body = json!({
            "level": 1,
            "domain_key": "example.com",
            "visited": ["https://example.com/root"],
            "pages": ["https://example.com/a"],
            "files": [],
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/dedupe/level")
                    .header("content-type", "application/json")
                    .body(Body::from(dedupe_body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), HttpStatus::OK);

        use base64::Engine;
        let content_b64 = base64::engine::general_purpose::STANDARD.encode(b"hello world");
        let upload_body = json!({
            "url": "https://example.com/file.txt",
            "content_base64": content_b64,
            "bfs_level": 1,
            "domain_key": "example.com",
        });
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/upload/file")
                    .header("content-type", "application/json")
                    .body(Body::from(upload_body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), HttpStatus::OK);
    }
}
