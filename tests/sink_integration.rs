//! Integration tests for the sink's HTTP surface and the resort reconciler.
//!
//! The HTTP scenarios drive the router end-to-end with `tower::ServiceExt::oneshot`
//! (no socket bound); the resort scenario calls `resort::run` directly since
//! reconciliation is a CLI-only tool, not a route.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::Engine;
use bfs_crawl_sink::config::Config;
use bfs_crawl_sink::domain::DomainKey;
use bfs_crawl_sink::resort::{self, ConflictPolicy, Mode};
use bfs_crawl_sink::routing::ExtensionBucketPolicy;
use bfs_crawl_sink::runs;
use bfs_crawl_sink::state::{HashRecord, HashRegistry, SourceObservation, StateStore};
use bfs_crawl_sink::Coordinator;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::tempdir;
use tower::ServiceExt;

fn app(root: &std::path::Path) -> Router {
    let coordinator = Arc::new(Coordinator::new(Config::default(), root));
    bfs_crawl_sink::http::router(coordinator)
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, parsed)
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, parsed)
}

/// Batch-mode dedupe at a level: visited urls fall out of the next frontier,
/// newly discovered pages merge in.
#[tokio::test]
async fn test_dedupe_level_merges_frontier() {
    let dir = tempdir().unwrap();

    let body = json!({
        "level": 1,
        "domain_key": "example.com",
        "visited": ["https://example.com/root", "https://example.com/a"],
        "pages": ["https://example.com/a", "https://example.com/b"],
        "files": [],
    });
    let (status, parsed) = post_json(app(dir.path()), "/dedupe/level", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parsed["ok"], json!(true));
    // /a was both visited and discovered: it must not survive into the next frontier.
    assert_eq!(parsed["next_frontier_count"], json!(1));
}

/// A streaming run started, appended to twice, and finalized twice produces
/// the same summary both times (finalize is idempotent on the `.done` marker).
#[tokio::test]
async fn test_streaming_finalize_is_idempotent() {
    let dir = tempdir().unwrap();
    let app_instance = app(dir.path());

    let start_body = json!({ "level": 2, "run_id": "run-a", "domain_key": "example.com" });
    let (status, _) = post_json(app_instance.clone(), "/runs/start/urls", start_body).await;
    assert_eq!(status, StatusCode::OK);

    for pages in [vec!["https://example.com/p1"], vec!["https://example.com/p2"]] {
        let append_body = json!({
            "level": 2,
            "run_id": "run-a",
            "domain_key": "example.com",
            "visited": ["https://example.com/seed"],
            "pages": pages,
            "files": [],
        });
        let (status, _) = post_json(app_instance.clone(), "/runs/append/urls", append_body).await;
        assert_eq!(status, StatusCode::OK);
    }

    let finalize_body = json!({ "level": 2, "run_id": "run-a", "domain_key": "example.com" });
    let (status, first) =
        post_json(app_instance.clone(), "/runs/finalize/urls", finalize_body.clone()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, second) = post_json(app_instance, "/runs/finalize/urls", finalize_body).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(first["summary"], second["summary"]);
    assert_eq!(first["summary"]["visited_count"], json!(1));
    assert_eq!(first["summary"]["pages_count"], json!(2));
}

/// Open streaming buckets drop out of `GET /health`'s count once finalized.
#[tokio::test]
async fn test_health_reports_open_bucket_count() {
    let dir = tempdir().unwrap();
    let app_instance = app(dir.path());

    let start_body = json!({ "level": 1, "run_id": "r1", "domain_key": "example.com" });
    post_json(app_instance.clone(), "/runs/start/urls", start_body).await;

    let (_, health_before) = get_json(app_instance.clone(), "/health").await;
    assert_eq!(health_before["open_streaming_buckets"], json!(1));

    let finalize_body = json!({ "level": 1, "run_id": "r1", "domain_key": "example.com" });
    post_json(app_instance.clone(), "/runs/finalize/urls", finalize_body).await;

    let (_, health_after) = get_json(app_instance, "/health").await;
    assert_eq!(health_after["open_streaming_buckets"], json!(0));
}

/// Two uploads with identical bytes but different URLs hash to the same
/// content: the second is skipped and both share one `saved_to`.
#[tokio::test]
async fn test_upload_dedupes_identical_content() {
    let dir = tempdir().unwrap();
    let app_instance = app(dir.path());

    let content_b64 = base64::engine::general_purpose::STANDARD.encode(b"same bytes twice");

    let first_body = json!({
        "url": "https://example.com/a.txt",
        "content_base64": content_b64,
        "bfs_level": 1,
        "domain_key": "example.com",
    });
    let (status, first) = post_json(app_instance.clone(), "/upload/file", first_body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["skipped"], json!(false));

    let second_body = json!({
        "url": "https://example.com/b.txt",
        "content_base64": content_b64,
        "bfs_level": 1,
        "domain_key": "example.com",
    });
    let (status, second) = post_json(app_instance, "/upload/file", second_body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["skipped"], json!(true));
    assert_eq!(second["sha256"], first["sha256"]);
    assert_eq!(second["saved_to"], first["saved_to"]);
}

/// A file claiming to be a PDF but containing HTML is quarantined under
/// `_bad/` instead of landing in its normal extension bucket.
#[tokio::test]
async fn test_upload_quarantines_mislabeled_pdf() {
    let dir = tempdir().unwrap();
    let app_instance = app(dir.path());

    let content_b64 =
        base64::engine::general_purpose::STANDARD.encode(b"<html><body>not really a pdf</body></html>");
    let body = json!({
        "url": "https://example.com/report.pdf",
        "content_base64": content_b64,
        "bfs_level": 1,
        "domain_key": "example.com",
    });
    let (status, parsed) = post_json(app_instance, "/upload/file", body).await;
    assert_eq!(status, StatusCode::OK);
    let saved_to = parsed["saved_to"].as_str().unwrap();
    assert!(saved_to.contains("_bad"));
    assert_eq!(parsed["note"], json!("bad_pdf_got_html"));
}

/// An idle streaming bucket (one that has neither been appended to nor
/// finalized for longer than `idle_ms`) auto-finalizes on a watchdog sweep.
#[tokio::test]
async fn test_watchdog_auto_finalizes_idle_bucket() {
    let dir = tempdir().unwrap();
    let store = StateStore::new(dir.path(), DomainKey::from_host("example.com"));

    runs::start(&store, 1, "idle-run").unwrap();
    runs::append(
        &store,
        1,
        "idle-run",
        runs::RunBatch {
            visited: vec!["https://example.com/x".to_string()],
            pages: vec![],
            files: vec![],
        },
    )
    .unwrap();

    // Simulate elapsed idle time by moving "now" forward instead of sleeping.
    let future_now = std::time::SystemTime::now() + std::time::Duration::from_millis(120_000);
    let finalized = runs::run_watchdog_sweep(
        &store,
        bfs_crawl_sink::config::ArtifactEncoding::MetaFirstRow,
        100,
        60_000,
        future_now,
    )
    .unwrap();

    assert_eq!(finalized.len(), 1);
    assert_eq!(finalized[0].visited_count, 1);
    assert_eq!(runs::count_open_buckets(dir.path()), 0);
}

/// Resort displaces a non-canonical occupant out of the way and moves the
/// canonical record's file into its routed bucket; applying a second time
/// is a no-op (fixed point).
#[tokio::test]
async fn test_resort_displaces_non_canonical_occupant_and_reaches_fixed_point() {
    let dir = tempdir().unwrap();
    let store = StateStore::new(dir.path(), DomainKey::from_host("example.com"));
    store.ensure_layout().unwrap();

    let misplaced = store.downloads_dir().join("misc").join("file.csv");
    std::fs::create_dir_all(misplaced.parent().unwrap()).unwrap();
    std::fs::write(&misplaced, b"canonical bytes").unwrap();

    let occupant_path = store.downloads_dir().join("csv").join("file.csv");
    std::fs::create_dir_all(occupant_path.parent().unwrap()).unwrap();
    std::fs::write(&occupant_path, b"occupant bytes").unwrap();

    let mut registry = HashRegistry::default();
    registry.records.insert(
        "canonical-sha".into(),
        HashRecord {
            sha256: "canonical-sha".into(),
            saved_to: Some("downloads/example.com/misc/file.csv".into()),
            bytes: 16,
            ext: "csv".into(),
            term_key: None,
            electorate_folder: None,
            first_seen_ts: "t0".into(),
            last_seen_ts: "t0".into(),
            note: None,
            sources: vec![SourceObservation {
                url: "https://example.com/file.csv".into(),
                source_page_url: None,
                level: 1,
                ts: "t0".into(),
            }],
        },
    );
    store.save_hash_registry(&registry).unwrap();

    let policy = ExtensionBucketPolicy;
    let meta = json!({});

    let summary = resort::run(&store, &policy, &meta, Mode::Apply, ConflictPolicy::Suffix, None).unwrap();
    assert_eq!(summary.moved, 1);
    assert!(summary.actions.iter().any(|a| a.contains("displace")));

    let desired = store.downloads_dir().join("csv").join("file.csv");
    let displaced = store.downloads_dir().join("csv").join("file__dup1.csv");
    assert_eq!(std::fs::read(&desired).unwrap(), b"canonical bytes");
    assert_eq!(std::fs::read(&displaced).unwrap(), b"occupant bytes");

    let second = resort::run(&store, &policy, &meta, Mode::Apply, ConflictPolicy::Suffix, None).unwrap();
    assert_eq!(second.moved, 0);
    assert_eq!(second.deduped, 0);
    assert_eq!(second.conflicts_skipped, 0);
}
