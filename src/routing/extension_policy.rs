//! The domain-agnostic default routing policy (§4.11).
//!
//! Buckets files by their extension under `downloads/<domain>/<ext>/`. No
//! term/electorate inference, no date-based disambiguation — those are
//! properties of a specific deployment's policy, not of this default.

use crate::routing::{build_out_path, derive_filename, RouteInput, RouteOutput, RoutingPolicy};
use std::path::Path;

/// Routes every file into a bucket named after its extension, with no
/// sub-bucket.
#[derive(Debug, Clone, Default)]
pub struct ExtensionBucketPolicy;

impl RoutingPolicy for ExtensionBucketPolicy {
    fn route(&self, downloads_root: &Path, domain: &str, input: &RouteInput<'_>) -> RouteOutput {
        let ext = input
            .ext
            .map(str::to_string)
            .unwrap_or_else(|| crate::url::extension(input.file_url));
        let filename = derive_filename(input.filename_override, input.file_url);
        let bucket = Some(ext.clone());

        let out_path = build_out_path(downloads_root, domain, bucket.as_deref(), None, &filename);

        RouteOutput {
            bucket,
            sub_bucket: None,
            filename,
            out_path,
            ext,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_routes_by_extension() {
        let policy = ExtensionBucketPolicy;
        let meta = json!({});
        let input = RouteInput {
            file_url: "https://example.com/report.pdf",
            source_page_url: None,
            ext: None,
            filename_override: None,
            policy_metadata: &meta,
        };
        let out = policy.route(Path::new("downloads"), "example.com", &input);
        assert_eq!(out.bucket.as_deref(), Some("pdf"));
        assert_eq!(out.filename, "report.pdf");
        assert_eq!(out.out_path, Path::new("downloads/example.com/pdf/report.pdf"));
    }

    #[test]
    fn test_is_pure() {
        let policy = ExtensionBucketPolicy;
        let meta = json!({});
        let input = RouteInput {
            file_url: "https://example.com/a/b/report.pdf",
            source_page_url: Some("https://example.com/a"),
            ext: None,
            filename_override: None,
            policy_metadata: &meta,
        };
        let first = policy.route(Path::new("downloads"), "example.com", &input);
        let second = policy.route(Path::new("downloads"), "example.com", &input);
        assert_eq!(first, second);
    }

    #[test]
    fn test_uses_explicit_ext_over_url_derived() {
        let policy = ExtensionBucketPolicy;
        let meta = json!({});
        let input = RouteInput {
            file_url: "https://example.com/report",
            source_page_url: None,
            ext: Some("docx"),
            filename_override: None,
            policy_metadata: &meta,
        };
        let out = policy.route(Path::new("downloads"), "example.com", &input);
        assert_eq!(out.bucket.as_deref(), Some("docx"));
    }
}
