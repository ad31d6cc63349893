//! A test-only policy exercising the "cannot infer a bucket" sentinel path.

use crate::routing::{build_out_path, derive_filename, RouteInput, RouteOutput, RoutingPolicy};
use std::path::Path;

/// Always returns the bucket sentinel (`None`), placing every file
/// directly under `downloads/<domain>/`. Exists to give the resort engine
/// and HTTP layer something deterministic to exercise the sentinel
/// behavior against; not registered as a selectable policy in configuration.
#[derive(Debug, Clone, Default)]
pub struct SentinelPolicy;

impl RoutingPolicy for SentinelPolicy {
    fn route(&self, downloads_root: &Path, domain: &str, input: &RouteInput<'_>) -> RouteOutput {
        let ext = input
            .ext
            .map(str::to_string)
            .unwrap_or_else(|| crate::url::extension(input.file_url));
        let filename = derive_filename(input.filename_override, input.file_url);
        let out_path = build_out_path(downloads_root, domain, None, None, &filename);

        RouteOutput {
            bucket: None,
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
    fn test_places_directly_under_domain() {
        let policy = SentinelPolicy;
        let meta = json!({});
        let input = RouteInput {
            file_url: "https://example.com/report.pdf",
            source_page_url: None,
            ext: None,
            filename_override: None,
            policy_metadata: &meta,
        };
        let out = policy.route(Path::new("downloads"), "example.com", &input);
        assert_eq!(out.bucket, None);
        assert_eq!(out.out_path, Path::new("downloads/example.com/report.pdf"));
    }
}
