//! Routing policy (§4.4, §4.11).
//!
//! A routing policy maps a discovered file to a place on disk. The sink
//! ships one domain-agnostic default ([`ExtensionBucketPolicy`]); anything
//! domain-specific (term/electorate folders, date-based disambiguation) is
//! a separate policy implementing the same [`RoutingPolicy`] trait, chosen
//! by `routing.policy` in configuration. `inferTermKeyFromEventYear`-style
//! heuristics are deliberately not part of the default policy — see
//! `DESIGN.md`.

mod extension_policy;
mod sentinel_policy;

pub use extension_policy::ExtensionBucketPolicy;
pub use sentinel_policy::SentinelPolicy;

use serde_json::Value;
use std::path::PathBuf;

/// Maximum filename length in UTF-16 code units (≈240, §4.4).
const MAX_FILENAME_UTF16_UNITS: usize = 240;

/// Inputs to a routing decision.
#[derive(Debug, Clone)]
pub struct RouteInput<'a> {
    pub file_url: &'a str,
    pub source_page_url: Option<&'a str>,
    pub ext: Option<&'a str>,
    pub filename_override: Option<&'a str>,
    pub policy_metadata: &'a Value,
}

/// The result of a routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOutput {
    /// `None` is the sentinel for "cannot infer a bucket" — the router
    /// places the file directly under `downloads/<domain>/`.
    pub bucket: Option<String>,
    pub sub_bucket: Option<String>,
    pub filename: String,
    pub out_path: PathBuf,
    pub ext: String,
}

/// A pure mapping from a discovered file to its canonical placement.
///
/// Implementations must be deterministic: the same inputs always yield the
/// same outputs (§4.4, "the routing policy is pure").
pub trait RoutingPolicy: Send + Sync {
    fn route(&self, downloads_root: &std::path::Path, domain: &str, input: &RouteInput<'_>) -> RouteOutput;
}

/// Selects a policy implementation by the `routing.policy` configuration
/// name. Unknown names fall back to the extension-bucket default.
pub fn build_policy(name: &str) -> Box<dyn RoutingPolicy> {
    match name {
        "sentinel" => Box::new(SentinelPolicy),
        _ => Box::new(ExtensionBucketPolicy),
    }
}

/// Builds the final routed output path from a bucket/sub_bucket/filename
/// triple, per §4.4: `out_path = downloads_root / domain / bucket / sub_bucket? / filename`.
pub fn build_out_path(
    downloads_root: &std::path::Path,
    domain: &str,
    bucket: Option<&str>,
    sub_bucket: Option<&str>,
    filename: &str,
) -> PathBuf {
    let mut path = downloads_root.join(domain);
    if let Some(bucket) = bucket {
        path = path.join(bucket);
    }
    if let Some(sub_bucket) = sub_bucket {
        path = path.join(sub_bucket);
    }
    path.join(filename)
}

/// Derives a safe filename in precedence order: explicit override, the URL
/// path's basename (URL-decoded, possibly twice, to recover names that were
/// double-encoded), or `download.bin`.
pub fn derive_filename(filename_override: Option<&str>, file_url: &str) -> String {
    let raw = filename_override
        .map(str::to_string)
        .or_else(|| basename_from_url(file_url))
        .unwrap_or_else(|| "download.bin".to_string());

    sanitize_filename(&raw)
}

fn basename_from_url(file_url: &str) -> Option<String> {
    let parsed = url::Url::parse(file_url).ok()?;
    let path = parsed.path();
    let last_segment = path.rsplit('/').find(|s| !s.is_empty())?;

    let once = percent_decode(last_segment);
    let twice = percent_decode(&once);
    let candidate = if twice != once { twice } else { once };

    if candidate.is_empty() {
        None
    } else {
        Some(candidate)
    }
}

fn percent_decode(s: &str) -> String {
    percent_encoding::percent_decode_str(s)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// Replaces path separators with `_`, strips control characters, and caps
/// length to ≈240 UTF-16 code units.
fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '\0',
            c => c,
        })
        .filter(|c| *c != '\0')
        .collect();

    let trimmed = replaced.trim();
    if trimmed.is_empty() {
        return "download.bin".to_string();
    }

    truncate_utf16(trimmed, MAX_FILENAME_UTF16_UNITS)
}

fn truncate_utf16(s: &str, max_units: usize) -> String {
    let mut units = 0usize;
    let mut end = s.len();
    for (idx, ch) in s.char_indices() {
        let ch_units = ch.len_utf16();
        if units + ch_units > max_units {
            end = idx;
            break;
        }
        units += ch_units;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_out_path_with_bucket_and_sub_bucket() {
        let path = build_out_path(
            std::path::Path::new("downloads"),
            "example.com",
            Some("pdf"),
            Some("2024"),
            "file.pdf",
        );
        assert_eq!(path, std::path::Path::new("downloads/example.com/pdf/2024/file.pdf"));
    }

    #[test]
    fn test_build_out_path_sentinel_bucket_goes_directly_under_domain() {
        let path = build_out_path(std::path::Path::new("downloads"), "example.com", None, None, "file.pdf");
        assert_eq!(path, std::path::Path::new("downloads/example.com/file.pdf"));
    }

    #[test]
    fn test_derive_filename_prefers_override() {
        let name = derive_filename(Some("custom.pdf"), "https://x/ignored.pdf");
        assert_eq!(name, "custom.pdf");
    }

    #[test]
    fn test_derive_filename_uses_url_basename() {
        let name = derive_filename(None, "https://x/path/report.pdf");
        assert_eq!(name, "report.pdf");
    }

    #[test]
    fn test_derive_filename_double_decodes() {
        let name = derive_filename(None, "https://x/My%2520Report.pdf");
        assert_eq!(name, "My Report.pdf");
    }

    #[test]
    fn test_derive_filename_falls_back_to_default() {
        let name = derive_filename(None, "https://x/");
        assert_eq!(name, "download.bin");
    }

    #[test]
    fn test_sanitize_filename_replaces_separators() {
        assert_eq!(sanitize_filename("a/b\\c"), "a_b_c");
    }

    #[test]
    fn test_sanitize_filename_caps_length() {
        let long = "a".repeat(300);
        let sanitized = sanitize_filename(&long);
        assert!(sanitized.encode_utf16().count() <= MAX_FILENAME_UTF16_UNITS);
    }
}
