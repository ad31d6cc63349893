use std::collections::HashSet;
use url::{form_urlencoded, Url};

/// Normalizes a URL per the sink's canonicalization rules (§4.1).
///
/// Steps:
/// 1. Iteratively (fixed point, capped at 8 iterations) clean up HTML-entity
///    leakage in `&amp;`-style query separators.
/// 2. Parse; on failure, return the trimmed cleaned input verbatim.
/// 3. Clear the fragment.
/// 4. Strip a trailing `/index.html` to `/`.
/// 5. Collapse runs of `/` in the path.
/// 6. Rebuild the query, preserving the first occurrence of each `(key,
///    value)` pair in order, dropping exact duplicates.
/// 7. Serialize.
///
/// The result is idempotent: `normalize(normalize(x)) == normalize(x)`.
///
/// # Examples
///
/// ```
/// use bfs_crawl_sink::url::normalize;
///
/// assert_eq!(
///     normalize("https://example.com/a//b/index.html?x=1&x=1&y=2#frag"),
///     "https://example.com/a/b/?x=1&y=2"
/// );
/// ```
pub fn normalize(raw: &str) -> String {
    let cleaned = clean_entities(raw);

    let Ok(mut url) = Url::parse(&cleaned) else {
        return cleaned.trim().to_string();
    };

    url.set_fragment(None);

    let path = strip_index_html(url.path());
    let path = collapse_slashes(&path);
    url.set_path(&path);

    let query = rebuild_query(&url);
    url.set_query(query.as_deref());

    url.to_string()
}

/// Extracts a lowercase file extension from a URL-like string.
///
/// Matches the last run of ASCII alphanumerics immediately preceded by a `.`
/// and immediately followed by `?`, `#`, or end-of-string. Defaults to
/// `"bin"` when no such run exists.
///
/// # Examples
///
/// ```
/// use bfs_crawl_sink::url::extension;
///
/// assert_eq!(extension("https://example.com/report.PDF?x=1"), "pdf");
/// assert_eq!(extension("https://example.com/archive.tar.gz"), "gz");
/// assert_eq!(extension("https://example.com/no-extension"), "bin");
/// ```
pub fn extension(url: &str) -> String {
    let bytes = url.as_bytes();
    let n = bytes.len();
    let mut i = 0;
    while i < n {
        if bytes[i] == b'.' {
            let mut j = i + 1;
            while j < n && bytes[j] != b'?' && bytes[j] != b'#' && bytes[j].is_ascii_alphanumeric()
            {
                j += 1;
            }
            let terminated = j == n || bytes[j] == b'?' || bytes[j] == b'#';
            if j > i + 1 && terminated {
                return url[i + 1..j].to_ascii_lowercase();
            }
        }
        i += 1;
    }
    "bin".to_string()
}

/// Cleans up HTML-entity leakage around `&` query separators.
///
/// Runs a fixed number of substitution passes (capped at 8) until the string
/// stops changing, so that doubly- or triply-escaped ampersands (a common
/// artifact of copy-pasted or re-encoded links) are fully unwound.
fn clean_entities(input: &str) -> String {
    let mut current = input.to_string();
    for _ in 0..8 {
        let next = current
            .replace("&amp;", "&")
            .replace("%26amp%3B", "&")
            .replace("amp%3B", "&")
            .replace("amp;", "&");
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Strips a trailing `/index.html` path segment, leaving the directory slash.
fn strip_index_html(path: &str) -> String {
    match path.strip_suffix("/index.html") {
        Some(stripped) => format!("{stripped}/"),
        None => path.to_string(),
    }
}

/// Collapses runs of consecutive `/` into a single `/`.
fn collapse_slashes(path: &str) -> String {
    let mut result = String::with_capacity(path.len());
    let mut prev_was_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !prev_was_slash {
                result.push('/');
            }
            prev_was_slash = true;
        } else {
            result.push(c);
            prev_was_slash = false;
        }
    }
    if result.is_empty() {
        "/".to_string()
    } else {
        result
    }
}

/// Rebuilds the query string, keeping the first occurrence of each exact
/// `(key, value)` pair and dropping later exact duplicates.
fn rebuild_query(url: &Url) -> Option<String> {
    url.query()?;

    let mut seen = HashSet::new();
    let mut pairs = Vec::new();
    for (k, v) in url.query_pairs() {
        let pair = (k.into_owned(), v.into_owned());
        if seen.insert(pair.clone()) {
            pairs.push(pair);
        }
    }

    if pairs.is_empty() {
        return None;
    }

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (k, v) in &pairs {
        serializer.append_pair(k, v);
    }
    Some(serializer.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clears_fragment() {
        assert_eq!(
            normalize("https://example.com/page#section"),
            "https://example.com/page"
        );
    }

    #[test]
    fn test_strips_index_html() {
        assert_eq!(
            normalize("https://example.com/dir/index.html"),
            "https://example.com/dir/"
        );
    }

    #[test]
    fn test_collapses_slashes() {
        assert_eq!(
            normalize("https://example.com//a///b"),
            "https://example.com/a/b"
        );
    }

    #[test]
    fn test_dedupes_identical_query_pairs() {
        assert_eq!(
            normalize("https://example.com/p?x=1&y=2&x=1"),
            "https://example.com/p?x=1&y=2"
        );
    }

    #[test]
    fn test_keeps_distinct_values_for_same_key() {
        assert_eq!(
            normalize("https://example.com/p?x=1&x=2"),
            "https://example.com/p?x=1&x=2"
        );
    }

    #[test]
    fn test_entity_leakage_ampersand() {
        assert_eq!(
            normalize("https://example.com/p?a=1&amp;b=2"),
            "https://example.com/p?a=1&b=2"
        );
    }

    #[test]
    fn test_entity_leakage_percent_encoded() {
        assert_eq!(
            normalize("https://example.com/p?a=1%26amp%3Bb=2"),
            normalize("https://example.com/p?a=1&b=2")
        );
    }

    #[test]
    fn test_malformed_url_returns_trimmed_input() {
        assert_eq!(normalize("  not a url  "), "not a url");
    }

    #[test]
    fn test_idempotent() {
        let inputs = [
            "https://example.com//a/index.html?b=2&b=2&a=1#frag",
            "https://example.com/a/b/c",
            "not a url at all",
            "https://example.com/p?a=1&amp;b=2",
        ];
        for input in inputs {
            let once = normalize(input);
            let twice = normalize(&once);
            assert_eq!(once, twice, "not idempotent for {input}");
        }
    }

    #[test]
    fn test_extension_basic() {
        assert_eq!(extension("https://example.com/report.pdf"), "pdf");
    }

    #[test]
    fn test_extension_uppercase() {
        assert_eq!(extension("https://example.com/report.PDF?x=1"), "pdf");
    }

    #[test]
    fn test_extension_with_fragment() {
        assert_eq!(extension("https://example.com/report.csv#top"), "csv");
    }

    #[test]
    fn test_extension_multi_dot() {
        assert_eq!(extension("https://example.com/archive.tar.gz"), "gz");
    }

    #[test]
    fn test_extension_default_bin() {
        assert_eq!(extension("https://example.com/no-extension"), "bin");
    }

    #[test]
    fn test_extension_matches_trailing_numeric_run() {
        // The spec's regex is literal: a dot followed by alphanumerics and
        // then end-of-string matches even inside a query value.
        assert_eq!(extension("https://example.com/page?v=1.2"), "2");
    }
}
