//! Domain namespace resolution (§3 DomainKey, §6 domain key resolution precedence).
//!
//! Every persistent entity in the sink is scoped under a `DomainKey`: a
//! filesystem-safe slug derived from a request's host. This module derives
//! the key from a URL and implements the request-level precedence chain
//! that the HTTP handlers use to find a domain when none is given explicitly.

use crate::url;
use std::fmt;

/// A filesystem-safe domain namespace key.
///
/// Derived from a lowercase host with a leading `www.` stripped, any
/// character outside `[a-z0-9.-]` replaced with `_`, and leading/trailing
/// underscores trimmed. An empty result becomes `"default"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainKey(String);

impl DomainKey {
    /// Builds a domain key directly from a host string (not a full URL).
    ///
    /// # Examples
    ///
    /// ```
    /// use bfs_crawl_sink::DomainKey;
    ///
    /// assert_eq!(DomainKey::from_host("WWW.Example.COM").as_str(), "example.com");
    /// assert_eq!(DomainKey::from_host("").as_str(), "default");
    /// assert_eq!(DomainKey::from_host("a b/c").as_str(), "a_b_c");
    /// ```
    pub fn from_host(host: &str) -> Self {
        let lower = host.to_lowercase();
        let stripped = lower.strip_prefix("www.").unwrap_or(&lower);

        let sanitized: String = stripped
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        let trimmed = sanitized.trim_matches('_');

        if trimmed.is_empty() {
            DomainKey("default".to_string())
        } else {
            DomainKey(trimmed.to_string())
        }
    }

    /// Derives a domain key from a raw URL string, extracting its host.
    /// Falls back to `"default"` if the URL has no parseable host.
    pub fn from_url(raw: &str) -> Self {
        match url::extract_host_str(raw) {
            Some(host) => Self::from_host(&host),
            None => DomainKey("default".to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn default_key() -> Self {
        DomainKey("default".to_string())
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for DomainKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolves the domain key for a request using the precedence chain from §6:
///
/// 1. an explicit `domain_key`/`domain` field,
/// 2. else a `crawl_root`/`root_url`/`base_url` field's host,
/// 3. else a `url` field's host,
/// 4. else the first URL found in `visited | pages | files`,
/// 5. else `"default"`.
pub fn resolve<'a>(
    explicit: Option<&str>,
    crawl_root: Option<&str>,
    url_field: Option<&str>,
    first_of_lists: impl IntoIterator<Item = &'a str>,
) -> DomainKey {
    if let Some(explicit) = explicit.filter(|s| !s.trim().is_empty()) {
        return DomainKey::from_host(explicit);
    }

    if let Some(root) = crawl_root {
        if let Some(host) = url::extract_host_str(root) {
            return DomainKey::from_host(&host);
        }
    }

    if let Some(u) = url_field {
        if let Some(host) = url::extract_host_str(u) {
            return DomainKey::from_host(&host);
        }
    }

    for candidate in first_of_lists {
        if let Some(host) = url::extract_host_str(candidate) {
            return DomainKey::from_host(&host);
        }
    }

    DomainKey::default_key()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_host_basic() {
        assert_eq!(DomainKey::from_host("example.com").as_str(), "example.com");
    }

    #[test]
    fn test_from_host_strips_www() {
        assert_eq!(DomainKey::from_host("www.example.com").as_str(), "example.com");
    }

    #[test]
    fn test_from_host_lowercases() {
        assert_eq!(DomainKey::from_host("EXAMPLE.COM").as_str(), "example.com");
    }

    #[test]
    fn test_from_host_sanitizes_invalid_chars() {
        assert_eq!(DomainKey::from_host("exa mple.com!").as_str(), "exa_mple.com_".trim_matches('_'));
    }

    #[test]
    fn test_from_host_empty_becomes_default() {
        assert_eq!(DomainKey::from_host("").as_str(), "default");
        assert_eq!(DomainKey::from_host("___").as_str(), "default");
    }

    #[test]
    fn test_from_url() {
        assert_eq!(
            DomainKey::from_url("https://WWW.Example.com/page").as_str(),
            "example.com"
        );
    }

    #[test]
    fn test_from_url_unparseable_is_default() {
        assert_eq!(DomainKey::from_url("not a url").as_str(), "default");
    }

    #[test]
    fn test_resolve_prefers_explicit() {
        let key = resolve(
            Some("explicit.com"),
            Some("https://crawlroot.com"),
            Some("https://urlfield.com"),
            vec!["https://list.com"],
        );
        assert_eq!(key.as_str(), "explicit.com");
    }

    #[test]
    fn test_resolve_falls_back_to_crawl_root() {
        let key = resolve(
            None,
            Some("https://crawlroot.com"),
            Some("https://urlfield.com"),
            vec!["https://list.com"],
        );
        assert_eq!(key.as_str(), "crawlroot.com");
    }

    #[test]
    fn test_resolve_falls_back_to_url_field() {
        let key = resolve(None, None, Some("https://urlfield.com"), vec!["https://list.com"]);
        assert_eq!(key.as_str(), "urlfield.com");
    }

    #[test]
    fn test_resolve_falls_back_to_list() {
        let key = resolve(None, None, None, vec!["https://list.com/a"]);
        assert_eq!(key.as_str(), "list.com");
    }

    #[test]
    fn test_resolve_defaults() {
        let key = resolve(None, None, None, Vec::<&str>::new());
        assert_eq!(key.as_str(), "default");
    }
}
