use url::Url;

/// Extracts the host portion of a URL, lowercased.
///
/// Returns `None` if the URL has no host (e.g. `data:` or `mailto:` URLs).
///
/// # Examples
///
/// ```
/// use url::Url;
/// use bfs_crawl_sink::url::extract_host;
///
/// let url = Url::parse("https://EXAMPLE.com/path").unwrap();
/// assert_eq!(extract_host(&url), Some("example.com".to_string()));
/// ```
pub fn extract_host(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Extracts the host portion of a raw URL string, without requiring a
/// pre-parsed [`Url`]. Used by domain resolution, which must tolerate
/// unnormalized input.
pub fn extract_host_str(raw: &str) -> Option<String> {
    Url::parse(raw).ok().and_then(|u| extract_host(&u))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_simple_host() {
        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(extract_host(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_extract_uppercase_lowercased() {
        let url = Url::parse("https://EXAMPLE.COM/").unwrap();
        assert_eq!(extract_host(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_extract_with_port() {
        let url = Url::parse("https://example.com:8080/").unwrap();
        assert_eq!(extract_host(&url), Some("example.com".to_string()));
    }

    #[test]
    fn test_extract_host_str_invalid() {
        assert_eq!(extract_host_str("not a url"), None);
    }

    #[test]
    fn test_extract_host_str_valid() {
        assert_eq!(
            extract_host_str("https://Sub.Example.com/page"),
            Some("sub.example.com".to_string())
        );
    }
}
