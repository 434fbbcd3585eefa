//! URL helpers backing record construction.

use url::Url;

/// Extract the lowercased host portion of a URL.
pub fn extract_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}
