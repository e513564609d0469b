//! Utility functions and helpers.

pub mod http;

use scraper::{ElementRef, Selector};
use url::Url;

use crate::error::{AppError, Result};

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &Url, href: &str) -> String {
    base.join(href)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

/// Key used to group requests for rate limiting: the URL's host, or the
/// raw string when it does not parse.
pub fn host_key(url_str: &str) -> String {
    Url::parse(url_str)
        .ok()
        .and_then(|u| u.host_str().map(|s| s.to_ascii_lowercase()))
        .unwrap_or_else(|| url_str.to_string())
}

/// Parse a CSS selector, mapping failures into [`AppError::Selector`].
pub fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
}

/// Whitespace-normalized text content of an element.
pub fn element_text(el: &ElementRef<'_>) -> String {
    normalize_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_url() {
        let base = Url::parse("https://example.com/path/").unwrap();
        assert_eq!(
            resolve_url(&base, "page.html"),
            "https://example.com/path/page.html"
        );
        assert_eq!(
            resolve_url(&base, "/root.html"),
            "https://example.com/root.html"
        );
        assert_eq!(
            resolve_url(&base, "https://other.com/x"),
            "https://other.com/x"
        );
    }

    #[test]
    fn test_host_key() {
        assert_eq!(host_key("https://Example.com/path"), "example.com");
        assert_eq!(host_key("https://sub.example.com:8080/x"), "sub.example.com");
        assert_eq!(host_key("not a url"), "not a url");
    }

    #[test]
    fn test_parse_selector() {
        assert!(parse_selector("div.dropdown-menu a[href]").is_ok());
        assert!(matches!(
            parse_selector("div[["),
            Err(AppError::Selector { .. })
        ));
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  Big \n  Mac "), "Big Mac");
    }
}
