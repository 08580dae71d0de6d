use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use axum::http::{header, HeaderMap, HeaderValue};
use chrono::{DateTime, Utc};

/// Quoted ETag derived from the response body.
pub fn compute_etag(body: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    format!("\"{:x}\"", hasher.finish())
}

/// RFC 7231 HTTP-date, or `None` for timestamps that cannot be rendered.
pub fn http_date(timestamp: DateTime<Utc>) -> Option<HeaderValue> {
    HeaderValue::from_str(&timestamp.format("%a, %d %b %Y %H:%M:%S GMT").to_string()).ok()
}

/// True when `If-None-Match` lists `*` or `current_etag`.
pub fn if_none_match_matches(headers: &HeaderMap, current_etag: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .any(|tag| tag == "*" || tag == current_etag)
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn etag_is_quoted_and_stable() {
        let etag = compute_etag(br#"{"ok":true}"#);
        assert!(etag.starts_with('"') && etag.ends_with('"'));
        assert_eq!(etag, compute_etag(br#"{"ok":true}"#));
    }

    #[test]
    fn if_none_match_accepts_lists_and_wildcards() {
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("\"x\", \"abc\""));
        assert!(if_none_match_matches(&headers, "\"abc\""));
        assert!(!if_none_match_matches(&headers, "\"def\""));

        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("*"));
        assert!(if_none_match_matches(&headers, "\"anything\""));
        assert!(!if_none_match_matches(&HeaderMap::new(), "\"abc\""));
    }

    #[test]
    fn http_date_uses_gmt_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(http_date(ts).unwrap(), "Tue, 05 Mar 2024 07:08:09 GMT");
    }
}
