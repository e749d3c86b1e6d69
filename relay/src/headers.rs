//! Header handling for the HTTP <-> tunnel adapter: flattening multi-value
//! headers into the wire format, and dropping hop-by-hop headers on the
//! way back out.

use axum::http::HeaderMap;

/// Headers that describe one hop of a connection and must never be
/// forwarded past it.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Flattens an `http::HeaderMap` into `(name, value)` pairs, joining
/// repeated header names with `, ` in encounter order and preserving the
/// original name case.
pub fn flatten(headers: &HeaderMap) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();

    for name in headers.keys() {
        let values: Vec<&str> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if values.is_empty() {
            continue;
        }
        out.push((name.as_str().to_string(), values.join(", ")));
    }

    out
}

/// True if `name` is a hop-by-hop header that must be dropped before
/// relaying a response.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Removes `host` plus any header matching `predicate` (case-insensitive
/// name match) from a flattened header list.
pub fn remove(headers: &mut Vec<(String, String)>, name: &str) {
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};

    #[test]
    fn flatten_joins_repeated_headers() {
        let mut headers = HeaderMap::new();
        headers.append(
            HeaderName::from_static("x-tag"),
            HeaderValue::from_static("a"),
        );
        headers.append(
            HeaderName::from_static("x-tag"),
            HeaderValue::from_static("b"),
        );
        let flat = flatten(&headers);
        assert_eq!(flat, vec![("x-tag".to_string(), "a, b".to_string())]);
    }

    #[test]
    fn hop_by_hop_matches_case_insensitively() {
        assert!(is_hop_by_hop("Connection"));
        assert!(is_hop_by_hop("TRANSFER-ENCODING"));
        assert!(!is_hop_by_hop("content-type"));
    }

    #[test]
    fn remove_strips_named_header() {
        let mut headers = vec![
            ("Host".to_string(), "example.com".to_string()),
            ("X-Other".to_string(), "v".to_string()),
        ];
        remove(&mut headers, "host");
        assert_eq!(headers, vec![("X-Other".to_string(), "v".to_string())]);
    }
}
