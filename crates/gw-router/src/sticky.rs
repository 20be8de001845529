use gw_common::sticky_key_hash;

/// Derives the sticky-session key per spec §4.1: header `X-Session-ID`
/// trimmed (source "session") takes precedence; otherwise the bearer token
/// after `"Bearer "` in `Authorization` (source "auth"). `None` if neither
/// is present, meaning no sticky routing occurs for this request.
///
/// `headers` is a lowercased header-name map, as produced at the HTTP
/// framework boundary before this crate ever sees it.
pub fn derive_sticky_key(headers: &std::collections::HashMap<String, String>) -> Option<String> {
    if let Some(session_id) = headers.get("x-session-id") {
        let trimmed = session_id.trim();
        if !trimmed.is_empty() {
            return Some(sticky_key_hash(trimmed));
        }
    }
    if let Some(auth) = headers.get("authorization") {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            let trimmed = token.trim();
            if !trimmed.is_empty() {
                return Some(sticky_key_hash(trimmed));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> std::collections::HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn session_header_takes_precedence_over_auth() {
        let h = headers(&[
            ("x-session-id", "sess-1"),
            ("authorization", "Bearer tok-1"),
        ]);
        let by_session = derive_sticky_key(&headers(&[("x-session-id", "sess-1")])).unwrap();
        assert_eq!(derive_sticky_key(&h).unwrap(), by_session);
    }

    #[test]
    fn falls_back_to_bearer_token() {
        let h = headers(&[("authorization", "Bearer abc")]);
        assert!(derive_sticky_key(&h).is_some());
    }

    #[test]
    fn absent_headers_yield_no_sticky_key() {
        let h = headers(&[]);
        assert!(derive_sticky_key(&h).is_none());
    }

    #[test]
    fn blank_session_header_falls_through_to_auth() {
        let h = headers(&[("x-session-id", "   "), ("authorization", "Bearer abc")]);
        let expect = derive_sticky_key(&headers(&[("authorization", "Bearer abc")])).unwrap();
        assert_eq!(derive_sticky_key(&h).unwrap(), expect);
    }
}
