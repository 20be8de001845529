use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use gw_common::sticky_key_hash;
use gw_config::Config;

use crate::state::AppState;

/// Privilege level granted to a management-API caller (spec §6.2
/// "Authentication"): a read-only key may view state but not mutate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    Admin,
    ReadOnly,
}

/// Client-facing auth for the OpenAI/Gemini surfaces (spec §6.1): compares
/// the caller's bearer token / `x-goog-api-key` / `?key=` against
/// `upstream.api_keys`. An empty list means the gateway is unauthenticated
/// by configuration, not a bug — operators who want a private gateway set
/// at least one key.
pub fn check_client_key(headers: &HeaderMap, query: Option<&str>, config: &Config) -> bool {
    let keys = &config.upstream.api_keys;
    if keys.is_empty() {
        return true;
    }
    match extract_client_key(headers, query) {
        Some(key) => keys.iter().any(|k| k == &key),
        None => false,
    }
}

fn extract_client_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION)
        && let Ok(auth) = value.to_str()
    {
        let auth = auth.trim();
        let prefix = "Bearer ";
        if auth.len() > prefix.len() && auth[..prefix.len()].eq_ignore_ascii_case(prefix) {
            let token = auth[prefix.len()..].trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    if let Some(value) = headers.get("x-goog-api-key")
        && let Ok(s) = value.to_str()
    {
        let s = s.trim();
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }

    if let Some(value) = headers.get("x-api-key")
        && let Ok(s) = value.to_str()
    {
        let s = s.trim();
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }

    if let Some(query) = query
        && let Ok(parsed) = serde_urlencoded::from_str::<HashMap<String, String>>(query)
        && let Some(key) = parsed.get("key")
    {
        let key = key.trim();
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }

    None
}

/// Extracts the management key from `Authorization: Bearer`, `x-api-key`,
/// `?key=`, or the `mgmt_session` cookie, in that precedence order (spec
/// §6.2), mirroring the teacher's `extract_admin_key`.
fn extract_management_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION)
        && let Ok(auth) = value.to_str()
    {
        let auth = auth.trim();
        let prefix = "Bearer ";
        if auth.len() > prefix.len() && auth[..prefix.len()].eq_ignore_ascii_case(prefix) {
            let token = auth[prefix.len()..].trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    if let Some(value) = headers.get("x-api-key")
        && let Ok(s) = value.to_str()
    {
        let s = s.trim();
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }

    if let Some(query) = query
        && let Ok(parsed) = serde_urlencoded::from_str::<HashMap<String, String>>(query)
        && let Some(key) = parsed.get("key")
    {
        let key = key.trim();
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }

    if let Some(cookie) = headers.get(header::COOKIE)
        && let Ok(s) = cookie.to_str()
        && let Some(value) = find_cookie(s, "mgmt_session")
    {
        return Some(value);
    }

    None
}

fn find_cookie(cookie_header: &str, name: &str) -> Option<String> {
    cookie_header.split(';').find_map(|pair| {
        let pair = pair.trim();
        let (k, v) = pair.split_once('=')?;
        if k == name {
            Some(v.to_string())
        } else {
            None
        }
    })
}

fn key_matches(candidate: &str, config: &gw_config::SecurityConfig) -> bool {
    if let Some(expected) = &config.management_key
        && !expected.is_empty()
        && candidate == expected
    {
        return true;
    }
    if let Some(expected_hash) = &config.management_key_hash
        && !expected_hash.is_empty()
        && sticky_key_hash(candidate) == *expected_hash
    {
        return true;
    }
    false
}

/// Determines the caller's privilege from a verified management key. The
/// teacher has no read-only tier; this gateway's `security.read_only`
/// config flag demotes every accepted key to read-only rather than
/// introducing a second secret, since the spec names a single
/// `management_key`.
fn privilege_for(config: &gw_config::SecurityConfig) -> Privilege {
    if config.read_only {
        Privilege::ReadOnly
    } else {
        Privilege::Admin
    }
}

fn remote_allowed(headers: &HeaderMap, config: &gw_config::SecurityConfig, started_at: i64) -> bool {
    if config.allow_remote {
        return true;
    }
    if let Some(ttl) = config.remote_ttl_secs {
        let now = gw_common::now_unix();
        if now - started_at < ttl as i64 {
            return true;
        }
    }
    if !config.ip_allowlist.is_empty()
        && let Some(value) = headers.get("x-forwarded-for")
        && let Ok(s) = value.to_str()
        && let Some(first) = s.split(',').next()
    {
        let ip = first.trim();
        return config.ip_allowlist.iter().any(|allowed| allowed == ip);
    }
    config.ip_allowlist.is_empty()
}

/// Management-API auth middleware (spec §6.2), grounded on the teacher's
/// `admin_auth`: verifies the key, resolves privilege, and rejects write
/// methods (`POST`/`PUT`/`DELETE`/`PATCH`) from read-only callers.
pub async fn management_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let config = state.config.current();
    let security = &config.security;

    if !remote_allowed(&headers, security, state.started_at) {
        return Err(StatusCode::FORBIDDEN);
    }

    let query = request.uri().query();
    let key = extract_management_key(&headers, query).ok_or(StatusCode::UNAUTHORIZED)?;

    if security.management_key.is_none() && security.management_key_hash.is_none() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    if !key_matches(&key, security) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let privilege = privilege_for(security);
    if privilege == Privilege::ReadOnly && is_write_method(request.method()) {
        return Err(StatusCode::FORBIDDEN);
    }

    let mut request = request;
    request.extensions_mut().insert(privilege);
    Ok(next.run(request).await)
}

fn is_write_method(method: &axum::http::Method) -> bool {
    matches!(
        *method,
        axum::http::Method::POST
            | axum::http::Method::PUT
            | axum::http::Method::DELETE
            | axum::http::Method::PATCH
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_config::Config;

    #[test]
    fn empty_api_keys_means_open_gateway() {
        let config = Config::default();
        let headers = HeaderMap::new();
        assert!(check_client_key(&headers, None, &config));
    }

    #[test]
    fn bearer_token_must_match_configured_key() {
        let mut config = Config::default();
        config.upstream.api_keys = vec!["secret".to_string()];
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer secret".parse().unwrap());
        assert!(check_client_key(&headers, None, &config));

        let mut wrong = HeaderMap::new();
        wrong.insert(header::AUTHORIZATION, "Bearer nope".parse().unwrap());
        assert!(!check_client_key(&wrong, None, &config));
    }

    #[test]
    fn query_key_param_is_accepted() {
        let mut config = Config::default();
        config.upstream.api_keys = vec!["secret".to_string()];
        let headers = HeaderMap::new();
        assert!(check_client_key(&headers, Some("key=secret"), &config));
    }

    #[test]
    fn management_key_precedence_order() {
        let headers = HeaderMap::new();
        assert_eq!(extract_management_key(&headers, Some("key=q")), Some("q".to_string()));
    }

    #[test]
    fn mgmt_session_cookie_is_read() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "a=b; mgmt_session=xyz; c=d".parse().unwrap());
        assert_eq!(
            extract_management_key(&headers, None),
            Some("xyz".to_string())
        );
    }
}
