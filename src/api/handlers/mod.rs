//! HTTP handlers and the shared state they run against.

use std::sync::Arc;

use axum::http::HeaderMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::impersonation::ImpersonationService;
use crate::rate_limit::RateLimiters;
use crate::rbac::PermissionResolver;
use crate::session::SessionManager;
use crate::token::TokenService;

pub(crate) mod admin;
pub(crate) mod auth;
pub(crate) mod health;
pub(crate) mod impersonate;
pub(crate) mod navigation;
pub(crate) mod principal;

/// Everything a handler needs, wired once at startup.
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub sessions: SessionManager,
    pub resolver: PermissionResolver,
    pub impersonation: ImpersonationService,
    pub limiters: Arc<RateLimiters>,
}

/// Normalize an email for lookup.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// Compiled once; login sits on the hot path. A pattern that fails to compile
// rejects every email rather than panicking.
static EMAIL_REGEX: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    EMAIL_REGEX
        .as_ref()
        .is_some_and(|regex| regex.is_match(email_normalized))
}

/// Pull the token out of a standard `Authorization: Bearer ...` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Best-effort client address for rate-limit keys and session metadata.
/// Trusts the first `x-forwarded-for` entry, then `x-real-ip`.
pub(crate) fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn email_regex_compiles() {
        assert!(EMAIL_REGEX.is_some());
    }

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Basic abc"),
        );
        assert_eq!(bearer_token(&headers), None);

        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer "),
        );
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn client_ip_prefers_first_forwarded_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.1"));
        assert_eq!(client_ip(&headers), Some("203.0.113.7".to_string()));

        headers.remove("x-forwarded-for");
        assert_eq!(client_ip(&headers), Some("198.51.100.1".to_string()));

        headers.remove("x-real-ip");
        assert_eq!(client_ip(&headers), None);
    }
}
