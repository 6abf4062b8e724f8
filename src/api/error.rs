//! HTTP error taxonomy.
//!
//! Every expected failure maps to one of these variants; handlers never leak
//! store or token internals. Authentication failures are deliberately uniform
//! so callers cannot distinguish a forged token from an expired one or probe
//! which accounts exist.

use axum::{
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

use crate::impersonation::ImpersonationError;
use crate::rate_limit::Verdict;

/// Wire shape for every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing, malformed, expired or signature-invalid token; revoked or
    /// expired session. Always the same body, whatever the cause.
    #[error("unauthenticated")]
    Unauthenticated,
    /// Valid identity, insufficient rights. May name the missing permission.
    #[error("forbidden")]
    Forbidden(Option<String>),
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict(String),
    #[error("bad request")]
    BadRequest(String),
    #[error("rate limited")]
    RateLimited(Verdict),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthenticated => error_response(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "Authentication required",
            ),
            Self::Forbidden(permission) => {
                let message = permission.map_or_else(
                    || "Insufficient permissions".to_string(),
                    |permission| format!("Missing permission: {permission}"),
                );
                error_response(StatusCode::FORBIDDEN, "forbidden", &message)
            }
            Self::NotFound => error_response(StatusCode::NOT_FOUND, "not_found", "Not found"),
            Self::Conflict(message) => error_response(StatusCode::CONFLICT, "conflict", &message),
            Self::BadRequest(message) => {
                error_response(StatusCode::BAD_REQUEST, "bad_request", &message)
            }
            Self::RateLimited(verdict) => {
                let mut response = error_response(
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate_limited",
                    "Too many requests",
                );
                response
                    .headers_mut()
                    .extend(rate_limit_headers(&verdict, true));
                response
            }
            Self::Internal(err) => {
                // Full detail stays server-side.
                error!("internal error: {err:#}");
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal server error",
                )
            }
        }
    }
}

impl From<ImpersonationError> for ApiError {
    fn from(err: ImpersonationError) -> Self {
        match err {
            ImpersonationError::NotPermitted => {
                Self::Forbidden(Some(crate::rbac::IMPERSONATE_PERMISSION.to_string()))
            }
            ImpersonationError::InvalidDuration => Self::BadRequest(err.to_string()),
            ImpersonationError::TargetNotFound => Self::NotFound,
            ImpersonationError::Nested => Self::Conflict(err.to_string()),
            ImpersonationError::Internal(inner) => Self::Internal(inner),
        }
    }
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: code.to_string(),
            message: message.to_string(),
        }),
    )
        .into_response()
}

/// Quota headers attached to every response on a rate-limited route, plus a
/// retry hint when the request was rejected.
#[must_use]
pub fn rate_limit_headers(verdict: &Verdict, rejected: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let entries = [
        ("x-ratelimit-limit", u64::from(verdict.limit)),
        ("x-ratelimit-remaining", u64::from(verdict.remaining)),
        ("x-ratelimit-reset", verdict.reset_after.as_secs()),
    ];
    for (name, value) in entries {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            headers.insert(HeaderName::from_static(name), value);
        }
    }
    if rejected {
        let retry = verdict.retry_after.map_or(1, |wait| wait.as_secs().max(1));
        if let Ok(value) = HeaderValue::from_str(&retry.to_string()) {
            headers.insert(RETRY_AFTER, value);
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn unauthenticated_is_uniform_401() {
        let response = ApiError::Unauthenticated.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn forbidden_names_the_missing_permission() {
        let response = ApiError::Forbidden(Some("users.impersonate".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let verdict = Verdict {
            allowed: false,
            limit: 10,
            remaining: 0,
            reset_after: Duration::from_secs(42),
            retry_after: Some(Duration::from_secs(42)),
        };
        let response = ApiError::RateLimited(verdict).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|val| val.to_str().ok()),
            Some("42")
        );
        assert_eq!(
            response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|val| val.to_str().ok()),
            Some("0")
        );
    }

    #[test]
    fn impersonation_errors_map_to_taxonomy() {
        assert_eq!(
            ApiError::from(ImpersonationError::TargetNotFound)
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(ImpersonationError::InvalidDuration)
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ImpersonationError::Nested)
                .into_response()
                .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(ImpersonationError::NotPermitted)
                .into_response()
                .status(),
            StatusCode::FORBIDDEN
        );
    }
}
