use crate::{
    cli::globals::GlobalArgs,
    impersonation::ImpersonationService,
    rate_limit::{spawn_sweeper, RateLimiters, Verdict},
    rbac::PermissionResolver,
    session::SessionManager,
    token::TokenService,
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{MatchedPath, Request},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method,
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Extension,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;

pub(crate) mod error;
pub(crate) mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use error::ApiError;
pub use handlers::AppState;
pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: String, globals: &GlobalArgs) -> Result<()> {
    // Bounded pool with an acquire timeout so lookups fail closed instead of
    // hanging when the database is away.
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let tokens = Arc::new(TokenService::new(
        &globals.access_secret,
        &globals.refresh_secret,
    )?);
    let limiters = Arc::new(RateLimiters::default());
    let sweeper = spawn_sweeper(limiters.clone(), Duration::from_secs(60));

    let state = Arc::new(AppState {
        tokens: tokens.clone(),
        sessions: SessionManager::new(pool.clone(), tokens.clone()),
        resolver: PermissionResolver::new(pool.clone()),
        impersonation: ImpersonationService::new(pool.clone(), tokens),
        limiters,
    });

    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(Any);

    let (router, _openapi) = router().split_for_parts();
    let app = router.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors)
            .layer(Extension(state.clone()))
            .layer(Extension(pool.clone()))
            .layer(middleware::from_fn(global_rate_limit)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    sweeper.shutdown().await;

    Ok(())
}

/// Instance-wide sliding window per client address, checked before any
/// handler runs. Quota headers ride on every response, allowed or rejected.
async fn global_rate_limit(
    Extension(state): Extension<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = handlers::client_ip(request.headers()).unwrap_or_else(|| "unknown".to_string());
    let verdict = state.limiters.global.check(&ip);
    if verdict.allowed {
        with_quota_headers(next.run(request).await, &verdict)
    } else {
        ApiError::RateLimited(verdict).into_response()
    }
}

fn with_quota_headers(mut response: Response, verdict: &Verdict) -> Response {
    response
        .headers_mut()
        .extend(error::rate_limit_headers(verdict, false));
    response
}

fn make_span(request: &axum::http::Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use std::time::Duration;

    #[test]
    fn allowed_responses_carry_quota_headers() {
        let verdict = Verdict {
            allowed: true,
            limit: 300,
            remaining: 299,
            reset_after: Duration::from_secs(31),
            retry_after: None,
        };
        let response = with_quota_headers(StatusCode::NO_CONTENT.into_response(), &verdict);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        assert_eq!(header("x-ratelimit-limit").as_deref(), Some("300"));
        assert_eq!(header("x-ratelimit-remaining").as_deref(), Some("299"));
        assert_eq!(header("x-ratelimit-reset").as_deref(), Some("31"));
        assert_eq!(header("retry-after"), None);
    }
}
