use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::openapi::{Components, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

use super::handlers::{admin, auth, health, impersonate, navigation};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` spec.
pub(crate) fn api_router() -> OpenApiRouter {
    // `routes!` reads #[utoipa::path] to bind HTTP method + path and add the route to OpenAPI.
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::login))
        .routes(routes!(auth::refresh))
        .routes(routes!(auth::logout))
        .routes(routes!(auth::logout_all))
        .routes(routes!(auth::sessions))
        .routes(routes!(navigation::navigation))
        .routes(routes!(navigation::tenant_navigation))
        .routes(routes!(
            admin::put_role_override,
            admin::delete_role_override
        ))
        .routes(routes!(
            admin::put_user_override,
            admin::delete_user_override
        ))
        .routes(routes!(
            impersonate::start,
            impersonate::status,
            impersonate::end
        ));

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Login, refresh rotation and session management".to_string());

    let mut access_tag = Tag::new("access");
    access_tag.description = Some("Navigation resolution and override administration".to_string());

    let mut impersonation_tag = Tag::new("impersonation");
    impersonation_tag.description = Some("Time-boxed delegated sessions".to_string());

    router.get_openapi_mut().tags = Some(vec![
        auth_tag,
        access_tag,
        impersonation_tag,
        Tag::new("health"),
    ]);

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();
    info.license = cargo_license();

    let mut components = Components::new();
    components.add_security_scheme(
        "bearer",
        SecurityScheme::Http(
            HttpBuilder::new()
                .scheme(HttpAuthScheme::Bearer)
                .bearer_format("JWT")
                .build(),
        ),
    );

    OpenApiBuilder::new()
        .info(info)
        .components(Some(components))
        .build()
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));

        let license = spec.info.license;
        assert!(license.is_some());
        if let Some(license) = license {
            assert_eq!(license.name, "BSD-3-Clause");
        }
    }

    #[test]
    fn openapi_serializes_to_json() -> anyhow::Result<()> {
        let json = serde_json::to_string(&openapi())?;
        assert!(json.contains("/v1/auth/login"));
        assert!(json.contains("bearer"));
        Ok(())
    }

    #[test]
    fn openapi_tags_and_paths() {
        let spec = openapi();
        let tags = spec.tags.clone().unwrap_or_default();
        assert!(tags.iter().any(|tag| tag.name == "auth"));
        assert!(tags.iter().any(|tag| tag.name == "impersonation"));

        assert!(spec.paths.paths.contains_key("/v1/auth/login"));
        assert!(spec.paths.paths.contains_key("/v1/auth/refresh"));
        assert!(spec.paths.paths.contains_key("/v1/impersonation"));
        assert!(
            spec.paths
                .paths
                .contains_key("/v1/tenants/{tenant_id}/navigation")
        );
        assert!(
            spec.paths
                .paths
                .contains_key("/v1/tenants/{tenant_id}/roles/{slug}/navigation")
        );
        assert!(
            spec.paths
                .paths
                .contains_key("/v1/tenants/{tenant_id}/users/{user_id}/overrides")
        );
    }
}
