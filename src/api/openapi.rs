use super::handlers::{admin, auth, health};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

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
/// Routes added outside (like `/` or `OPTIONS /health`) are intentionally not documented.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Sign-in, registration, and edge validation".to_string());

    let mut passkeys_tag = Tag::new("passkeys");
    passkeys_tag.description = Some("WebAuthn ceremonies and credential management".to_string());

    let mut me_tag = Tag::new("me");
    me_tag.description = Some("Profile and app access for the signed-in user".to_string());

    let mut admin_tag = Tag::new("admin");
    admin_tag.description = Some("User, app, and request administration".to_string());

    let mut base = cargo_openapi();
    base.tags = Some(vec![auth_tag, passkeys_tag, me_tag, admin_tag]);

    // `routes!` reads #[utoipa::path] to bind HTTP method + path and add the route to OpenAPI.
    let router = OpenApiRouter::with_openapi(base)
        .routes(routes!(health::health))
        .routes(routes!(auth::register::register))
        .routes(routes!(auth::register::register_verify))
        .routes(routes!(auth::signin::signin))
        .routes(routes!(auth::signin::signin_verify))
        .routes(routes!(auth::session::signout))
        .routes(routes!(auth::validate::validate))
        .routes(routes!(auth::me::me, auth::me::delete_me))
        .routes(routes!(auth::me::my_apps))
        .routes(routes!(auth::me::request_access))
        .routes(routes!(auth::passkeys::register_options))
        .routes(routes!(auth::passkeys::register_verify))
        .routes(routes!(auth::passkeys::signin_options))
        .routes(routes!(auth::passkeys::signin_verify))
        .routes(routes!(auth::passkeys::list_passkeys))
        .routes(routes!(auth::passkeys::delete_passkey))
        .routes(routes!(admin::users::list_users, admin::users::create_user))
        .routes(routes!(admin::users::approve_user))
        .routes(routes!(admin::users::reject_user))
        .routes(routes!(admin::users::delete_user))
        .routes(routes!(admin::apps::list_apps, admin::apps::create_app))
        .routes(routes!(admin::apps::delete_app))
        .routes(routes!(admin::apps::list_app_users))
        .routes(routes!(admin::apps::grant_access))
        .routes(routes!(admin::apps::revoke_access))
        .routes(routes!(admin::requests::list_all_requests))
        .routes(routes!(admin::requests::list_app_requests))
        .routes(routes!(admin::requests::approve_request))
        .routes(routes!(admin::requests::reject_request));

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &str) -> Option<&str> {
    if value.is_empty() { None } else { Some(value) }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match (author.find('<'), author.rfind('>')) {
        (Some(start), Some(end)) if start < end => {
            let name = author[..start].trim();
            let email = author[start + 1..end].trim();
            (
                if name.is_empty() { None } else { Some(name) },
                if email.is_empty() { None } else { Some(email) },
            )
        }
        _ => {
            let name = author.trim();
            (if name.is_empty() { None } else { Some(name) }, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_has_core_paths() {
        let spec = openapi();
        let paths = &spec.paths.paths;
        for path in [
            "/health",
            "/auth/register",
            "/auth/register/verify",
            "/auth/signin",
            "/auth/signin/verify",
            "/auth/signout",
            "/auth/validate",
            "/auth/me",
            "/auth/me/apps",
            "/auth/me/apps/{slug}/request",
            "/auth/passkey/register/options",
            "/auth/passkey/signin/verify",
            "/admin/users",
            "/admin/apps",
            "/admin/apps/{slug}/grant",
            "/admin/apps/{slug}/requests/{id}/approve",
        ] {
            assert!(paths.contains_key(path), "missing path {path}");
        }
    }

    #[test]
    fn parse_author_variants() {
        assert_eq!(
            parse_author("Gatekeeper Team <team@example.com>"),
            (Some("Gatekeeper Team"), Some("team@example.com"))
        );
        assert_eq!(parse_author("Gatekeeper Team"), (Some("Gatekeeper Team"), None));
        assert_eq!(parse_author(""), (None, None));
    }
}
