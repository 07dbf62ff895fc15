//! Edge validation for the reverse proxy's `auth_request` sub-request.
//!
//! Every protected request to every downstream application lands here first,
//! so this handler stays read-only (the one write is the expired-session
//! delete inside session validation) and collapses every failure into two
//! observable outcomes: 401 (no usable session) or 403 (no access). The
//! proxy forwards `X-Auth-User` / `X-Auth-Role` to the application on 200.

use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use tracing::debug;

use crate::access;
use crate::api::error::ApiError;
use crate::session::SessionUser;

use super::session::current_user_optional;
use super::state::{DefaultAppAccess, SharedAuthState};

pub(crate) const APP_HEADER: &str = "x-gk-app";
pub(crate) const USER_HEADER: &str = "x-auth-user";
pub(crate) const NAME_HEADER: &str = "x-auth-name";
pub(crate) const ROLE_HEADER: &str = "x-auth-role";

/// How the requested app resolved against the store, from the caller's view.
#[derive(Debug)]
pub(crate) enum AppResolution<'a> {
    /// No `X-GK-App` header: pure identity check.
    NotRequested,
    /// Header named a slug with no app row behind it.
    Unregistered,
    /// App exists and the user holds a grant (with its role hint).
    Granted(Option<&'a str>),
    /// App exists, no grant.
    NotGranted,
}

/// The three observable outcomes of edge validation.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Decision {
    Unauthenticated,
    Forbidden,
    Authorized {
        email: String,
        name: Option<String>,
        role: Option<String>,
    },
}

/// Pure decision over already-fetched rows; the handler only does the I/O.
pub(crate) fn decide(
    user: Option<&SessionUser>,
    app: &AppResolution<'_>,
    default_policy: DefaultAppAccess,
) -> Decision {
    let Some(user) = user else {
        return Decision::Unauthenticated;
    };

    let authorized = |role: Option<String>| Decision::Authorized {
        email: user.email.clone(),
        name: user.name.clone(),
        role,
    };

    match app {
        AppResolution::NotRequested => authorized(None),
        // Admins reach every app.
        _ if user.is_admin => authorized(Some("admin".to_string())),
        AppResolution::Unregistered => match default_policy {
            DefaultAppAccess::Allow => authorized(None),
            DefaultAppAccess::Deny => Decision::Forbidden,
        },
        AppResolution::Granted(role) => authorized(role.map(ToString::to_string)),
        AppResolution::NotGranted => Decision::Forbidden,
    }
}

fn decision_response(decision: Decision) -> Response {
    match decision {
        Decision::Unauthenticated => StatusCode::UNAUTHORIZED.into_response(),
        Decision::Forbidden => StatusCode::FORBIDDEN.into_response(),
        Decision::Authorized { email, name, role } => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(&email) {
                headers.insert(USER_HEADER, value);
            }
            if let Some(value) = name.as_deref().and_then(|n| HeaderValue::from_str(n).ok()) {
                headers.insert(NAME_HEADER, value);
            }
            if let Some(value) = role.as_deref().and_then(|r| HeaderValue::from_str(r).ok()) {
                headers.insert(ROLE_HEADER, value);
            }
            (StatusCode::OK, headers).into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/auth/validate",
    params(
        ("X-GK-App" = Option<String>, Header, description = "Slug of the app being reached")
    ),
    responses(
        (status = 200, description = "Authorized; identity forwarded via X-Auth-* headers"),
        (status = 401, description = "No usable session"),
        (status = 403, description = "No access to this app")
    ),
    tag = "auth"
)]
pub async fn validate(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<SharedAuthState>,
) -> Result<Response, ApiError> {
    let user = current_user_optional(&headers, &pool).await?;

    let slug = headers
        .get(APP_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|slug| !slug.is_empty());

    let Some(user) = user else {
        debug!(app = slug.unwrap_or("-"), "edge validation: no session");
        return Ok(decision_response(Decision::Unauthenticated));
    };

    let resolution = match slug {
        None => AppResolution::NotRequested,
        Some(slug) if user.is_admin => {
            // Admin bypass: no grant lookup needed, but log which app.
            debug!(app = slug, user = %user.email, "edge validation: admin bypass");
            AppResolution::Unregistered // decide() short-circuits on is_admin
        }
        Some(slug) => {
            let app = access::lookup_app(&pool, slug)
                .await
                .map_err(|err| ApiError::internal(&err))?;
            match app {
                None => AppResolution::Unregistered,
                Some(app) => {
                    let grant = access::check_access(&pool, user.user_id, app.id)
                        .await
                        .map_err(|err| ApiError::internal(&err))?;
                    match grant {
                        // Role hints are owned strings; move them into the decision.
                        Some(info) => {
                            let decision = decide(
                                Some(&user),
                                &AppResolution::Granted(info.role.as_deref()),
                                auth_state.config().default_app_access(),
                            );
                            return Ok(decision_response(decision));
                        }
                        None => AppResolution::NotGranted,
                    }
                }
            }
        }
    };

    let decision = decide(
        Some(&user),
        &resolution,
        auth_state.config().default_app_access(),
    );
    Ok(decision_response(decision))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user(is_admin: bool) -> SessionUser {
        SessionUser {
            user_id: Uuid::nil(),
            email: "alice@example.com".to_string(),
            name: Some("Alice".to_string()),
            is_admin,
            is_seeded: false,
            notify_access_requests: false,
        }
    }

    #[test]
    fn no_session_is_unauthenticated() {
        let decision = decide(None, &AppResolution::NotRequested, DefaultAppAccess::Allow);
        assert_eq!(decision, Decision::Unauthenticated);

        let decision = decide(
            None,
            &AppResolution::Granted(Some("editor")),
            DefaultAppAccess::Allow,
        );
        assert_eq!(decision, Decision::Unauthenticated);
    }

    #[test]
    fn identity_check_without_app_header() {
        let user = user(false);
        let decision = decide(
            Some(&user),
            &AppResolution::NotRequested,
            DefaultAppAccess::Deny,
        );
        assert_eq!(
            decision,
            Decision::Authorized {
                email: "alice@example.com".to_string(),
                name: Some("Alice".to_string()),
                role: None,
            }
        );
    }

    #[test]
    fn grant_present_authorizes_with_role() {
        let user = user(false);
        let decision = decide(
            Some(&user),
            &AppResolution::Granted(Some("editor")),
            DefaultAppAccess::Deny,
        );
        assert_eq!(
            decision,
            Decision::Authorized {
                email: "alice@example.com".to_string(),
                name: Some("Alice".to_string()),
                role: Some("editor".to_string()),
            }
        );
    }

    #[test]
    fn missing_grant_is_forbidden() {
        let user = user(false);
        let decision = decide(
            Some(&user),
            &AppResolution::NotGranted,
            DefaultAppAccess::Allow,
        );
        assert_eq!(decision, Decision::Forbidden);
    }

    #[test]
    fn unregistered_app_follows_policy() {
        let user = user(false);
        let allowed = decide(
            Some(&user),
            &AppResolution::Unregistered,
            DefaultAppAccess::Allow,
        );
        assert!(matches!(allowed, Decision::Authorized { role: None, .. }));

        let denied = decide(
            Some(&user),
            &AppResolution::Unregistered,
            DefaultAppAccess::Deny,
        );
        assert_eq!(denied, Decision::Forbidden);
    }

    #[test]
    fn admins_reach_everything() {
        let admin = user(true);
        for resolution in [
            AppResolution::Unregistered,
            AppResolution::NotGranted,
            AppResolution::Granted(None),
        ] {
            let decision = decide(Some(&admin), &resolution, DefaultAppAccess::Deny);
            assert!(
                matches!(&decision, Decision::Authorized { role: Some(role), .. } if role == "admin"),
                "admin should pass {resolution:?}, got {decision:?}"
            );
        }
    }

    #[test]
    fn authorized_response_carries_headers() {
        let response = decision_response(Decision::Authorized {
            email: "alice@example.com".to_string(),
            name: Some("Alice".to_string()),
            role: Some("editor".to_string()),
        });
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers.get(USER_HEADER).and_then(|v| v.to_str().ok()),
            Some("alice@example.com")
        );
        assert_eq!(
            headers.get(NAME_HEADER).and_then(|v| v.to_str().ok()),
            Some("Alice")
        );
        assert_eq!(
            headers.get(ROLE_HEADER).and_then(|v| v.to_str().ok()),
            Some("editor")
        );
    }

    #[test]
    fn refusals_have_empty_bodies_and_no_identity_headers() {
        let unauthorized = decision_response(Decision::Unauthenticated);
        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert!(unauthorized.headers().get(USER_HEADER).is_none());

        let forbidden = decision_response(Decision::Forbidden);
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
        assert!(forbidden.headers().get(USER_HEADER).is_none());
    }
}
