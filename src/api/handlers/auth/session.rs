//! Session cookie plumbing, principal resolution, and sign-out.

use axum::{
    Json,
    extract::Extension,
    http::{
        HeaderMap, HeaderValue,
        header::{AUTHORIZATION, InvalidHeaderValue, SET_COOKIE},
    },
    response::IntoResponse,
};
use sqlx::PgPool;

use crate::api::error::ApiError;
use crate::session::{self, SessionError, SessionUser};

use super::state::{AuthConfig, SharedAuthState};
use super::types::MessageResponse;

pub(crate) const SESSION_COOKIE_NAME: &str = "gk_session";

/// Build the `Set-Cookie` header for a fresh session token.
///
/// Scoped to the shared parent domain when one is configured, so a single
/// sign-in covers every application subdomain.
pub(crate) fn session_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = config.session_expiry_days() * 24 * 60 * 60;
    let mut cookie =
        format!("{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if let Some(domain) = config.cookie_domain() {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if let Some(domain) = config.cookie_domain() {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Pull the session token from the cookie, or a bearer header for API callers.
pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Resolve the request's session to a user, if any.
///
/// Missing, expired, and not-approved sessions all collapse to `None`; only
/// store failures surface as errors.
pub(crate) async fn current_user_optional(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<Option<SessionUser>, ApiError> {
    let Some(token) = extract_session_token(headers) else {
        return Ok(None);
    };
    match session::validate(pool, &token).await {
        Ok(user) => Ok(Some(user)),
        Err(
            SessionError::NotFound | SessionError::Expired | SessionError::AccountNotApproved,
        ) => Ok(None),
        Err(SessionError::Store(err)) => Err(ApiError::internal(&err)),
    }
}

/// Resolve the session or fail with 401.
pub(crate) async fn require_user(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<SessionUser, ApiError> {
    current_user_optional(headers, pool)
        .await?
        .ok_or_else(ApiError::unauthenticated)
}

/// Resolve the session and require the admin flag.
pub(crate) async fn require_admin(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<SessionUser, ApiError> {
    let user = require_user(headers, pool).await?;
    if user.is_admin {
        Ok(user)
    } else {
        Err(ApiError::forbidden("admin_required", "Admin access required"))
    }
}

#[utoipa::path(
    post,
    path = "/auth/signout",
    responses(
        (status = 200, description = "Session revoked and cookie cleared", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn signout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<SharedAuthState>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(token) = extract_session_token(&headers) {
        session::revoke(&pool, &token)
            .await
            .map_err(|err| ApiError::internal(&err))?;
    }

    // Always clear the cookie, even if there was no session record.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    Ok((
        response_headers,
        Json(MessageResponse::new("Successfully signed out")),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::state::AuthConfig;

    fn config() -> AuthConfig {
        AuthConfig::new("https://auth.example.com".to_string())
            .with_cookie_domain(Some(".example.com".to_string()))
    }

    #[test]
    fn session_cookie_carries_domain_and_secure() {
        let header = session_cookie(&config(), "tok").expect("cookie header");
        let value = header.to_str().expect("ascii");
        assert!(value.starts_with("gk_session=tok;"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Lax"));
        assert!(value.contains("Domain=.example.com"));
        assert!(value.contains("Secure"));
        assert!(value.contains("Max-Age=2592000"));
    }

    #[test]
    fn insecure_app_url_omits_secure_flag() {
        let config = AuthConfig::new("http://localhost:8080".to_string());
        let header = session_cookie(&config, "tok").expect("cookie header");
        let value = header.to_str().expect("ascii");
        assert!(!value.contains("Secure"));
        assert!(!value.contains("Domain="));
    }

    #[test]
    fn clear_cookie_zeroes_max_age() {
        let header = clear_session_cookie(&config()).expect("cookie header");
        let value = header.to_str().expect("ascii");
        assert!(value.contains("Max-Age=0"));
        assert!(value.starts_with("gk_session=;"));
    }

    #[test]
    fn extract_token_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("other=1; gk_session=abc123; theme=dark"),
        );
        assert_eq!(extract_session_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn extract_token_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok-1"));
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("gk_session=tok-2"),
        );
        assert_eq!(extract_session_token(&headers), Some("tok-1".to_string()));
    }

    #[test]
    fn extract_token_none_when_absent() {
        let headers = HeaderMap::new();
        assert_eq!(extract_session_token(&headers), None);
    }
}
