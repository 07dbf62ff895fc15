//! Wire-contract tests against the assembled router.
//!
//! These drive real requests through the axum router with `oneshot`, covering
//! the paths that must refuse before any database work happens: the edge
//! validator without a cookie, authenticated endpoints without a session, and
//! input validation on the auth flows. The pool is lazy and never connects.

use anyhow::Result;
use axum::{
    Extension,
    body::Body,
    http::{Request, StatusCode, header},
};
use gatekeeper::api::{self, AuthConfig, AuthState};
use gatekeeper::webauthn::{PasskeyConfig, PasskeyService};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;

fn test_app() -> Result<axum::Router> {
    let config = AuthConfig::new("https://auth.example.com".to_string());
    let passkeys = PasskeyService::new(PasskeyConfig::new(
        "example.com".to_string(),
        "Example".to_string(),
        "https://example.com".to_string(),
        Duration::from_secs(120),
    )?)?;
    let auth_state = Arc::new(AuthState::new(config, passkeys));
    let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;

    let (router, _openapi) = api::router().split_for_parts();
    Ok(router
        .layer(Extension(auth_state))
        .layer(Extension(pool)))
}

#[tokio::test]
async fn validate_without_cookie_is_401() -> Result<()> {
    let app = test_app()?;
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/auth/validate")
                .header("X-GK-App", "docs")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get("x-auth-user").is_none());
    Ok(())
}

#[tokio::test]
async fn validate_head_request_also_401() -> Result<()> {
    let app = test_app()?;
    let response = app
        .oneshot(
            Request::builder()
                .method("HEAD")
                .uri("/auth/validate")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn register_rejects_invalid_email() -> Result<()> {
    let app = test_app()?;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/register")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"email":"not-an-email"}"#))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn signin_is_opaque_for_unknown_shapes() -> Result<()> {
    let app = test_app()?;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/signin")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"email":"not-an-email"}"#))?,
        )
        .await?;
    // Invalid addresses answer exactly like unknown accounts.
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn signout_always_clears_cookie() -> Result<()> {
    let app = test_app()?;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/signout")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .expect("signout must clear the cookie");
    assert!(cookie.starts_with("gk_session=;"));
    assert!(cookie.contains("Max-Age=0"));
    Ok(())
}

#[tokio::test]
async fn me_without_cookie_is_401() -> Result<()> {
    let app = test_app()?;
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/auth/me")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn admin_surface_without_cookie_is_401() -> Result<()> {
    for uri in ["/admin/users", "/admin/apps", "/admin/requests"] {
        let app = test_app()?;
        let response = app
            .oneshot(Request::builder().method("GET").uri(uri).body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
    }
    Ok(())
}

#[tokio::test]
async fn passkey_signin_verify_rejects_unknown_ceremony() -> Result<()> {
    let app = test_app()?;
    let body = serde_json::json!({
        "authentication_id": uuid::Uuid::new_v4().to_string(),
        "credential": {
            "id": "dummy",
            "rawId": "AA",
            "type": "public-key",
            "extensions": {},
            "response": {
                "authenticatorData": "AA",
                "clientDataJSON": "AA",
                "signature": "AA"
            }
        }
    });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/auth/passkey/signin/verify")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn unknown_route_is_404() -> Result<()> {
    let app = test_app()?;
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/definitely-not-a-route")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}
