//! Admin app registry and grant management.

use anyhow::Context;
use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
};
use regex::Regex;
use serde_json::json;
use sqlx::PgPool;

use crate::access::{self, App};
use crate::api::email;
use crate::api::error::{ApiError, ErrorBody};

use super::storage;
use super::types::{AppCreate, AppRead, AppUserAccess, GrantAccess, RevokeQuery};
use crate::api::handlers::auth::session::require_admin;
use crate::api::handlers::auth::storage as user_storage;
use crate::api::handlers::auth::types::MessageResponse;
use crate::api::handlers::auth::utils::{normalize_email, valid_email};

fn valid_slug(slug: &str) -> bool {
    Regex::new(r"^[a-z0-9][a-z0-9-]{0,99}$").is_ok_and(|regex| regex.is_match(slug))
}

fn app_read(app: &App) -> AppRead {
    AppRead {
        id: app.id.to_string(),
        slug: app.slug.clone(),
        name: app.name.clone(),
        is_public: app.is_public,
        description: app.description.clone(),
        app_url: app.app_url.clone(),
        created_at: app.created_at,
    }
}

pub(super) async fn require_app(pool: &PgPool, slug: &str) -> Result<App, ApiError> {
    access::lookup_app(pool, slug)
        .await
        .map_err(|err| ApiError::internal(&err))?
        .ok_or_else(|| ApiError::not_found(format!("App '{slug}' not found")))
}

#[utoipa::path(
    get,
    path = "/admin/apps",
    responses(
        (status = 200, description = "Registered apps", body = [AppRead]),
        (status = 403, description = "Admin access required", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn list_apps(
    headers: HeaderMap,
    pool: Extension<PgPool>,
) -> Result<Json<Vec<AppRead>>, ApiError> {
    require_admin(&headers, &pool).await?;

    let apps = storage::list_apps(&pool)
        .await
        .map_err(|err| ApiError::internal(&err))?;
    Ok(Json(apps.iter().map(app_read).collect()))
}

#[utoipa::path(
    post,
    path = "/admin/apps",
    request_body = AppCreate,
    responses(
        (status = 201, description = "App created", body = AppRead),
        (status = 400, description = "Invalid or duplicate slug", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn create_app(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Json(payload): Json<AppCreate>,
) -> Result<(StatusCode, Json<AppRead>), ApiError> {
    require_admin(&headers, &pool).await?;

    let slug = payload.slug.trim().to_lowercase();
    if !valid_slug(&slug) {
        return Err(ApiError::bad_request(
            "Slug must be lowercase letters, digits, and dashes",
        ));
    }
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Name must not be empty"));
    }

    let app = storage::create_app(
        &pool,
        &slug,
        name,
        payload.is_public,
        payload.description.as_deref(),
        payload.app_url.as_deref(),
    )
    .await
    .map_err(|err| ApiError::internal(&err))?
    .ok_or_else(|| ApiError::bad_request(format!("App with slug '{slug}' already exists")))?;

    Ok((StatusCode::CREATED, Json(app_read(&app))))
}

#[utoipa::path(
    delete,
    path = "/admin/apps/{slug}",
    params(("slug" = String, Path, description = "App slug")),
    responses(
        (status = 200, description = "App deleted", body = MessageResponse),
        (status = 404, description = "App not found", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn delete_app(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Path(slug): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    require_admin(&headers, &pool).await?;

    let deleted = storage::delete_app(&pool, &slug)
        .await
        .map_err(|err| ApiError::internal(&err))?;
    if !deleted {
        return Err(ApiError::not_found(format!("App '{slug}' not found")));
    }

    Ok(Json(MessageResponse::new(format!(
        "App '{slug}' deleted successfully"
    ))))
}

#[utoipa::path(
    get,
    path = "/admin/apps/{slug}/users",
    params(("slug" = String, Path, description = "App slug")),
    responses(
        (status = 200, description = "Users with access", body = [AppUserAccess]),
        (status = 404, description = "App not found", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn list_app_users(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Path(slug): Path<String>,
) -> Result<Json<Vec<AppUserAccess>>, ApiError> {
    require_admin(&headers, &pool).await?;

    let app = require_app(&pool, &slug).await?;
    let users = storage::app_users(&pool, app.id)
        .await
        .map_err(|err| ApiError::internal(&err))?;
    Ok(Json(users))
}

#[utoipa::path(
    post,
    path = "/admin/apps/{slug}/grant",
    params(("slug" = String, Path, description = "App slug")),
    request_body = GrantAccess,
    responses(
        (status = 200, description = "Access granted or role updated", body = MessageResponse),
        (status = 404, description = "App or user not found", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn grant_access(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Path(slug): Path<String>,
    Json(payload): Json<GrantAccess>,
) -> Result<Json<MessageResponse>, ApiError> {
    let admin = require_admin(&headers, &pool).await?;

    let app = require_app(&pool, &slug).await?;

    let email = normalize_email(&payload.email);
    if !valid_email(&email) {
        return Err(ApiError::bad_request("Invalid email address"));
    }
    let user = user_storage::lookup_user_by_email(&pool, &email)
        .await
        .map_err(|err| ApiError::internal(&err))?
        .ok_or_else(|| ApiError::not_found(format!("User '{email}' not found")))?;

    let role = payload
        .role
        .as_deref()
        .map(str::trim)
        .filter(|role| !role.is_empty());

    access::grant(&pool, user.id, app.id, role, &admin.email)
        .await
        .map_err(|err| ApiError::internal(&err))?;

    send_grant_notice(&pool, &user.email, &app, &admin.email)
        .await
        .map_err(|err| ApiError::internal(&err))?;

    let role_msg = role.map(|r| format!(" with role '{r}'")).unwrap_or_default();
    Ok(Json(MessageResponse::new(format!(
        "Granted access to '{slug}' for '{email}'{role_msg}"
    ))))
}

#[utoipa::path(
    delete,
    path = "/admin/apps/{slug}/revoke",
    params(
        ("slug" = String, Path, description = "App slug"),
        ("email" = String, Query, description = "User to revoke")
    ),
    responses(
        (status = 200, description = "Access revoked (no-op when absent)", body = MessageResponse),
        (status = 404, description = "App or user not found", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn revoke_access(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Path(slug): Path<String>,
    Query(query): Query<RevokeQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    require_admin(&headers, &pool).await?;

    let app = require_app(&pool, &slug).await?;

    let email = normalize_email(&query.email);
    let user = user_storage::lookup_user_by_email(&pool, &email)
        .await
        .map_err(|err| ApiError::internal(&err))?
        .ok_or_else(|| ApiError::not_found(format!("User '{email}' not found")))?;

    access::revoke(&pool, user.id, app.id)
        .await
        .map_err(|err| ApiError::internal(&err))?;

    Ok(Json(MessageResponse::new(format!(
        "Revoked access to '{slug}' for '{email}'"
    ))))
}

pub(super) async fn send_grant_notice(
    pool: &PgPool,
    to_email: &str,
    app: &App,
    granted_by: &str,
) -> anyhow::Result<()> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to begin notification transaction")?;
    email::enqueue(
        &mut tx,
        to_email,
        "access_granted",
        &json!({
            "app_name": app.name,
            "app_url": app.app_url,
            "granted_by": granted_by,
        }),
    )
    .await?;
    tx.commit()
        .await
        .context("failed to commit notification transaction")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::lazy_pool;

    #[test]
    fn slug_validation() {
        assert!(valid_slug("docs"));
        assert!(valid_slug("team-wiki-2"));
        assert!(!valid_slug("Docs"));
        assert!(!valid_slug("-docs"));
        assert!(!valid_slug("docs wiki"));
        assert!(!valid_slug(""));
    }

    #[tokio::test]
    async fn list_apps_requires_session() -> anyhow::Result<()> {
        let pool = lazy_pool()?;
        let result = list_apps(HeaderMap::new(), Extension(pool)).await;
        let err = result.err().expect("missing session must fail");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
