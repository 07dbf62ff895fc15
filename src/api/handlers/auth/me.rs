//! Endpoints for the signed-in user: profile, visible apps, access requests,
//! account deletion.

use anyhow::Context;
use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, header::SET_COOKIE},
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgPool, Row};
use tracing::Instrument;

use crate::access;
use crate::api::email;
use crate::api::error::{ApiError, ErrorBody};

use super::session::{clear_session_cookie, require_user};
use super::state::SharedAuthState;
use super::storage;
use super::types::{AccessRequestCreate, MessageResponse, UserResponse, VisibleApp};

#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current user profile", body = UserResponse),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    tag = "me"
)]
pub async fn me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = require_user(&headers, &pool).await?;
    let record = storage::lookup_user_by_id(&pool, user.user_id)
        .await
        .map_err(|err| ApiError::internal(&err))?
        .ok_or_else(ApiError::unauthenticated)?;
    Ok(Json(record.to_response()))
}

#[utoipa::path(
    delete,
    path = "/auth/me",
    responses(
        (status = 200, description = "Account deleted", body = MessageResponse),
        (status = 400, description = "Seeded accounts cannot be deleted", body = ErrorBody),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    tag = "me"
)]
pub async fn delete_me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<SharedAuthState>,
) -> Result<impl IntoResponse, ApiError> {
    let user = require_user(&headers, &pool).await?;

    if user.is_seeded {
        return Err(ApiError::bad_request("Cannot delete seeded admin account."));
    }

    // Sessions, passkeys, grants, and requests cascade with the row.
    storage::delete_user(&pool, user.user_id)
        .await
        .map_err(|err| ApiError::internal(&err))?;

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    Ok((
        response_headers,
        Json(MessageResponse::new("Account deleted successfully")),
    ))
}

#[utoipa::path(
    get,
    path = "/auth/me/apps",
    responses(
        (status = 200, description = "Apps visible to the user", body = [VisibleApp]),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    tag = "me"
)]
pub async fn my_apps(
    headers: HeaderMap,
    pool: Extension<PgPool>,
) -> Result<Json<Vec<VisibleApp>>, ApiError> {
    let user = require_user(&headers, &pool).await?;

    // Public apps and granted apps in one pass; a grant on a public app
    // collapses into a single row with its role hint.
    let query = r"
        SELECT apps.slug, apps.name, apps.description, apps.app_url,
               app_access.role, app_access.granted_at,
               (app_access.user_id IS NOT NULL) AS granted
        FROM apps
        LEFT JOIN app_access
               ON app_access.app_id = apps.id AND app_access.user_id = $1
        WHERE apps.is_public = TRUE OR app_access.user_id IS NOT NULL
        ORDER BY apps.name ASC
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(user.user_id)
        .fetch_all(&pool.0)
        .instrument(span)
        .await
        .context("failed to list visible apps")
        .map_err(|err| ApiError::internal(&err))?;

    let apps = rows
        .into_iter()
        .map(|row| -> anyhow::Result<VisibleApp> {
            Ok(VisibleApp {
                slug: row.try_get("slug")?,
                name: row.try_get("name")?,
                description: row.try_get("description")?,
                app_url: row.try_get("app_url")?,
                granted: row.try_get("granted")?,
                role: row.try_get("role")?,
                granted_at: row.try_get("granted_at")?,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(|err| ApiError::internal(&err))?;

    Ok(Json(apps))
}

#[utoipa::path(
    post,
    path = "/auth/me/apps/{slug}/request",
    params(
        ("slug" = String, Path, description = "App slug")
    ),
    request_body = AccessRequestCreate,
    responses(
        (status = 200, description = "Access request filed", body = MessageResponse),
        (status = 404, description = "App not found", body = ErrorBody),
        (status = 409, description = "Already granted or already pending", body = ErrorBody)
    ),
    tag = "me"
)]
pub async fn request_access(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Path(slug): Path<String>,
    payload: Option<Json<AccessRequestCreate>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user = require_user(&headers, &pool).await?;

    let app = access::lookup_app(&pool, &slug)
        .await
        .map_err(|err| ApiError::internal(&err))?
        .ok_or_else(|| ApiError::not_found("App not found."))?;

    let existing = access::check_access(&pool, user.user_id, app.id)
        .await
        .map_err(|err| ApiError::internal(&err))?;
    if existing.is_some() {
        return Err(ApiError::conflict(
            "access_already_granted",
            "You already have access to this app.",
        ));
    }

    let message = payload
        .and_then(|Json(request)| request.message)
        .map(|message| message.trim().to_string())
        .filter(|message| !message.is_empty());

    access::request_access(&pool, user.user_id, app.id, message.as_deref()).await?;

    notify_admins_of_request(&pool, &user.email, &app.name, message.as_deref())
        .await
        .map_err(|err| ApiError::internal(&err))?;

    Ok(Json(
        MessageResponse::new("Access request submitted")
            .with_detail("Your request is pending admin review."),
    ))
}

/// Queue a notice to every admin who opted into access-request email.
async fn notify_admins_of_request(
    pool: &PgPool,
    requester_email: &str,
    app_name: &str,
    message: Option<&str>,
) -> anyhow::Result<()> {
    let admins = storage::admin_emails(pool, true).await?;
    if admins.is_empty() {
        return Ok(());
    }

    let mut tx = pool
        .begin()
        .await
        .context("failed to begin notification transaction")?;
    for admin in admins {
        email::enqueue(
            &mut tx,
            &admin,
            "admin_access_request",
            &json!({
                "requester_email": requester_email,
                "app_name": app_name,
                "message": message,
            }),
        )
        .await?;
    }
    tx.commit()
        .await
        .context("failed to commit notification transaction")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::lazy_pool;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn me_requires_session() -> anyhow::Result<()> {
        let pool = lazy_pool()?;
        let result = me(HeaderMap::new(), Extension(pool)).await;
        let err = result.err().expect("missing session must fail");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn request_access_requires_session() -> anyhow::Result<()> {
        let pool = lazy_pool()?;
        let result = request_access(
            HeaderMap::new(),
            Extension(pool),
            Path("docs".to_string()),
            None,
        )
        .await;
        let err = result.err().expect("missing session must fail");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
