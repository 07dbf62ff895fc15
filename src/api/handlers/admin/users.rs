//! Admin user lifecycle: listing, direct creation, approval, rejection,
//! deletion.

use anyhow::Context;
use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::HeaderMap,
};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::api::email;
use crate::api::error::{ApiError, ErrorBody};
use crate::session;

use super::storage::{self, StatusUpdate};
use super::types::{AdminCreateUser, StatusFilter};
use crate::api::handlers::auth::session::require_admin;
use crate::api::handlers::auth::storage::{
    self as user_storage, CreateUserOutcome, STATUS_APPROVED, STATUS_PENDING, STATUS_REJECTED,
};
use crate::api::handlers::auth::types::{MessageResponse, UserResponse};
use crate::api::handlers::auth::utils::{normalize_email, valid_email};

#[utoipa::path(
    get,
    path = "/admin/users",
    params(
        ("status" = Option<String>, Query, description = "Filter by lifecycle status")
    ),
    responses(
        (status = 200, description = "Users", body = [UserResponse]),
        (status = 403, description = "Admin access required", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn list_users(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Query(filter): Query<StatusFilter>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    require_admin(&headers, &pool).await?;

    let status = match filter.status.as_deref() {
        None => None,
        Some(status @ ("pending" | "approved" | "rejected")) => Some(status),
        Some(_) => return Err(ApiError::bad_request("Unknown status filter")),
    };

    let users = storage::list_users(&pool, status)
        .await
        .map_err(|err| ApiError::internal(&err))?;
    Ok(Json(users.iter().map(|user| user.to_response()).collect()))
}

#[utoipa::path(
    post,
    path = "/admin/users",
    request_body = AdminCreateUser,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Email already registered", body = ErrorBody),
        (status = 403, description = "Admin access required", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn create_user(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Json(payload): Json<AdminCreateUser>,
) -> Result<(axum::http::StatusCode, Json<UserResponse>), ApiError> {
    require_admin(&headers, &pool).await?;

    let email = normalize_email(&payload.email);
    if !valid_email(&email) {
        return Err(ApiError::bad_request("Invalid email address"));
    }

    let status = if payload.auto_approve {
        STATUS_APPROVED
    } else {
        STATUS_PENDING
    };
    let user = match user_storage::create_user(&pool, &email, status, payload.is_admin)
        .await
        .map_err(|err| ApiError::internal(&err))?
    {
        CreateUserOutcome::Created(user) => user,
        CreateUserOutcome::EmailTaken => {
            return Err(ApiError::bad_request("Email already registered"));
        }
    };

    Ok((axum::http::StatusCode::CREATED, Json(user.to_response())))
}

#[utoipa::path(
    post,
    path = "/admin/users/{id}/approve",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "User approved", body = UserResponse),
        (status = 400, description = "User is not pending", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn approve_user(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserResponse>, ApiError> {
    require_admin(&headers, &pool).await?;

    let user = match storage::transition_pending_user(&pool, user_id, STATUS_APPROVED)
        .await
        .map_err(|err| ApiError::internal(&err))?
    {
        StatusUpdate::Updated(user) => user,
        StatusUpdate::NotPending(current) => {
            return Err(ApiError::bad_request(format!(
                "User is already {current}"
            )));
        }
        StatusUpdate::NotFound => return Err(ApiError::not_found("User not found")),
    };

    send_approval_notice(&pool, &user.email)
        .await
        .map_err(|err| ApiError::internal(&err))?;

    Ok(Json(user.to_response()))
}

#[utoipa::path(
    post,
    path = "/admin/users/{id}/reject",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "User rejected", body = UserResponse),
        (status = 400, description = "User is not pending", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn reject_user(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserResponse>, ApiError> {
    require_admin(&headers, &pool).await?;

    match storage::transition_pending_user(&pool, user_id, STATUS_REJECTED)
        .await
        .map_err(|err| ApiError::internal(&err))?
    {
        StatusUpdate::Updated(user) => Ok(Json(user.to_response())),
        StatusUpdate::NotPending(current) => Err(ApiError::bad_request(format!(
            "User is already {current}"
        ))),
        StatusUpdate::NotFound => Err(ApiError::not_found("User not found")),
    }
}

#[utoipa::path(
    delete,
    path = "/admin/users/{id}",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "User deleted", body = MessageResponse),
        (status = 400, description = "Self or seeded account", body = ErrorBody),
        (status = 404, description = "User not found", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn delete_user(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<MessageResponse>, ApiError> {
    let admin = require_admin(&headers, &pool).await?;

    if user_id == admin.user_id {
        return Err(ApiError::bad_request("Cannot delete your own account"));
    }

    let target = user_storage::lookup_user_by_id(&pool, user_id)
        .await
        .map_err(|err| ApiError::internal(&err))?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    if target.is_seeded {
        return Err(ApiError::bad_request("Cannot delete seeded admin account."));
    }

    // Sessions go first; the row delete then cascades passkeys, grants,
    // and requests.
    session::revoke_all(&pool, user_id)
        .await
        .map_err(|err| ApiError::internal(&err))?;
    user_storage::delete_user(&pool, user_id)
        .await
        .map_err(|err| ApiError::internal(&err))?;

    Ok(Json(MessageResponse::new("User deleted successfully")))
}

async fn send_approval_notice(pool: &PgPool, email: &str) -> anyhow::Result<()> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to begin notification transaction")?;
    email::enqueue(&mut tx, email, "registration_approved", &json!({})).await?;
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
    async fn list_users_requires_session() -> anyhow::Result<()> {
        let pool = lazy_pool()?;
        let result = list_users(
            HeaderMap::new(),
            Extension(pool),
            Query(StatusFilter { status: None }),
        )
        .await;
        let err = result.err().expect("missing session must fail");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
