//! Admin review of access requests.

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::HeaderMap,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::access::{self, ReviewDecision};
use crate::api::error::{ApiError, ErrorBody};

use super::apps::{require_app, send_grant_notice};
use super::storage;
use super::types::{AccessRequestRead, AccessRequestReview, StatusFilter};
use crate::api::handlers::auth::storage as user_storage;
use crate::api::handlers::auth::session::require_admin;
use crate::api::handlers::auth::types::MessageResponse;

#[utoipa::path(
    get,
    path = "/admin/requests",
    responses(
        (status = 200, description = "Pending access requests across all apps", body = [AccessRequestRead]),
        (status = 403, description = "Admin access required", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn list_all_requests(
    headers: HeaderMap,
    pool: Extension<PgPool>,
) -> Result<Json<Vec<AccessRequestRead>>, ApiError> {
    require_admin(&headers, &pool).await?;

    let requests = storage::list_requests(&pool, None, None)
        .await
        .map_err(|err| ApiError::internal(&err))?;
    Ok(Json(requests))
}

#[utoipa::path(
    get,
    path = "/admin/apps/{slug}/requests",
    params(
        ("slug" = String, Path, description = "App slug"),
        ("status" = Option<String>, Query, description = "Filter by request status (default pending)")
    ),
    responses(
        (status = 200, description = "Access requests for the app", body = [AccessRequestRead]),
        (status = 404, description = "App not found", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn list_app_requests(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Path(slug): Path<String>,
    Query(filter): Query<StatusFilter>,
) -> Result<Json<Vec<AccessRequestRead>>, ApiError> {
    require_admin(&headers, &pool).await?;

    let app = require_app(&pool, &slug).await?;

    let status = match filter.status.as_deref() {
        None => None,
        Some(status @ ("pending" | "approved" | "rejected")) => Some(status),
        Some(_) => return Err(ApiError::bad_request("Unknown status filter")),
    };

    let requests = storage::list_requests(&pool, Some(app.id), status)
        .await
        .map_err(|err| ApiError::internal(&err))?;
    Ok(Json(requests))
}

#[utoipa::path(
    post,
    path = "/admin/apps/{slug}/requests/{id}/approve",
    params(
        ("slug" = String, Path, description = "App slug"),
        ("id" = String, Path, description = "Request ID")
    ),
    request_body = AccessRequestReview,
    responses(
        (status = 200, description = "Request approved and access granted", body = MessageResponse),
        (status = 404, description = "App or request not found", body = ErrorBody),
        (status = 409, description = "Request already resolved", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn approve_request(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Path((slug, request_id)): Path<(String, Uuid)>,
    payload: Option<Json<AccessRequestReview>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let admin = require_admin(&headers, &pool).await?;

    let app = require_app(&pool, &slug).await?;

    let role = payload
        .and_then(|Json(review)| review.role)
        .map(|role| role.trim().to_string())
        .filter(|role| !role.is_empty());

    let resolved = access::resolve(
        &pool,
        request_id,
        app.id,
        ReviewDecision::Approve,
        role.as_deref(),
        &admin.email,
    )
    .await?;

    // Tell the requester their grant landed.
    if let Some(user) = user_storage::lookup_user_by_id(&pool, resolved.user_id)
        .await
        .map_err(|err| ApiError::internal(&err))?
    {
        send_grant_notice(&pool, &user.email, &app, &admin.email)
            .await
            .map_err(|err| ApiError::internal(&err))?;
    }

    let role_msg = role.map(|r| format!(" with role '{r}'")).unwrap_or_default();
    Ok(Json(MessageResponse::new(format!(
        "Approved access to '{slug}'{role_msg}"
    ))))
}

#[utoipa::path(
    post,
    path = "/admin/apps/{slug}/requests/{id}/reject",
    params(
        ("slug" = String, Path, description = "App slug"),
        ("id" = String, Path, description = "Request ID")
    ),
    responses(
        (status = 200, description = "Request rejected", body = MessageResponse),
        (status = 404, description = "App or request not found", body = ErrorBody),
        (status = 409, description = "Request already resolved", body = ErrorBody)
    ),
    tag = "admin"
)]
pub async fn reject_request(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Path((slug, request_id)): Path<(String, Uuid)>,
) -> Result<Json<MessageResponse>, ApiError> {
    let admin = require_admin(&headers, &pool).await?;

    let app = require_app(&pool, &slug).await?;

    access::resolve(
        &pool,
        request_id,
        app.id,
        ReviewDecision::Reject,
        None,
        &admin.email,
    )
    .await?;

    Ok(Json(MessageResponse::new(format!(
        "Rejected access request for '{slug}'"
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::lazy_pool;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn list_requests_requires_session() -> anyhow::Result<()> {
        let pool = lazy_pool()?;
        let result = list_all_requests(HeaderMap::new(), Extension(pool)).await;
        let err = result.err().expect("missing session must fail");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
