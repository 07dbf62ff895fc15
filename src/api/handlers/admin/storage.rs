//! Database helpers for the admin surface.

use anyhow::{Context, Result, anyhow};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use crate::access::App;
use crate::api::handlers::auth::storage::UserRecord;
use crate::session::is_unique_violation;

use super::types::{AccessRequestRead, AppUserAccess};

pub(super) async fn list_users(
    pool: &PgPool,
    status_filter: Option<&str>,
) -> Result<Vec<UserRecord>> {
    let rows = if let Some(status) = status_filter {
        sqlx::query_as::<_, UserRecord>(
            "SELECT * FROM users WHERE status = $1 ORDER BY created_at DESC",
        )
        .bind(status)
        .fetch_all(pool)
        .await
    } else {
        sqlx::query_as::<_, UserRecord>("SELECT * FROM users ORDER BY created_at DESC")
            .fetch_all(pool)
            .await
    };
    rows.context("failed to list users")
}

#[derive(Debug)]
pub(super) enum StatusUpdate {
    Updated(UserRecord),
    NotPending(String),
    NotFound,
}

/// Move a user out of `pending`. The `status = 'pending'` guard in the update
/// makes approve/reject first-writer-wins under concurrent admins.
pub(super) async fn transition_pending_user(
    pool: &PgPool,
    user_id: Uuid,
    new_status: &str,
) -> Result<StatusUpdate> {
    let query = r"
        UPDATE users
        SET status = $2, updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        RETURNING *
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query_as::<_, UserRecord>(query)
        .bind(user_id)
        .bind(new_status)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to update user status")?;

    if let Some(user) = row {
        return Ok(StatusUpdate::Updated(user));
    }

    let current = sqlx::query("SELECT status FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .context("failed to read user status")?;

    Ok(match current {
        Some(row) => StatusUpdate::NotPending(
            row.try_get("status")
                .context("failed to read user status")?,
        ),
        None => StatusUpdate::NotFound,
    })
}

pub(super) async fn list_apps(pool: &PgPool) -> Result<Vec<App>> {
    sqlx::query_as::<_, App>("SELECT * FROM apps ORDER BY created_at DESC")
        .fetch_all(pool)
        .await
        .context("failed to list apps")
}

/// Create an app; `None` means the slug is already taken.
pub(super) async fn create_app(
    pool: &PgPool,
    slug: &str,
    name: &str,
    is_public: bool,
    description: Option<&str>,
    app_url: Option<&str>,
) -> Result<Option<App>> {
    let query = r"
        INSERT INTO apps (slug, name, is_public, description, app_url)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query_as::<_, App>(query)
        .bind(slug)
        .bind(name)
        .bind(is_public)
        .bind(description)
        .bind(app_url)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match result {
        Ok(app) => Ok(Some(app)),
        Err(err) if is_unique_violation(&err) => Ok(None),
        Err(err) => Err(anyhow!(err).context("failed to insert app")),
    }
}

/// Delete an app; grants and requests cascade with the row.
pub(super) async fn delete_app(pool: &PgPool, slug: &str) -> Result<bool> {
    let query = "DELETE FROM apps WHERE slug = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(slug)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete app")?;
    Ok(result.rows_affected() > 0)
}

pub(super) async fn app_users(pool: &PgPool, app_id: Uuid) -> Result<Vec<AppUserAccess>> {
    let query = r"
        SELECT users.email, app_access.role, app_access.granted_at, app_access.granted_by
        FROM app_access
        JOIN users ON users.id = app_access.user_id
        WHERE app_access.app_id = $1
        ORDER BY app_access.granted_at DESC
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(app_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list app users")?;

    rows.into_iter()
        .map(|row| -> Result<AppUserAccess> {
            Ok(AppUserAccess {
                email: row.try_get("email").context("failed to read email")?,
                role: row.try_get("role").context("failed to read role")?,
                granted_at: row
                    .try_get("granted_at")
                    .context("failed to read granted_at")?,
                granted_by: row
                    .try_get("granted_by")
                    .context("failed to read granted_by")?,
            })
        })
        .collect()
}

/// Access requests, optionally narrowed to one app and/or one status.
pub(super) async fn list_requests(
    pool: &PgPool,
    app_id: Option<Uuid>,
    status: Option<&str>,
) -> Result<Vec<AccessRequestRead>> {
    let query = r"
        SELECT access_requests.id, access_requests.message, access_requests.status,
               access_requests.reviewed_by, access_requests.reviewed_at,
               access_requests.created_at,
               users.email AS user_email, users.name AS user_name,
               apps.slug AS app_slug, apps.name AS app_name
        FROM access_requests
        JOIN users ON users.id = access_requests.user_id
        JOIN apps ON apps.id = access_requests.app_id
        WHERE ($1::uuid IS NULL OR access_requests.app_id = $1)
          AND access_requests.status = COALESCE($2, 'pending')
        ORDER BY access_requests.created_at ASC
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(app_id)
        .bind(status)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list access requests")?;

    rows.into_iter()
        .map(|row| -> Result<AccessRequestRead> {
            let id: Uuid = row.try_get("id").context("failed to read request id")?;
            Ok(AccessRequestRead {
                id: id.to_string(),
                user_email: row
                    .try_get("user_email")
                    .context("failed to read user email")?,
                user_name: row
                    .try_get("user_name")
                    .context("failed to read user name")?,
                app_slug: row.try_get("app_slug").context("failed to read app slug")?,
                app_name: row.try_get("app_name").context("failed to read app name")?,
                message: row.try_get("message").context("failed to read message")?,
                status: row.try_get("status").context("failed to read status")?,
                reviewed_by: row
                    .try_get("reviewed_by")
                    .context("failed to read reviewer")?,
                reviewed_at: row
                    .try_get("reviewed_at")
                    .context("failed to read review time")?,
                created_at: row
                    .try_get("created_at")
                    .context("failed to read created_at")?,
            })
        })
        .collect()
}
