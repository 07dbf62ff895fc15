//! Per-application access control: grants, requests, and the check used by
//! the edge validator.
//!
//! A grant is a flat `(user, app)` row with an optional free-text role hint
//! that only the downstream application interprets. Granting is an idempotent
//! upsert, revoking a missing grant is a no-op, and at most one *pending*
//! request may exist per pair — enforced by a partial unique index, so the
//! invariant holds under concurrent requests too. There is no cache in front
//! of any of this: every check reads the store, so revocation is immediate.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row, postgres::PgRow};
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::session::is_unique_violation;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("an access request for this app is already pending")]
    RequestAlreadyPending,
    #[error("access request was already resolved")]
    RequestAlreadyResolved,
    #[error("access request not found")]
    RequestNotFound,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// A registered application.
#[derive(Debug, Clone)]
pub struct App {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub is_public: bool,
    pub description: Option<String>,
    pub app_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for App {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            slug: row.try_get("slug")?,
            name: row.try_get("name")?,
            is_public: row.try_get("is_public")?,
            description: row.try_get("description")?,
            app_url: row.try_get("app_url")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// The grant returned by [`check_access`].
#[derive(Debug, Clone)]
pub struct GrantInfo {
    pub role: Option<String>,
}

/// What a resolved request needs to carry for follow-up work.
#[derive(Debug)]
pub struct ResolvedRequest {
    pub user_id: Uuid,
    pub app_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Reject,
}

impl ReviewDecision {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approved",
            Self::Reject => "rejected",
        }
    }
}

/// Look up an app by slug.
///
/// # Errors
/// Returns an error if the query fails.
pub async fn lookup_app(pool: &PgPool, slug: &str) -> Result<Option<App>> {
    sqlx::query_as::<_, App>("SELECT * FROM apps WHERE slug = $1")
        .bind(slug)
        .fetch_optional(pool)
        .await
        .context("failed to lookup app")
}

/// Grant a user access to an app, or update the role hint of an existing
/// grant. Idempotent by design.
///
/// # Errors
/// Returns an error if the write fails.
pub async fn grant(
    pool: &PgPool,
    user_id: Uuid,
    app_id: Uuid,
    role: Option<&str>,
    granted_by: &str,
) -> Result<()> {
    let query = r"
        INSERT INTO app_access (user_id, app_id, role, granted_by)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id, app_id)
        DO UPDATE SET role = EXCLUDED.role, granted_by = EXCLUDED.granted_by
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(app_id)
        .bind(role)
        .bind(granted_by)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to upsert access grant")?;
    Ok(())
}

/// Remove a grant. Returns `false` when there was nothing to remove; that is
/// not an error.
///
/// # Errors
/// Returns an error if the write fails.
pub async fn revoke(pool: &PgPool, user_id: Uuid, app_id: Uuid) -> Result<bool> {
    let query = "DELETE FROM app_access WHERE user_id = $1 AND app_id = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(app_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete access grant")?;
    Ok(result.rows_affected() > 0)
}

/// The edge validator's read path: does this user hold a grant for this app?
///
/// # Errors
/// Returns an error if the query fails.
pub async fn check_access(pool: &PgPool, user_id: Uuid, app_id: Uuid) -> Result<Option<GrantInfo>> {
    let query = r"
        SELECT role
        FROM app_access
        WHERE user_id = $1 AND app_id = $2
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(app_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check access")?;

    row.map(|row| -> Result<GrantInfo> {
        Ok(GrantInfo {
            role: row.try_get("role").context("failed to read role hint")?,
        })
    })
    .transpose()
}

/// File an access request for (user, app).
///
/// The partial unique index on pending rows turns a concurrent duplicate into
/// a unique violation, which surfaces as [`AccessError::RequestAlreadyPending`].
///
/// # Errors
/// `RequestAlreadyPending` when an unresolved request already exists.
pub async fn request_access(
    pool: &PgPool,
    user_id: Uuid,
    app_id: Uuid,
    message: Option<&str>,
) -> Result<Uuid, AccessError> {
    let query = r"
        INSERT INTO access_requests (user_id, app_id, message)
        VALUES ($1, $2, $3)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(app_id)
        .bind(message)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match result {
        Ok(row) => Ok(row
            .try_get("id")
            .context("failed to read access request id")?),
        Err(err) if is_unique_violation(&err) => Err(AccessError::RequestAlreadyPending),
        Err(err) => Err(AccessError::Store(
            anyhow!(err).context("failed to insert access request"),
        )),
    }
}

/// Resolve a pending request. Approval also performs the grant, in the same
/// transaction.
///
/// # Errors
/// `RequestNotFound` for unknown ids, `RequestAlreadyResolved` when the
/// request left pending before this call.
pub async fn resolve(
    pool: &PgPool,
    request_id: Uuid,
    app_id: Uuid,
    decision: ReviewDecision,
    role: Option<&str>,
    reviewed_by: &str,
) -> Result<ResolvedRequest, AccessError> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to begin resolve transaction")?;

    let query = r"
        UPDATE access_requests
        SET status = $3, reviewed_by = $4, reviewed_at = NOW()
        WHERE id = $1 AND app_id = $2 AND status = 'pending'
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(request_id)
        .bind(app_id)
        .bind(decision.as_str())
        .bind(reviewed_by)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to resolve access request")?;

    let Some(row) = row else {
        // Distinguish a missing request from one that lost the pending race.
        let exists = sqlx::query("SELECT 1 FROM access_requests WHERE id = $1 AND app_id = $2")
            .bind(request_id)
            .bind(app_id)
            .fetch_optional(&mut *tx)
            .await
            .context("failed to check access request")?;
        let _ = tx.rollback().await;
        return Err(if exists.is_some() {
            AccessError::RequestAlreadyResolved
        } else {
            AccessError::RequestNotFound
        });
    };

    let user_id: Uuid = row
        .try_get("user_id")
        .context("failed to read request user")?;

    if decision == ReviewDecision::Approve {
        let query = r"
            INSERT INTO app_access (user_id, app_id, role, granted_by)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, app_id)
            DO UPDATE SET role = EXCLUDED.role, granted_by = EXCLUDED.granted_by
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(user_id)
            .bind(app_id)
            .bind(role)
            .bind(reviewed_by)
            .execute(&mut *tx)
            .instrument(span)
            .await
            .context("failed to grant approved request")?;
    }

    tx.commit()
        .await
        .context("failed to commit resolve transaction")?;

    Ok(ResolvedRequest { user_id, app_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn review_decision_matches_schema_values() {
        assert_eq!(ReviewDecision::Approve.as_str(), "approved");
        assert_eq!(ReviewDecision::Reject.as_str(), "rejected");
    }

    #[test]
    fn access_errors_render_messages() {
        assert_eq!(
            AccessError::RequestAlreadyPending.to_string(),
            "an access request for this app is already pending"
        );
        assert_eq!(
            AccessError::RequestAlreadyResolved.to_string(),
            "access request was already resolved"
        );
        assert_eq!(
            AccessError::RequestNotFound.to_string(),
            "access request not found"
        );
    }
}
