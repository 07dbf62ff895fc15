//! Database helpers for user rows shared across auth handlers.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row, postgres::PgRow};
use tracing::Instrument;
use uuid::Uuid;

use crate::session::is_unique_violation;

pub(crate) const STATUS_PENDING: &str = "pending";
pub(crate) const STATUS_APPROVED: &str = "approved";
pub(crate) const STATUS_REJECTED: &str = "rejected";

/// A full user row.
#[derive(Debug, Clone)]
pub(crate) struct UserRecord {
    pub(crate) id: Uuid,
    pub(crate) email: String,
    pub(crate) name: Option<String>,
    pub(crate) status: String,
    pub(crate) is_admin: bool,
    pub(crate) is_seeded: bool,
    pub(crate) notify_access_requests: bool,
    pub(crate) created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for UserRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            status: row.try_get("status")?,
            is_admin: row.try_get("is_admin")?,
            is_seeded: row.try_get("is_seeded")?,
            notify_access_requests: row.try_get("notify_access_requests")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl UserRecord {
    pub(crate) fn to_response(&self) -> super::types::UserResponse {
        super::types::UserResponse {
            id: self.id.to_string(),
            email: self.email.clone(),
            name: self.name.clone(),
            status: self.status.clone(),
            is_admin: self.is_admin,
            created_at: self.created_at,
        }
    }
}

/// Outcome when attempting to create a user during registration.
#[derive(Debug)]
pub(crate) enum CreateUserOutcome {
    Created(UserRecord),
    EmailTaken,
}

pub(crate) async fn lookup_user_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRecord>> {
    sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
        .context("failed to lookup user by email")
}

pub(crate) async fn lookup_user_by_id(pool: &PgPool, user_id: Uuid) -> Result<Option<UserRecord>> {
    sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .context("failed to lookup user by id")
}

/// Create a user at registration time. A concurrent registration for the
/// same email loses with `EmailTaken` instead of a 500.
pub(crate) async fn create_user(
    pool: &PgPool,
    email: &str,
    status: &str,
    is_admin: bool,
) -> Result<CreateUserOutcome> {
    let query = r"
        INSERT INTO users (email, status, is_admin)
        VALUES ($1, $2, $3)
        RETURNING *
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query_as::<_, UserRecord>(query)
        .bind(email)
        .bind(status)
        .bind(is_admin)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match result {
        Ok(user) => Ok(CreateUserOutcome::Created(user)),
        Err(err) if is_unique_violation(&err) => Ok(CreateUserOutcome::EmailTaken),
        Err(err) => Err(anyhow!(err).context("failed to insert user")),
    }
}

/// Delete a user row. Sessions, passkeys, grants, and requests go with it in
/// the same statement via `ON DELETE CASCADE`, so the cascade is atomic.
pub(crate) async fn delete_user(pool: &PgPool, user_id: Uuid) -> Result<bool> {
    let query = "DELETE FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete user")?;
    Ok(result.rows_affected() > 0)
}

/// Emails of admins, optionally only those opted into access-request notices.
pub(crate) async fn admin_emails(pool: &PgPool, only_opted_in: bool) -> Result<Vec<String>> {
    let query = if only_opted_in {
        "SELECT email FROM users WHERE is_admin = TRUE AND notify_access_requests = TRUE"
    } else {
        "SELECT email FROM users WHERE is_admin = TRUE"
    };
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list admin emails")?;

    rows.into_iter()
        .map(|row| row.try_get("email").context("failed to read admin email"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_constants_match_schema_values() {
        assert_eq!(STATUS_PENDING, "pending");
        assert_eq!(STATUS_APPROVED, "approved");
        assert_eq!(STATUS_REJECTED, "rejected");
    }

    #[test]
    fn user_record_holds_values() {
        let record = UserRecord {
            id: Uuid::nil(),
            email: "alice@example.com".to_string(),
            name: None,
            status: STATUS_APPROVED.to_string(),
            is_admin: false,
            is_seeded: false,
            notify_access_requests: false,
            created_at: Utc::now(),
        };
        assert_eq!(record.email, "alice@example.com");
        assert_eq!(record.status, "approved");
    }
}
