//! Session management: opaque tokens, absolute expiry, revocation.
//!
//! Tokens are 256-bit random values handed to the browser as-is; the database
//! stores only their SHA-256 digest, so a leaked sessions table cannot be
//! replayed as cookies. Sessions have a fixed absolute lifetime and are never
//! extended on use; validation deletes expired rows as it finds them.

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session expired")]
    Expired,
    #[error("account is not approved")]
    AccountNotApproved,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// A freshly minted session: the raw token only exists here and in the cookie.
#[derive(Debug)]
pub struct NewSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// The user a valid session resolves to.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub is_admin: bool,
    pub is_seeded: bool,
    pub notify_access_requests: bool,
}

/// Create a new session token for the auth cookie.
/// The raw value is only returned to set the cookie; the database stores a hash.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a session token so raw values never touch the database.
/// The hash is used for lookups when the cookie is presented.
#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Mint a session for an approved user.
///
/// The status check is part of the insert itself: non-approved (or deleted)
/// users produce no row, so a racing rejection cannot slip a session in.
/// A token-hash collision counts as a generation failure and is retried.
///
/// # Errors
/// `AccountNotApproved` when the user is missing or not approved.
pub async fn create(
    pool: &PgPool,
    user_id: Uuid,
    expiry_days: i64,
) -> Result<NewSession, SessionError> {
    let query = r"
        INSERT INTO sessions (token_hash, user_id, expires_at)
        SELECT $1, users.id, NOW() + ($3 * INTERVAL '1 day')
        FROM users
        WHERE users.id = $2 AND users.status = 'approved'
        RETURNING expires_at
    ";

    for _ in 0..3 {
        let token = generate_token()?;
        let token_hash = hash_token(&token);
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(&token_hash)
            .bind(user_id)
            .bind(expiry_days)
            .fetch_optional(pool)
            .instrument(span)
            .await;

        match result {
            Ok(Some(row)) => {
                let expires_at: DateTime<Utc> = row
                    .try_get("expires_at")
                    .context("failed to read session expiry")?;
                return Ok(NewSession { token, expires_at });
            }
            Ok(None) => return Err(SessionError::AccountNotApproved),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => {
                return Err(SessionError::Store(
                    anyhow!(err).context("failed to insert session"),
                ));
            }
        }
    }

    Err(SessionError::Store(anyhow!(
        "failed to generate unique session token"
    )))
}

/// Resolve a raw session token to its user.
///
/// Expired rows are deleted on sight so the table self-cleans under load.
///
/// # Errors
/// `NotFound` for unknown tokens, `Expired` for past-expiry sessions,
/// `AccountNotApproved` when the owning account lost approval.
pub async fn validate(pool: &PgPool, token: &str) -> Result<SessionUser, SessionError> {
    let token_hash = hash_token(token);

    let query = r"
        SELECT sessions.expires_at, users.id, users.email, users.name, users.status,
               users.is_admin, users.is_seeded, users.notify_access_requests
        FROM sessions
        JOIN users ON users.id = sessions.user_id
        WHERE sessions.token_hash = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(&token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?
        .ok_or(SessionError::NotFound)?;

    let expires_at: DateTime<Utc> = row
        .try_get("expires_at")
        .context("failed to read session expiry")?;
    if expires_at <= Utc::now() {
        delete_by_hash(pool, &token_hash).await?;
        return Err(SessionError::Expired);
    }

    let status: String = row.try_get("status").context("failed to read user status")?;
    if status != "approved" {
        return Err(SessionError::AccountNotApproved);
    }

    Ok(SessionUser {
        user_id: row.try_get("id").context("failed to read user id")?,
        email: row.try_get("email").context("failed to read user email")?,
        name: row.try_get("name").context("failed to read user name")?,
        is_admin: row
            .try_get("is_admin")
            .context("failed to read admin flag")?,
        is_seeded: row
            .try_get("is_seeded")
            .context("failed to read seeded flag")?,
        notify_access_requests: row
            .try_get("notify_access_requests")
            .context("failed to read notify flag")?,
    })
}

/// Delete the session behind a raw token. Revoking an unknown token is a no-op.
pub async fn revoke(pool: &PgPool, token: &str) -> Result<()> {
    delete_by_hash(pool, &hash_token(token)).await
}

async fn delete_by_hash(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    let query = "DELETE FROM sessions WHERE token_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

/// Delete every session a user holds. Used on account deletion and forced logout.
pub async fn revoke_all(pool: &PgPool, user_id: Uuid) -> Result<u64> {
    let query = "DELETE FROM sessions WHERE user_id = $1";
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
        .context("failed to delete user sessions")?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    #[test]
    fn generate_token_is_256_bits() {
        let decoded_len = generate_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn generate_token_is_unique() {
        let first = generate_token().ok();
        let second = generate_token().ok();
        assert!(first.is_some());
        assert_ne!(first, second);
    }

    #[test]
    fn hash_token_stable() {
        let first = hash_token("token");
        let second = hash_token("token");
        let different = hash_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
        assert_eq!(first.len(), 32);
    }

    #[test]
    fn session_errors_render_messages() {
        assert_eq!(SessionError::NotFound.to_string(), "session not found");
        assert_eq!(SessionError::Expired.to_string(), "session expired");
        assert_eq!(
            SessionError::AccountNotApproved.to_string(),
            "account is not approved"
        );
    }
}
