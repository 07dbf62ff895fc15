use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::Instrument;
use uuid::Uuid;

use super::models::PasskeyCredential;

pub struct PasskeyRepo;

impl PasskeyRepo {
    /// Saves a new passkey credential with a zero sign count.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn create(
        pool: &PgPool,
        user_id: Uuid,
        credential_id: &[u8],
        passkey_data: &[u8],
        name: &str,
        transports: Option<&[String]>,
    ) -> Result<()> {
        let query = r"
            INSERT INTO passkeys (credential_id, user_id, name, passkey_data, transports)
            VALUES ($1, $2, $3, $4, $5)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(credential_id)
            .bind(user_id)
            .bind(name)
            .bind(passkey_data)
            .bind(transports)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to insert passkey")?;
        Ok(())
    }

    /// Lists all passkeys for a user, newest first.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<PasskeyCredential>> {
        sqlx::query_as::<_, PasskeyCredential>(
            "SELECT * FROM passkeys WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .context("failed to list passkeys")
    }

    /// Gets a single passkey by credential ID.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn get(pool: &PgPool, credential_id: &[u8]) -> Result<Option<PasskeyCredential>> {
        sqlx::query_as::<_, PasskeyCredential>("SELECT * FROM passkeys WHERE credential_id = $1")
            .bind(credential_id)
            .fetch_optional(pool)
            .await
            .context("failed to fetch passkey")
    }

    /// Advance the sign counter after a verified authentication.
    ///
    /// The update only lands when the presented counter is strictly greater
    /// than the stored one; `false` means the assertion was a clone or replay
    /// and nothing was written. Under concurrency this is the compare-and-swap
    /// that lets at most one of two identical assertions through.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn record_authentication(
        pool: &PgPool,
        credential_id: &[u8],
        sign_count: i64,
        passkey_data: &[u8],
    ) -> Result<bool> {
        let query = r"
            UPDATE passkeys
            SET sign_count = $2, passkey_data = $3, last_used_at = NOW()
            WHERE credential_id = $1 AND sign_count < $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(credential_id)
            .bind(sign_count)
            .bind(passkey_data)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to update passkey sign count")?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes a passkey by credential ID and owning user.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn delete(pool: &PgPool, user_id: Uuid, credential_id: &[u8]) -> Result<bool> {
        let result = sqlx::query("DELETE FROM passkeys WHERE user_id = $1 AND credential_id = $2")
            .bind(user_id)
            .bind(credential_id)
            .execute(pool)
            .await
            .context("failed to delete passkey")?;
        Ok(result.rows_affected() > 0)
    }
}
