//! SQL for one-time code rows. All writes run inside caller transactions.

use anyhow::{Context, Result};
use sqlx::{Postgres, Row, Transaction};
use tracing::Instrument;
use uuid::Uuid;

use super::models::{CandidateCode, OtpPurpose};

/// Burn every unused code for (email, purpose). Called before issuing a new one.
pub(super) async fn burn_previous(
    tx: &mut Transaction<'_, Postgres>,
    email: &str,
    purpose: OtpPurpose,
) -> Result<()> {
    let query = r"
        UPDATE one_time_codes
        SET used = TRUE
        WHERE email = $1 AND purpose = $2 AND used = FALSE
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .bind(purpose.as_str())
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to burn previous one-time codes")?;
    Ok(())
}

pub(super) async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    email: &str,
    code: &str,
    purpose: OtpPurpose,
    expiry_minutes: i64,
) -> Result<()> {
    let query = r"
        INSERT INTO one_time_codes (email, code, purpose, expires_at)
        VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 minute'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .bind(code)
        .bind(purpose.as_str())
        .bind(expiry_minutes)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert one-time code")?;
    Ok(())
}

/// Lock the newest unused code for (email, purpose).
///
/// `FOR UPDATE` serializes concurrent verification attempts on the same code;
/// the second caller blocks until the first one's attempt is committed.
pub(super) async fn lock_latest(
    tx: &mut Transaction<'_, Postgres>,
    email: &str,
    purpose: OtpPurpose,
) -> Result<Option<CandidateCode>> {
    let query = r"
        SELECT id, code, attempts, expires_at
        FROM one_time_codes
        WHERE email = $1 AND purpose = $2 AND used = FALSE
        ORDER BY created_at DESC
        LIMIT 1
        FOR UPDATE
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(purpose.as_str())
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lock one-time code")?;

    row.map(|row| -> Result<CandidateCode> {
        Ok(CandidateCode {
            id: row.try_get("id").context("failed to read code id")?,
            code: {
                // CHAR(6) reads back space-padded; compares need the bare digits.
                let code: String = row.try_get("code").context("failed to read code value")?;
                code.trim_end().to_string()
            },
            attempts: row
                .try_get("attempts")
                .context("failed to read code attempts")?,
            expires_at: row
                .try_get("expires_at")
                .context("failed to read code expiry")?,
        })
    })
    .transpose()
}

/// Charge one attempt against a locked code, optionally burning it.
pub(super) async fn record_attempt(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    burn: bool,
) -> Result<()> {
    let query = r"
        UPDATE one_time_codes
        SET attempts = attempts + 1,
            used = used OR $2
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .bind(burn)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to record verification attempt")?;
    Ok(())
}
