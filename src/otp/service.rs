//! Issue and verify one-time codes.

use anyhow::{Context, Result};
use chrono::Utc;
use rand::{Rng, rngs::OsRng};
use sqlx::{PgPool, Postgres, Transaction};
use thiserror::Error;

use super::models::OtpPurpose;
use super::repo;

#[derive(Debug, Error)]
pub enum OtpError {
    #[error("invalid verification code")]
    CodeInvalid,
    #[error("verification code expired")]
    CodeExpired,
    #[error("too many verification attempts")]
    TooManyAttempts,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Generate a random 6-digit code.
#[must_use]
pub fn generate_code() -> String {
    let mut rng = OsRng;
    (0..6)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Issue a fresh code for (email, purpose) inside the caller's transaction.
///
/// Previous unused codes for the pair are burned first, so only the newest
/// code can ever verify. The caller enqueues the delivery email in the same
/// transaction and commits; delivery itself happens off the request path.
///
/// # Errors
/// Returns an error if a store write fails.
pub async fn issue(
    tx: &mut Transaction<'_, Postgres>,
    email: &str,
    purpose: OtpPurpose,
    expiry_minutes: i64,
) -> Result<String, OtpError> {
    repo::burn_previous(tx, email, purpose).await?;

    let code = generate_code();
    repo::insert(tx, email, &code, purpose, expiry_minutes).await?;

    Ok(code)
}

/// Verify a submitted code against the newest unused code for (email, purpose).
///
/// The candidate row is locked, the attempt counter charged, and only then is
/// the code compared; the ceiling check runs before the comparison, so the
/// correct code no longer helps once attempts are exhausted. A matching code
/// is burned in the same transaction and can never verify twice.
///
/// # Errors
/// `CodeInvalid` when no candidate exists or the digits differ,
/// `CodeExpired` past expiry, `TooManyAttempts` once the ceiling is hit.
pub async fn verify(
    pool: &PgPool,
    email: &str,
    purpose: OtpPurpose,
    submitted: &str,
    max_attempts: i32,
) -> Result<(), OtpError> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to begin verify transaction")?;

    let Some(candidate) = repo::lock_latest(&mut tx, email, purpose).await? else {
        tx.commit()
            .await
            .context("failed to commit verify transaction")?;
        return Err(OtpError::CodeInvalid);
    };

    if candidate.expires_at <= Utc::now() {
        tx.commit()
            .await
            .context("failed to commit verify transaction")?;
        return Err(OtpError::CodeExpired);
    }

    let charged_attempts = candidate.attempts.saturating_add(1);
    if charged_attempts > max_attempts {
        // Ceiling hit: burn the code so it can never verify, then report.
        repo::record_attempt(&mut tx, candidate.id, true).await?;
        tx.commit()
            .await
            .context("failed to commit verify transaction")?;
        return Err(OtpError::TooManyAttempts);
    }

    if candidate.code != submitted {
        repo::record_attempt(&mut tx, candidate.id, false).await?;
        tx.commit()
            .await
            .context("failed to commit verify transaction")?;
        return Err(OtpError::CodeInvalid);
    }

    // Match: burn on first success so the code is single-use.
    repo::record_attempt(&mut tx, candidate.id, true).await?;
    tx.commit()
        .await
        .context("failed to commit verify transaction")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_code_is_six_digits() {
        for _ in 0..32 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()), "got {code}");
        }
    }

    #[test]
    fn generate_code_varies() {
        let codes: std::collections::HashSet<String> = (0..16).map(|_| generate_code()).collect();
        assert!(codes.len() > 1, "16 draws should not all collide");
    }

    #[test]
    fn otp_errors_render_messages() {
        assert_eq!(OtpError::CodeInvalid.to_string(), "invalid verification code");
        assert_eq!(
            OtpError::CodeExpired.to_string(),
            "verification code expired"
        );
        assert_eq!(
            OtpError::TooManyAttempts.to_string(),
            "too many verification attempts"
        );
    }
}
