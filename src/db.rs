//! Database pool construction and first-run schema bootstrap.
//!
//! The schema is small enough that gatekeeper applies it itself on startup
//! with idempotent DDL instead of carrying a migration tool. Every statement
//! is safe to re-run against an already-provisioned database.

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{Instrument, info, info_span};

/// Connect to Postgres with the pool settings used by the API server.
///
/// # Errors
/// Returns an error if the database is unreachable.
pub async fn connect(dsn: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")
}

const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        email TEXT NOT NULL UNIQUE,
        name TEXT,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'approved', 'rejected')),
        is_admin BOOLEAN NOT NULL DEFAULT FALSE,
        is_seeded BOOLEAN NOT NULL DEFAULT FALSE,
        notify_access_requests BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS sessions (
        token_hash BYTEA PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        expires_at TIMESTAMPTZ NOT NULL,
        CHECK (expires_at > created_at)
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS sessions_user_id_idx ON sessions (user_id)
    ",
    r"
    CREATE TABLE IF NOT EXISTS one_time_codes (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        email TEXT NOT NULL,
        code CHAR(6) NOT NULL,
        purpose TEXT NOT NULL CHECK (purpose IN ('signin', 'register')),
        attempts INTEGER NOT NULL DEFAULT 0,
        used BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        expires_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS one_time_codes_email_purpose_idx
        ON one_time_codes (email, purpose, created_at DESC)
    ",
    r"
    CREATE TABLE IF NOT EXISTS passkeys (
        credential_id BYTEA PRIMARY KEY,
        user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        name TEXT NOT NULL DEFAULT 'Passkey',
        passkey_data BYTEA NOT NULL,
        sign_count BIGINT NOT NULL DEFAULT 0,
        transports TEXT[],
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        last_used_at TIMESTAMPTZ
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS passkeys_user_id_idx ON passkeys (user_id)
    ",
    r"
    CREATE TABLE IF NOT EXISTS apps (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        slug TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        is_public BOOLEAN NOT NULL DEFAULT FALSE,
        description TEXT,
        app_url TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS app_access (
        user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        app_id UUID NOT NULL REFERENCES apps(id) ON DELETE CASCADE,
        role TEXT,
        granted_by TEXT,
        granted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (user_id, app_id)
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS access_requests (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        app_id UUID NOT NULL REFERENCES apps(id) ON DELETE CASCADE,
        message TEXT,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'approved', 'rejected')),
        reviewed_by TEXT,
        reviewed_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE UNIQUE INDEX IF NOT EXISTS access_requests_pending_idx
        ON access_requests (user_id, app_id)
        WHERE status = 'pending'
    ",
    r"
    CREATE TABLE IF NOT EXISTS email_outbox (
        id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
        to_email TEXT NOT NULL,
        template TEXT NOT NULL,
        payload_json JSONB NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'sent', 'failed')),
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        next_attempt_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        sent_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS email_outbox_pending_idx
        ON email_outbox (next_attempt_at)
        WHERE status = 'pending'
    ",
];

/// Apply the schema, creating any missing tables and indexes.
///
/// # Errors
/// Returns an error if a DDL statement fails.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DDL",
            db.statement = statement
        );
        sqlx::query(statement)
            .execute(pool)
            .instrument(span)
            .await
            .context("failed to apply schema statement")?;
    }
    info!("database schema is up to date");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::SCHEMA;

    #[test]
    fn schema_statements_are_idempotent() {
        for statement in SCHEMA {
            assert!(
                statement.contains("IF NOT EXISTS"),
                "statement must be re-runnable: {statement}"
            );
        }
    }

    #[test]
    fn schema_covers_all_tables() {
        let ddl = SCHEMA.join("\n");
        for table in [
            "users",
            "sessions",
            "one_time_codes",
            "passkeys",
            "apps",
            "app_access",
            "access_requests",
            "email_outbox",
        ] {
            assert!(
                ddl.contains(&format!("CREATE TABLE IF NOT EXISTS {table}")),
                "missing table {table}"
            );
        }
    }
}
