//! Shared fixtures for auth handler tests.
//!
//! The lazy pool never opens a connection; it exists so handlers that bail on
//! validation before any query can run against a real-looking `PgPool`.

use anyhow::Result;
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::sync::Arc;
use std::time::Duration;

use crate::webauthn::{PasskeyConfig, PasskeyService};

use super::state::{AuthConfig, AuthState};

pub(crate) fn lazy_pool() -> Result<PgPool> {
    Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
}

pub(crate) fn auth_state() -> Result<Arc<AuthState>> {
    let config = AuthConfig::new("https://auth.example.com".to_string())
        .with_accepted_domains(vec!["example.com".to_string()]);
    let passkey_config = PasskeyConfig::new(
        "example.com".to_string(),
        "Example".to_string(),
        "https://example.com".to_string(),
        Duration::from_secs(120),
    )?;
    let passkeys = PasskeyService::new(passkey_config)?;
    Ok(Arc::new(AuthState::new(config, passkeys)))
}
