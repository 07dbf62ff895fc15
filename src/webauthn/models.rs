use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, postgres::PgRow};
use uuid::Uuid;
use webauthn_rs::prelude::Passkey;

/// A stored passkey credential row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasskeyCredential {
    pub credential_id: Vec<u8>,
    pub user_id: Uuid,
    pub name: String,
    pub passkey_data: Vec<u8>,
    pub sign_count: i64,
    pub transports: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for PasskeyCredential {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            credential_id: row.try_get("credential_id")?,
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            passkey_data: row.try_get("passkey_data")?,
            sign_count: row.try_get("sign_count")?,
            transports: row.try_get("transports")?,
            created_at: row.try_get("created_at")?,
            last_used_at: row.try_get("last_used_at")?,
        })
    }
}

/// A credential row together with its deserialized `webauthn-rs` passkey.
#[derive(Debug, Clone)]
pub struct StoredPasskey {
    pub credential: PasskeyCredential,
    pub passkey: Passkey,
}

impl PasskeyCredential {
    /// Deserialize the stored passkey payload.
    ///
    /// # Errors
    /// Returns an error if the stored bytes are not a valid passkey.
    pub fn into_stored(self) -> Result<StoredPasskey> {
        let passkey = serde_json::from_slice(&self.passkey_data)
            .context("failed to deserialize stored passkey")?;
        Ok(StoredPasskey {
            credential: self,
            passkey,
        })
    }
}

/// Serialize a passkey for storage.
///
/// # Errors
/// Returns an error if serialization fails.
pub fn serialize_passkey(passkey: &Passkey) -> Result<Vec<u8>> {
    serde_json::to_vec(passkey).context("failed to serialize passkey")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn into_stored_rejects_garbage() {
        let credential = PasskeyCredential {
            credential_id: vec![1, 2, 3],
            user_id: Uuid::nil(),
            name: "Passkey".to_string(),
            passkey_data: b"not json".to_vec(),
            sign_count: 0,
            transports: None,
            created_at: Utc::now(),
            last_used_at: None,
        };
        assert!(credential.into_stored().is_err());
    }
}
