//! Request/response types for auth endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use webauthn_rs::prelude::{PublicKeyCredential, RegisterPublicKeyCredential};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OtpRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OtpVerifyRequest {
    pub email: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl MessageResponse {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub status: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuthResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserResponse>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasskeyOptionsRequest {
    /// Email scopes the challenge to one account; absent means discoverable.
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasskeyRegisterVerifyRequest {
    pub registration_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[schema(value_type = Object)]
    pub credential: RegisterPublicKeyCredential,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasskeySigninVerifyRequest {
    pub authentication_id: String,
    #[schema(value_type = Object)]
    pub credential: PublicKeyCredential,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasskeyInfo {
    /// URL-safe base64 of the credential ID.
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AccessRequestCreate {
    #[serde(default)]
    pub message: Option<String>,
}

/// An app as seen by a signed-in user: public, granted, or both.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VisibleApp {
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub app_url: Option<String>,
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn otp_verify_request_round_trips() -> Result<()> {
        let request = OtpVerifyRequest {
            email: "alice@example.com".to_string(),
            code: "123456".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        let email = value
            .get("email")
            .and_then(serde_json::Value::as_str)
            .context("missing email")?;
        assert_eq!(email, "alice@example.com");
        let decoded: OtpVerifyRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.code, "123456");
        Ok(())
    }

    #[test]
    fn message_response_skips_missing_detail() -> Result<()> {
        let value = serde_json::to_value(MessageResponse::new("ok"))?;
        assert!(value.get("detail").is_none());

        let value = serde_json::to_value(MessageResponse::new("ok").with_detail("more"))?;
        assert_eq!(
            value.get("detail").and_then(serde_json::Value::as_str),
            Some("more")
        );
        Ok(())
    }

    #[test]
    fn passkey_options_request_defaults_email() -> Result<()> {
        let decoded: PasskeyOptionsRequest = serde_json::from_str("{}")?;
        assert!(decoded.email.is_none());
        Ok(())
    }
}
