//! Request/response types for admin endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AdminCreateUser {
    pub email: String,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AppCreate {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub app_url: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AppRead {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub is_public: bool,
    pub description: Option<String>,
    pub app_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct GrantAccess {
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RevokeQuery {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AppUserAccess {
    pub email: String,
    pub role: Option<String>,
    pub granted_at: DateTime<Utc>,
    pub granted_by: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AccessRequestReview {
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AccessRequestRead {
    pub id: String,
    pub user_email: String,
    pub user_name: Option<String>,
    pub app_slug: String,
    pub app_name: String,
    pub message: Option<String>,
    pub status: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct StatusFilter {
    #[serde(default)]
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn admin_create_user_defaults_flags() -> Result<()> {
        let decoded: AdminCreateUser = serde_json::from_str(r#"{"email":"a@x.com"}"#)?;
        assert!(!decoded.auto_approve);
        assert!(!decoded.is_admin);
        Ok(())
    }

    #[test]
    fn app_create_defaults_visibility() -> Result<()> {
        let decoded: AppCreate = serde_json::from_str(r#"{"slug":"docs","name":"Docs"}"#)?;
        assert!(!decoded.is_public);
        assert!(decoded.description.is_none());
        Ok(())
    }
}
