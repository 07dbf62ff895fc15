//! Registration: start with an emailed code, finish by verifying it.
//!
//! Registration is the one flow that reveals account existence: an email that
//! already has an account gets a status-specific refusal instead of a code.
//! Sign-in is the opposite (see `signin.rs`); the asymmetry is intentional.

use anyhow::Context;
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;

use crate::api::email;
use crate::api::error::{ApiError, ErrorBody};
use crate::otp::{self, OtpPurpose};
use crate::session;

use super::session::session_cookie;
use super::state::SharedAuthState;
use super::storage::{
    self, CreateUserOutcome, STATUS_APPROVED, STATUS_PENDING, STATUS_REJECTED, UserRecord,
};
use super::types::{AuthResponse, MessageResponse, OtpRequest, OtpVerifyRequest};
use super::utils::{normalize_email, valid_code, valid_email};

fn existing_account_error(user: &UserRecord) -> ApiError {
    match user.status.as_str() {
        STATUS_APPROVED => ApiError::new(
            StatusCode::BAD_REQUEST,
            "email_already_registered",
            "Email already registered. Please sign in instead.",
        ),
        STATUS_REJECTED => ApiError::new(
            StatusCode::BAD_REQUEST,
            "registration_rejected",
            "Registration was rejected. Please contact an administrator.",
        ),
        _ => ApiError::new(
            StatusCode::BAD_REQUEST,
            "registration_pending",
            "Registration pending approval. Please wait for admin approval.",
        ),
    }
}

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = OtpRequest,
    responses(
        (status = 200, description = "Verification code sent", body = MessageResponse),
        (status = 400, description = "Invalid email or existing account", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn register(
    pool: Extension<PgPool>,
    auth_state: Extension<SharedAuthState>,
    Json(payload): Json<OtpRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let email = normalize_email(&payload.email);
    if !valid_email(&email) {
        return Err(ApiError::bad_request("Invalid email address"));
    }

    if let Some(user) = storage::lookup_user_by_email(&pool, &email)
        .await
        .map_err(|err| ApiError::internal(&err))?
    {
        return Err(existing_account_error(&user));
    }

    issue_code(&pool, &auth_state, &email, OtpPurpose::Register).await?;

    Ok(Json(
        MessageResponse::new("Verification code sent")
            .with_detail("Check your email for the 6-digit code."),
    ))
}

#[utoipa::path(
    post,
    path = "/auth/register/verify",
    request_body = OtpVerifyRequest,
    responses(
        (status = 200, description = "Registration complete; cookie set when auto-approved", body = AuthResponse),
        (status = 400, description = "Invalid or expired code", body = ErrorBody),
        (status = 429, description = "Too many attempts", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn register_verify(
    pool: Extension<PgPool>,
    auth_state: Extension<SharedAuthState>,
    Json(payload): Json<OtpVerifyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&payload.email);
    if !valid_email(&email) {
        return Err(ApiError::bad_request("Invalid email address"));
    }
    if !valid_code(payload.code.trim()) {
        return Err(ApiError::bad_request("Code must be 6 digits"));
    }

    let config = auth_state.config();
    otp::verify(
        &pool,
        &email,
        OtpPurpose::Register,
        payload.code.trim(),
        config.otp_max_attempts(),
    )
    .await?;

    if let Some(user) = storage::lookup_user_by_email(&pool, &email)
        .await
        .map_err(|err| ApiError::internal(&err))?
    {
        return Err(existing_account_error(&user));
    }

    let auto_approve = config.is_accepted_domain(&email);
    let status = if auto_approve {
        STATUS_APPROVED
    } else {
        STATUS_PENDING
    };
    let user = match storage::create_user(&pool, &email, status, false)
        .await
        .map_err(|err| ApiError::internal(&err))?
    {
        CreateUserOutcome::Created(user) => user,
        CreateUserOutcome::EmailTaken => {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                "email_already_registered",
                "Email already registered.",
            ));
        }
    };

    if auto_approve {
        let new_session = session::create(&pool, user.id, config.session_expiry_days()).await?;
        let mut headers = HeaderMap::new();
        if let Ok(cookie) = session_cookie(config, &new_session.token) {
            headers.insert(SET_COOKIE, cookie);
        }
        return Ok((
            headers,
            Json(AuthResponse {
                message: "Registration successful".to_string(),
                user: Some(user.to_response()),
            }),
        )
            .into_response());
    }

    notify_pending_registration(&pool, &email)
        .await
        .map_err(|err| ApiError::internal(&err))?;

    Ok(Json(AuthResponse {
        message: "Registration pending approval".to_string(),
        user: None,
    })
    .into_response())
}

/// Issue a fresh code and queue its delivery in one transaction.
pub(super) async fn issue_code(
    pool: &PgPool,
    auth_state: &SharedAuthState,
    email: &str,
    purpose: OtpPurpose,
) -> Result<(), ApiError> {
    let expiry_minutes = auth_state.config().otp_expiry_minutes();
    let mut tx = pool
        .begin()
        .await
        .context("failed to begin code transaction")
        .map_err(|err| ApiError::internal(&err))?;

    let code = otp::issue(&mut tx, email, purpose, expiry_minutes).await?;

    let template = match purpose {
        OtpPurpose::Signin => "signin_code",
        OtpPurpose::Register => "register_code",
    };
    email::enqueue(
        &mut tx,
        email,
        template,
        &json!({
            "code": code,
            "expires_minutes": expiry_minutes.to_string(),
        }),
    )
    .await
    .map_err(|err| ApiError::internal(&err))?;

    tx.commit()
        .await
        .context("failed to commit code transaction")
        .map_err(|err| ApiError::internal(&err))?;
    Ok(())
}

/// Queue the "pending approval" notices: one to the user, one per admin.
async fn notify_pending_registration(pool: &PgPool, email: &str) -> anyhow::Result<()> {
    let admins = storage::admin_emails(pool, false).await?;

    let mut tx = pool
        .begin()
        .await
        .context("failed to begin notification transaction")?;
    email::enqueue(&mut tx, email, "registration_pending", &json!({})).await?;
    for admin in admins {
        email::enqueue(
            &mut tx,
            &admin,
            "admin_pending_registration",
            &json!({ "requester_email": email }),
        )
        .await?;
    }
    tx.commit()
        .await
        .context("failed to commit notification transaction")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::{auth_state, lazy_pool};
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn register_rejects_invalid_email() -> anyhow::Result<()> {
        let pool = lazy_pool()?;
        let result = register(
            Extension(pool),
            Extension(auth_state()?),
            Json(OtpRequest {
                email: "not-an-email".to_string(),
            }),
        )
        .await;
        let err = result.err().expect("invalid email must fail");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn register_verify_rejects_malformed_code() -> anyhow::Result<()> {
        let pool = lazy_pool()?;
        let result = register_verify(
            Extension(pool),
            Extension(auth_state()?),
            Json(OtpVerifyRequest {
                email: "alice@example.com".to_string(),
                code: "12x".to_string(),
            }),
        )
        .await;
        let err = result.err().expect("malformed code must fail");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[test]
    fn existing_account_errors_by_status() {
        let mut user = crate::api::handlers::auth::storage::UserRecord {
            id: uuid::Uuid::nil(),
            email: "a@x.com".to_string(),
            name: None,
            status: STATUS_APPROVED.to_string(),
            is_admin: false,
            is_seeded: false,
            notify_access_requests: false,
            created_at: chrono::Utc::now(),
        };
        assert_eq!(
            existing_account_error(&user).code(),
            "email_already_registered"
        );

        user.status = STATUS_PENDING.to_string();
        assert_eq!(existing_account_error(&user).code(), "registration_pending");

        user.status = STATUS_REJECTED.to_string();
        assert_eq!(
            existing_account_error(&user).code(),
            "registration_rejected"
        );

        let response = existing_account_error(&user).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
