//! Sign-in: start with an emailed code, finish by verifying it.
//!
//! The start endpoint answers 200 whatever the email, and only actually
//! issues a code for approved accounts — an unknown address and a known one
//! are indistinguishable on the wire. Registration deliberately behaves
//! differently; see `register.rs`.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, header::SET_COOKIE},
    response::IntoResponse,
};
use sqlx::PgPool;

use crate::api::error::{ApiError, ErrorBody};
use crate::otp::{self, OtpPurpose};
use crate::session;

use super::register::issue_code;
use super::session::session_cookie;
use super::state::SharedAuthState;
use super::storage::{self, STATUS_APPROVED};
use super::types::{AuthResponse, MessageResponse, OtpRequest, OtpVerifyRequest};
use super::utils::{normalize_email, valid_code, valid_email};

#[utoipa::path(
    post,
    path = "/auth/signin",
    request_body = OtpRequest,
    responses(
        (status = 200, description = "A code is on its way if the account exists", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn signin(
    pool: Extension<PgPool>,
    auth_state: Extension<SharedAuthState>,
    Json(payload): Json<OtpRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let accepted = Json(
        MessageResponse::new("Verification code sent")
            .with_detail("If an account exists for this address, check your email."),
    );

    let email = normalize_email(&payload.email);
    if !valid_email(&email) {
        // Same answer as an unknown account; no probing via validation.
        return Ok(accepted);
    }

    let user = storage::lookup_user_by_email(&pool, &email)
        .await
        .map_err(|err| ApiError::internal(&err))?;

    if user.is_some_and(|user| user.status == STATUS_APPROVED) {
        issue_code(&pool, &auth_state, &email, OtpPurpose::Signin).await?;
    }

    Ok(accepted)
}

#[utoipa::path(
    post,
    path = "/auth/signin/verify",
    request_body = OtpVerifyRequest,
    responses(
        (status = 200, description = "Signed in; session cookie set", body = AuthResponse),
        (status = 400, description = "Invalid or expired code", body = ErrorBody),
        (status = 403, description = "Account not approved", body = ErrorBody),
        (status = 429, description = "Too many attempts", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn signin_verify(
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
        OtpPurpose::Signin,
        payload.code.trim(),
        config.otp_max_attempts(),
    )
    .await?;

    let user = storage::lookup_user_by_email(&pool, &email)
        .await
        .map_err(|err| ApiError::internal(&err))?
        .ok_or_else(|| ApiError::from(otp::OtpError::CodeInvalid))?;

    // Refused before any session exists; `session::create` re-checks in SQL.
    if user.status != STATUS_APPROVED {
        return Err(ApiError::forbidden(
            "account_not_approved",
            "Account is not approved",
        ));
    }

    let new_session = session::create(&pool, user.id, config.session_expiry_days()).await?;
    let mut headers = HeaderMap::new();
    if let Ok(cookie) = session_cookie(config, &new_session.token) {
        headers.insert(SET_COOKIE, cookie);
    }

    Ok((
        headers,
        Json(AuthResponse {
            message: "Successfully signed in".to_string(),
            user: Some(user.to_response()),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::{auth_state, lazy_pool};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn signin_is_opaque_for_invalid_email() -> anyhow::Result<()> {
        let pool = lazy_pool()?;
        let response = signin(
            Extension(pool),
            Extension(auth_state()?),
            Json(OtpRequest {
                email: "not-an-email".to_string(),
            }),
        )
        .await;
        // No 4xx: an invalid address answers exactly like an unknown account.
        let body = response.expect("opaque 200");
        assert_eq!(body.message, "Verification code sent");
        Ok(())
    }

    #[tokio::test]
    async fn signin_verify_rejects_malformed_code() -> anyhow::Result<()> {
        let pool = lazy_pool()?;
        let result = signin_verify(
            Extension(pool),
            Extension(auth_state()?),
            Json(OtpVerifyRequest {
                email: "alice@example.com".to_string(),
                code: "abcdef".to_string(),
            }),
        )
        .await;
        let err = result.err().expect("malformed code must fail");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
