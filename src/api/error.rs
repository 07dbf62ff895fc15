//! Maps component error taxonomies onto structured HTTP responses.
//!
//! Every recoverable condition becomes a 4xx with a machine-readable `code`
//! and a human message; store failures become a logged 500. Passkey replay is
//! the one deliberate exception to transparency: it is logged as a security
//! event but answered with the generic ceremony-failure body, so the wire
//! gives an attacker no oracle to distinguish a replay from a bad signature.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::{
    access::AccessError, otp::OtpError, session::SessionError, webauthn::PasskeyError,
};

/// Wire shape of every error response.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    #[must_use]
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    #[must_use]
    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, code, message)
    }

    #[must_use]
    pub fn unauthenticated() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "unauthenticated",
            "Not authenticated",
        )
    }

    #[must_use]
    pub fn internal(err: &anyhow::Error) -> Self {
        error!("request failed: {err:#}");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Internal server error",
        )
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(&err)
    }
}

impl From<OtpError> for ApiError {
    fn from(err: OtpError) -> Self {
        match err {
            OtpError::CodeInvalid => {
                Self::new(StatusCode::BAD_REQUEST, "code_invalid", err.to_string())
            }
            OtpError::CodeExpired => {
                Self::new(StatusCode::BAD_REQUEST, "code_expired", err.to_string())
            }
            OtpError::TooManyAttempts => Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                "too_many_attempts",
                err.to_string(),
            ),
            OtpError::Store(err) => Self::internal(&err),
        }
    }
}

impl From<PasskeyError> for ApiError {
    fn from(err: PasskeyError) -> Self {
        match err {
            PasskeyError::ChallengeExpired => Self::new(
                StatusCode::BAD_REQUEST,
                "challenge_expired",
                err.to_string(),
            ),
            PasskeyError::CeremonyInvalid => Self::new(
                StatusCode::BAD_REQUEST,
                "ceremony_invalid",
                "Passkey verification failed",
            ),
            PasskeyError::ReplayDetected => {
                // Security-significant: log loudly, but answer exactly like an
                // ordinary ceremony failure.
                error!(security = true, "passkey replay detected: {err}");
                Self::new(
                    StatusCode::BAD_REQUEST,
                    "ceremony_invalid",
                    "Passkey verification failed",
                )
            }
            PasskeyError::Store(err) => Self::internal(&err),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound => Self::new(
                StatusCode::UNAUTHORIZED,
                "session_not_found",
                err.to_string(),
            ),
            SessionError::Expired => Self::new(
                StatusCode::UNAUTHORIZED,
                "session_expired",
                err.to_string(),
            ),
            SessionError::AccountNotApproved => Self::new(
                StatusCode::FORBIDDEN,
                "account_not_approved",
                err.to_string(),
            ),
            SessionError::Store(err) => Self::internal(&err),
        }
    }
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::RequestAlreadyPending => {
                Self::conflict("request_already_pending", err.to_string())
            }
            AccessError::RequestAlreadyResolved => {
                Self::conflict("request_already_resolved", err.to_string())
            }
            AccessError::RequestNotFound => Self::not_found(err.to_string()),
            AccessError::Store(err) => Self::internal(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_errors_map_to_codes() {
        let err = ApiError::from(OtpError::CodeInvalid);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "code_invalid");

        let err = ApiError::from(OtpError::TooManyAttempts);
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.code(), "too_many_attempts");
    }

    #[test]
    fn replay_is_indistinguishable_from_ceremony_failure() {
        let replay = ApiError::from(PasskeyError::ReplayDetected);
        let invalid = ApiError::from(PasskeyError::CeremonyInvalid);
        assert_eq!(replay.status(), invalid.status());
        assert_eq!(replay.code(), invalid.code());
        assert_eq!(replay.message, invalid.message);
    }

    #[test]
    fn session_errors_map_to_auth_statuses() {
        assert_eq!(
            ApiError::from(SessionError::NotFound).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(SessionError::Expired).status(),
            StatusCode::UNAUTHORIZED
        );
        let err = ApiError::from(SessionError::AccountNotApproved);
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.code(), "account_not_approved");
    }

    #[test]
    fn access_errors_map_to_conflicts() {
        assert_eq!(
            ApiError::from(AccessError::RequestAlreadyPending).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(AccessError::RequestAlreadyResolved).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(AccessError::RequestNotFound).status(),
            StatusCode::NOT_FOUND
        );
    }
}
