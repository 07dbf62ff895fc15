//! Passkey endpoints: registration and sign-in ceremonies, listing, removal.

use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, header::SET_COOKIE},
    response::IntoResponse,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};
use sqlx::PgPool;
use uuid::Uuid;
use webauthn_rs::prelude::{AuthenticationResult, DiscoverableKey};

use crate::api::error::{ApiError, ErrorBody};
use crate::session;
use crate::webauthn::{AuthCeremony, PasskeyError, PasskeyRepo, StoredPasskey, serialize_passkey};

use super::session::{require_user, session_cookie};
use super::state::SharedAuthState;
use super::storage::{self, STATUS_APPROVED};
use super::types::{
    AuthResponse, MessageResponse, PasskeyInfo, PasskeyOptionsRequest,
    PasskeyRegisterVerifyRequest, PasskeySigninVerifyRequest,
};
use super::utils::{normalize_email, valid_email};

#[utoipa::path(
    post,
    path = "/auth/passkey/register/options",
    responses(
        (status = 200, description = "Registration challenge issued"),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    tag = "passkeys"
)]
pub async fn register_options(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<SharedAuthState>,
) -> Result<Json<Value>, ApiError> {
    let user = require_user(&headers, &pool).await?;

    // Exclude already-registered authenticators from the ceremony.
    let existing = PasskeyRepo::list_for_user(&pool, user.user_id)
        .await
        .map_err(|err| ApiError::internal(&err))?;
    let exclude = existing
        .into_iter()
        .map(|credential| credential.credential_id.into())
        .collect();

    let display_name = user.name.clone().unwrap_or_else(|| user.email.clone());
    let (registration_id, challenge) = auth_state
        .passkeys()
        .register_begin(user.user_id, &user.email, &display_name, exclude)
        .await?;

    Ok(Json(json!({
        "registration_id": registration_id.to_string(),
        "options": challenge,
    })))
}

#[utoipa::path(
    post,
    path = "/auth/passkey/register/verify",
    request_body = PasskeyRegisterVerifyRequest,
    responses(
        (status = 200, description = "Passkey registered", body = MessageResponse),
        (status = 400, description = "Ceremony failed or challenge expired", body = ErrorBody),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    tag = "passkeys"
)]
pub async fn register_verify(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<SharedAuthState>,
    Json(payload): Json<PasskeyRegisterVerifyRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user = require_user(&headers, &pool).await?;

    let registration_id: Uuid = payload
        .registration_id
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid registration id"))?;

    let transports = extract_transports(&payload.credential);

    let passkey = auth_state
        .passkeys()
        .register_finish(registration_id, user.user_id, &payload.credential)
        .await?;

    let passkey_data = serialize_passkey(&passkey).map_err(|err| ApiError::internal(&err))?;
    let name = payload
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or("Passkey");

    PasskeyRepo::create(
        &pool,
        user.user_id,
        passkey.cred_id().as_slice(),
        &passkey_data,
        name,
        transports.as_deref(),
    )
    .await
    .map_err(|err| ApiError::internal(&err))?;

    Ok(Json(
        MessageResponse::new("Passkey registered successfully")
            .with_detail("You can now use this passkey to sign in."),
    ))
}

#[utoipa::path(
    post,
    path = "/auth/passkey/signin/options",
    request_body = PasskeyOptionsRequest,
    responses(
        (status = 200, description = "Authentication challenge issued")
    ),
    tag = "passkeys"
)]
pub async fn signin_options(
    pool: Extension<PgPool>,
    auth_state: Extension<SharedAuthState>,
    payload: Option<Json<PasskeyOptionsRequest>>,
) -> Result<Json<Value>, ApiError> {
    let email = payload
        .and_then(|Json(request)| request.email)
        .map(|email| normalize_email(&email))
        .filter(|email| valid_email(email));

    let service = auth_state.passkeys();

    // With an email, scope the challenge to that account's credentials; in
    // every other case (no email, unknown email, no credentials) serve a
    // discoverable challenge.
    if let Some(email) = email {
        if let Some(user) = storage::lookup_user_by_email(&pool, &email)
            .await
            .map_err(|err| ApiError::internal(&err))?
        {
            let stored = load_stored_passkeys(&pool, user.id).await?;
            if !stored.is_empty() {
                let passkeys: Vec<_> = stored.iter().map(|s| s.passkey.clone()).collect();
                let (authentication_id, challenge) =
                    service.auth_begin(user.id, &passkeys).await?;
                return Ok(Json(json!({
                    "authentication_id": authentication_id.to_string(),
                    "options": challenge,
                })));
            }
        }
    }

    let (authentication_id, challenge) = service.auth_begin_discoverable().await?;
    Ok(Json(json!({
        "authentication_id": authentication_id.to_string(),
        "options": challenge,
    })))
}

#[utoipa::path(
    post,
    path = "/auth/passkey/signin/verify",
    request_body = PasskeySigninVerifyRequest,
    responses(
        (status = 200, description = "Signed in; session cookie set", body = AuthResponse),
        (status = 400, description = "Ceremony failed or challenge expired", body = ErrorBody),
        (status = 403, description = "Account not approved", body = ErrorBody)
    ),
    tag = "passkeys"
)]
pub async fn signin_verify(
    pool: Extension<PgPool>,
    auth_state: Extension<SharedAuthState>,
    Json(payload): Json<PasskeySigninVerifyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let authentication_id: Uuid = payload
        .authentication_id
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid authentication id"))?;

    let service = auth_state.passkeys();
    let ceremony = service.take_auth_state(authentication_id).await?;

    let (user_id, result) = match ceremony {
        AuthCeremony::Scoped {
            user_id,
            authentication,
        } => {
            let result = service.finish_auth(&payload.credential, &authentication)?;
            (user_id, result)
        }
        AuthCeremony::Discoverable(authentication) => {
            let user_id = service.identify_discoverable(&payload.credential)?;
            let stored = load_stored_passkeys(&pool, user_id).await?;
            let keys: Vec<DiscoverableKey> =
                stored.iter().map(|s| DiscoverableKey::from(&s.passkey)).collect();
            let result =
                service.finish_discoverable_auth(&payload.credential, authentication, &keys)?;
            (user_id, result)
        }
    };

    let user = record_and_resolve_user(&pool, user_id, &result).await?;

    if user.status != STATUS_APPROVED {
        return Err(ApiError::forbidden(
            "account_not_approved",
            "Account is not approved",
        ));
    }

    let config = auth_state.config();
    let new_session = session::create(&pool, user.id, config.session_expiry_days()).await?;
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = session_cookie(config, &new_session.token) {
        response_headers.insert(SET_COOKIE, cookie);
    }

    Ok((
        response_headers,
        Json(AuthResponse {
            message: "Successfully signed in".to_string(),
            user: Some(user.to_response()),
        }),
    ))
}

/// Advance the stored sign counter and resolve the credential's owner.
///
/// The conditional update is the replay gate: a counter that fails to advance
/// leaves the row untouched and the sign-in dead.
async fn record_and_resolve_user(
    pool: &PgPool,
    expected_user_id: Uuid,
    result: &AuthenticationResult,
) -> Result<storage::UserRecord, ApiError> {
    let credential_id = result.cred_id().as_slice();

    let stored = PasskeyRepo::get(pool, credential_id)
        .await
        .map_err(|err| ApiError::internal(&err))?
        .ok_or(PasskeyError::CeremonyInvalid)?;
    if stored.user_id != expected_user_id {
        return Err(PasskeyError::CeremonyInvalid.into());
    }

    let mut stored = stored.into_stored().map_err(|err| ApiError::internal(&err))?;
    let _ = stored.passkey.update_credential(result);
    let passkey_data =
        serialize_passkey(&stored.passkey).map_err(|err| ApiError::internal(&err))?;

    let advanced = PasskeyRepo::record_authentication(
        pool,
        credential_id,
        i64::from(result.counter()),
        &passkey_data,
    )
    .await
    .map_err(|err| ApiError::internal(&err))?;
    if !advanced {
        return Err(PasskeyError::ReplayDetected.into());
    }

    storage::lookup_user_by_id(pool, expected_user_id)
        .await
        .map_err(|err| ApiError::internal(&err))?
        .ok_or_else(|| PasskeyError::CeremonyInvalid.into())
}

#[utoipa::path(
    get,
    path = "/auth/passkeys",
    responses(
        (status = 200, description = "Registered passkeys", body = [PasskeyInfo]),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    tag = "passkeys"
)]
pub async fn list_passkeys(
    headers: HeaderMap,
    pool: Extension<PgPool>,
) -> Result<Json<Vec<PasskeyInfo>>, ApiError> {
    let user = require_user(&headers, &pool).await?;

    let credentials = PasskeyRepo::list_for_user(&pool, user.user_id)
        .await
        .map_err(|err| ApiError::internal(&err))?;

    Ok(Json(
        credentials
            .into_iter()
            .map(|credential| PasskeyInfo {
                id: URL_SAFE_NO_PAD.encode(&credential.credential_id),
                name: credential.name,
                created_at: credential.created_at,
                last_used_at: credential.last_used_at,
            })
            .collect(),
    ))
}

#[utoipa::path(
    delete,
    path = "/auth/passkeys/{id}",
    params(
        ("id" = String, Path, description = "URL-safe base64 credential ID")
    ),
    responses(
        (status = 200, description = "Passkey deleted", body = MessageResponse),
        (status = 404, description = "Passkey not found", body = ErrorBody)
    ),
    tag = "passkeys"
)]
pub async fn delete_passkey(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let user = require_user(&headers, &pool).await?;

    let credential_id = URL_SAFE_NO_PAD
        .decode(id.as_bytes())
        .map_err(|_| ApiError::bad_request("Invalid passkey id"))?;

    let deleted = PasskeyRepo::delete(&pool, user.user_id, &credential_id)
        .await
        .map_err(|err| ApiError::internal(&err))?;
    if !deleted {
        return Err(ApiError::not_found("Passkey not found"));
    }

    Ok(Json(MessageResponse::new("Passkey deleted successfully")))
}

async fn load_stored_passkeys(pool: &PgPool, user_id: Uuid) -> Result<Vec<StoredPasskey>, ApiError> {
    let credentials = PasskeyRepo::list_for_user(pool, user_id)
        .await
        .map_err(|err| ApiError::internal(&err))?;

    credentials
        .into_iter()
        .map(|credential| credential.into_stored())
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(|err| ApiError::internal(&err))
}

fn extract_transports(
    credential: &webauthn_rs::prelude::RegisterPublicKeyCredential,
) -> Option<Vec<String>> {
    credential.response.transports.as_ref().map(|transports| {
        transports
            .iter()
            .filter_map(|transport| serde_json::to_value(transport).ok())
            .filter_map(|value| value.as_str().map(ToString::to_string))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::test_support::{auth_state, lazy_pool};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn register_options_requires_session() -> anyhow::Result<()> {
        let pool = lazy_pool()?;
        let result = register_options(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()?),
        )
        .await;
        let err = result.err().expect("missing session must fail");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn signin_verify_rejects_malformed_id() -> anyhow::Result<()> {
        let pool = lazy_pool()?;
        let credential = serde_json::from_value(serde_json::json!({
            "id": "dummy",
            "rawId": "AA",
            "type": "public-key",
            "extensions": {},
            "response": {
                "authenticatorData": "AA",
                "clientDataJSON": "AA",
                "signature": "AA"
            }
        }))?;
        let result = signin_verify(
            Extension(pool),
            Extension(auth_state()?),
            Json(PasskeySigninVerifyRequest {
                authentication_id: "not-a-uuid".to_string(),
                credential,
            }),
        )
        .await;
        let err = result.err().expect("malformed id must fail");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn signin_verify_unknown_ceremony_is_expired() -> anyhow::Result<()> {
        let pool = lazy_pool()?;
        let credential = serde_json::from_value(serde_json::json!({
            "id": "dummy",
            "rawId": "AA",
            "type": "public-key",
            "extensions": {},
            "response": {
                "authenticatorData": "AA",
                "clientDataJSON": "AA",
                "signature": "AA"
            }
        }))?;
        let result = signin_verify(
            Extension(pool),
            Extension(auth_state()?),
            Json(PasskeySigninVerifyRequest {
                authentication_id: Uuid::new_v4().to_string(),
                credential,
            }),
        )
        .await;
        let err = result.err().expect("unknown ceremony must fail");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "challenge_expired");
        Ok(())
    }
}
