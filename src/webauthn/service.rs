//! Ceremony state machine for passkey registration and authentication.
//!
//! Flow overview:
//! 1) A begin call issues a browser challenge and parks the protocol state
//!    under a fresh UUID.
//! 2) The matching finish call consumes the state (single use) and verifies
//!    the authenticator response against it.
//! 3) Authentication supports two shapes: scoped to a known user's
//!    credentials, or discoverable (no email given, the authenticator names
//!    the account).
//!
//! States expire after a short TTL and are pruned on every map access; an
//! expired or already-consumed state fails the ceremony with
//! [`PasskeyError::ChallengeExpired`].

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;
use uuid::Uuid;
use webauthn_rs::prelude::*;

#[derive(Debug, Error)]
pub enum PasskeyError {
    #[error("ceremony challenge expired or unknown")]
    ChallengeExpired,
    #[error("ceremony verification failed")]
    CeremonyInvalid,
    #[error("signature counter did not advance")]
    ReplayDetected,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Clone, Debug)]
pub struct PasskeyConfig {
    rp_id: String,
    rp_name: String,
    origin: String,
    challenge_ttl: Duration,
}

impl PasskeyConfig {
    /// Create a new passkey configuration.
    ///
    /// # Errors
    /// Returns error if the RP ID is empty or the origin is not a valid URL.
    pub fn new(
        rp_id: String,
        rp_name: String,
        origin: String,
        challenge_ttl: Duration,
    ) -> Result<Self> {
        if rp_id.trim().is_empty() {
            return Err(anyhow!("WebAuthn RP ID must not be empty"));
        }
        Url::parse(&origin).with_context(|| format!("Invalid WebAuthn origin: {origin}"))?;

        Ok(Self {
            rp_id,
            rp_name,
            origin,
            challenge_ttl,
        })
    }

    #[must_use]
    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    #[must_use]
    pub fn rp_name(&self) -> &str {
        &self.rp_name
    }

    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    #[must_use]
    pub fn challenge_ttl(&self) -> Duration {
        self.challenge_ttl
    }
}

struct RegistrationState {
    user_id: Uuid,
    created_at: Instant,
    registration: PasskeyRegistration,
}

enum AuthenticationState {
    Scoped {
        user_id: Uuid,
        authentication: PasskeyAuthentication,
    },
    Discoverable(DiscoverableAuthentication),
}

struct AuthenticationEntry {
    created_at: Instant,
    state: AuthenticationState,
}

/// A consumed authentication ceremony, ready for its finish step.
pub enum AuthCeremony {
    /// Challenge issued against one user's known credentials.
    Scoped {
        user_id: Uuid,
        authentication: PasskeyAuthentication,
    },
    /// Discoverable challenge; the response names the account.
    Discoverable(DiscoverableAuthentication),
}

pub struct PasskeyService {
    config: PasskeyConfig,
    webauthn: Webauthn,
    reg_states: Mutex<HashMap<Uuid, RegistrationState>>,
    auth_states: Mutex<HashMap<Uuid, AuthenticationEntry>>,
}

impl PasskeyService {
    /// Create a new passkey service.
    ///
    /// # Errors
    /// Returns error if the `WebAuthn` builder fails.
    pub fn new(config: PasskeyConfig) -> Result<Self> {
        let rp_origin_url = Url::parse(config.origin())
            .with_context(|| format!("Invalid WebAuthn origin: {}", config.origin()))?;
        let webauthn = WebauthnBuilder::new(config.rp_id(), &rp_origin_url)?
            .rp_name(config.rp_name())
            .build()?;

        Ok(Self {
            config,
            webauthn,
            reg_states: Mutex::new(HashMap::new()),
            auth_states: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn config(&self) -> &PasskeyConfig {
        &self.config
    }

    /// Begin passkey registration for a user.
    ///
    /// Existing credential IDs are excluded so the same authenticator cannot
    /// be registered twice.
    ///
    /// # Errors
    /// Returns error if challenge generation fails.
    pub async fn register_begin(
        &self,
        user_id: Uuid,
        email: &str,
        display_name: &str,
        exclude_credentials: Vec<CredentialID>,
    ) -> Result<(Uuid, CreationChallengeResponse), PasskeyError> {
        let (challenge, registration) = self
            .webauthn
            .start_passkey_registration(user_id, email, display_name, Some(exclude_credentials))
            .map_err(|_| PasskeyError::CeremonyInvalid)?;

        let reg_id = Uuid::new_v4();
        let mut states = self.reg_states.lock().await;
        prune(&mut states, self.config.challenge_ttl(), |s| s.created_at);
        states.insert(
            reg_id,
            RegistrationState {
                user_id,
                created_at: Instant::now(),
                registration,
            },
        );

        Ok((reg_id, challenge))
    }

    /// Finish passkey registration after verifying the client response.
    ///
    /// The parked state is consumed whatever the outcome.
    ///
    /// # Errors
    /// `ChallengeExpired` if the state is missing or timed out,
    /// `CeremonyInvalid` if it belongs to another user or verification fails.
    pub async fn register_finish(
        &self,
        reg_id: Uuid,
        user_id: Uuid,
        response: &RegisterPublicKeyCredential,
    ) -> Result<Passkey, PasskeyError> {
        let state = {
            let mut states = self.reg_states.lock().await;
            prune(&mut states, self.config.challenge_ttl(), |s| s.created_at);
            states.remove(&reg_id).ok_or(PasskeyError::ChallengeExpired)?
        };

        if state.created_at.elapsed() >= self.config.challenge_ttl() {
            return Err(PasskeyError::ChallengeExpired);
        }
        if state.user_id != user_id {
            return Err(PasskeyError::CeremonyInvalid);
        }

        self.webauthn
            .finish_passkey_registration(response, &state.registration)
            .map_err(|_| PasskeyError::CeremonyInvalid)
    }

    /// Begin authentication scoped to one user's known credentials.
    ///
    /// # Errors
    /// `CeremonyInvalid` when the user has no usable credentials.
    pub async fn auth_begin(
        &self,
        user_id: Uuid,
        passkeys: &[Passkey],
    ) -> Result<(Uuid, RequestChallengeResponse), PasskeyError> {
        let (challenge, authentication) = self
            .webauthn
            .start_passkey_authentication(passkeys)
            .map_err(|_| PasskeyError::CeremonyInvalid)?;

        let auth_id = self
            .park_auth(AuthenticationState::Scoped {
                user_id,
                authentication,
            })
            .await;

        Ok((auth_id, challenge))
    }

    /// Begin a discoverable authentication (no email supplied).
    ///
    /// # Errors
    /// `CeremonyInvalid` if challenge generation fails.
    pub async fn auth_begin_discoverable(
        &self,
    ) -> Result<(Uuid, RequestChallengeResponse), PasskeyError> {
        let (challenge, authentication) = self
            .webauthn
            .start_discoverable_authentication()
            .map_err(|_| PasskeyError::CeremonyInvalid)?;

        let auth_id = self
            .park_auth(AuthenticationState::Discoverable(authentication))
            .await;

        Ok((auth_id, challenge))
    }

    /// Consume a parked authentication ceremony (single use).
    ///
    /// # Errors
    /// `ChallengeExpired` if the state is missing or timed out.
    pub async fn take_auth_state(&self, auth_id: Uuid) -> Result<AuthCeremony, PasskeyError> {
        let entry = {
            let mut states = self.auth_states.lock().await;
            prune(&mut states, self.config.challenge_ttl(), |s| s.created_at);
            states
                .remove(&auth_id)
                .ok_or(PasskeyError::ChallengeExpired)?
        };

        if entry.created_at.elapsed() >= self.config.challenge_ttl() {
            return Err(PasskeyError::ChallengeExpired);
        }

        Ok(match entry.state {
            AuthenticationState::Scoped {
                user_id,
                authentication,
            } => AuthCeremony::Scoped {
                user_id,
                authentication,
            },
            AuthenticationState::Discoverable(authentication) => {
                AuthCeremony::Discoverable(authentication)
            }
        })
    }

    /// Verify a scoped authentication response.
    ///
    /// # Errors
    /// `CeremonyInvalid` if the signature does not verify.
    pub fn finish_auth(
        &self,
        response: &PublicKeyCredential,
        authentication: &PasskeyAuthentication,
    ) -> Result<AuthenticationResult, PasskeyError> {
        self.webauthn
            .finish_passkey_authentication(response, authentication)
            .map_err(|_| PasskeyError::CeremonyInvalid)
    }

    /// Resolve which account a discoverable response claims to be.
    ///
    /// # Errors
    /// `CeremonyInvalid` if the response carries no usable user handle.
    pub fn identify_discoverable(
        &self,
        response: &PublicKeyCredential,
    ) -> Result<Uuid, PasskeyError> {
        let (user_id, _credential_id) = self
            .webauthn
            .identify_discoverable_authentication(response)
            .map_err(|_| PasskeyError::CeremonyInvalid)?;
        Ok(user_id)
    }

    /// Verify a discoverable authentication response against the user's keys.
    ///
    /// # Errors
    /// `CeremonyInvalid` if the signature does not verify.
    pub fn finish_discoverable_auth(
        &self,
        response: &PublicKeyCredential,
        authentication: DiscoverableAuthentication,
        keys: &[DiscoverableKey],
    ) -> Result<AuthenticationResult, PasskeyError> {
        self.webauthn
            .finish_discoverable_authentication(response, authentication, keys)
            .map_err(|_| PasskeyError::CeremonyInvalid)
    }

    async fn park_auth(&self, state: AuthenticationState) -> Uuid {
        let auth_id = Uuid::new_v4();
        let mut states = self.auth_states.lock().await;
        prune(&mut states, self.config.challenge_ttl(), |s| s.created_at);
        states.insert(
            auth_id,
            AuthenticationEntry {
                created_at: Instant::now(),
                state,
            },
        );
        auth_id
    }
}

fn prune<V>(states: &mut HashMap<Uuid, V>, ttl: Duration, created_at: impl Fn(&V) -> Instant) {
    states.retain(|_, entry| created_at(entry).elapsed() < ttl);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_service() -> Result<PasskeyService> {
        let config = PasskeyConfig::new(
            "example.com".to_string(),
            "Example".to_string(),
            "https://example.com".to_string(),
            Duration::from_secs(120),
        )?;
        PasskeyService::new(config)
    }

    fn dummy_auth_credential() -> Result<PublicKeyCredential> {
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
        Ok(credential)
    }

    #[test]
    fn config_rejects_empty_rp_id() {
        let result = PasskeyConfig::new(
            "  ".to_string(),
            "Example".to_string(),
            "https://example.com".to_string(),
            Duration::from_secs(60),
        );
        assert!(result.is_err());
    }

    #[test]
    fn config_rejects_invalid_origin() {
        let result = PasskeyConfig::new(
            "example.com".to_string(),
            "Example".to_string(),
            "not a url".to_string(),
            Duration::from_secs(60),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn auth_state_is_single_use() -> Result<()> {
        let service = test_service()?;
        let (auth_id, _challenge) = service
            .auth_begin_discoverable()
            .await
            .map_err(|err| anyhow!("begin failed: {err}"))?;

        assert!(service.take_auth_state(auth_id).await.is_ok());
        let second = service.take_auth_state(auth_id).await;
        assert!(matches!(second, Err(PasskeyError::ChallengeExpired)));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_auth_state_is_expired() -> Result<()> {
        let service = test_service()?;
        let result = service.take_auth_state(Uuid::new_v4()).await;
        assert!(matches!(result, Err(PasskeyError::ChallengeExpired)));
        Ok(())
    }

    #[tokio::test]
    async fn registration_state_is_consumed_on_finish_failure() -> Result<()> {
        let service = test_service()?;
        let user_id = Uuid::new_v4();
        let (reg_id, _challenge) = service
            .register_begin(user_id, "user@example.com", "Example User", Vec::new())
            .await
            .map_err(|err| anyhow!("begin failed: {err}"))?;

        let credential = serde_json::from_value(serde_json::json!({
            "id": "dummy",
            "rawId": "AA",
            "type": "public-key",
            "extensions": {},
            "response": {
                "attestationObject": "AA",
                "clientDataJSON": "AA"
            }
        }))?;

        // Garbage response: verification fails but the state is still burned.
        let first = service.register_finish(reg_id, user_id, &credential).await;
        assert!(matches!(first, Err(PasskeyError::CeremonyInvalid)));

        let second = service.register_finish(reg_id, user_id, &credential).await;
        assert!(matches!(second, Err(PasskeyError::ChallengeExpired)));
        Ok(())
    }

    #[tokio::test]
    async fn register_finish_rejects_user_mismatch() -> Result<()> {
        let service = test_service()?;
        let user_id = Uuid::new_v4();
        let (reg_id, _challenge) = service
            .register_begin(user_id, "user@example.com", "Example User", Vec::new())
            .await
            .map_err(|err| anyhow!("begin failed: {err}"))?;

        let credential = serde_json::from_value(serde_json::json!({
            "id": "dummy",
            "rawId": "AA",
            "type": "public-key",
            "extensions": {},
            "response": {
                "attestationObject": "AA",
                "clientDataJSON": "AA"
            }
        }))?;

        let result = service
            .register_finish(reg_id, Uuid::new_v4(), &credential)
            .await;
        assert!(matches!(result, Err(PasskeyError::CeremonyInvalid)));
        Ok(())
    }

    #[tokio::test]
    async fn scoped_finish_with_garbage_response_fails_closed() -> Result<()> {
        let service = test_service()?;
        let (auth_id, _challenge) = service
            .auth_begin_discoverable()
            .await
            .map_err(|err| anyhow!("begin failed: {err}"))?;

        let ceremony = service
            .take_auth_state(auth_id)
            .await
            .map_err(|err| anyhow!("take failed: {err}"))?;
        let AuthCeremony::Discoverable(state) = ceremony else {
            return Err(anyhow!("expected discoverable ceremony"));
        };

        let credential = dummy_auth_credential()?;
        let result = service.finish_discoverable_auth(&credential, state, &[]);
        assert!(matches!(result, Err(PasskeyError::CeremonyInvalid)));
        Ok(())
    }
}
