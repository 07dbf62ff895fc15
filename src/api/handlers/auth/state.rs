//! Auth configuration and shared handler state.

use anyhow::{Result, anyhow};
use std::sync::Arc;

use crate::webauthn::PasskeyService;

const DEFAULT_SESSION_EXPIRY_DAYS: i64 = 30;
const DEFAULT_OTP_EXPIRY_MINUTES: i64 = 5;
const DEFAULT_OTP_MAX_ATTEMPTS: i32 = 5;

/// Edge decision for app slugs that have no registered app row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefaultAppAccess {
    Allow,
    Deny,
}

impl DefaultAppAccess {
    /// Parse the CLI/env value.
    ///
    /// # Errors
    /// Returns an error for anything but `allow` or `deny`.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            other => Err(anyhow!("invalid default app access policy: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    app_url: String,
    cookie_domain: Option<String>,
    accepted_domains: Vec<String>,
    default_app_access: DefaultAppAccess,
    session_expiry_days: i64,
    otp_expiry_minutes: i64,
    otp_max_attempts: i32,
}

impl AuthConfig {
    #[must_use]
    pub fn new(app_url: String) -> Self {
        Self {
            app_url,
            cookie_domain: None,
            accepted_domains: Vec::new(),
            default_app_access: DefaultAppAccess::Allow,
            session_expiry_days: DEFAULT_SESSION_EXPIRY_DAYS,
            otp_expiry_minutes: DEFAULT_OTP_EXPIRY_MINUTES,
            otp_max_attempts: DEFAULT_OTP_MAX_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_cookie_domain(mut self, domain: Option<String>) -> Self {
        self.cookie_domain = domain.filter(|d| !d.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_accepted_domains(mut self, domains: Vec<String>) -> Self {
        self.accepted_domains = domains;
        self
    }

    #[must_use]
    pub fn with_default_app_access(mut self, policy: DefaultAppAccess) -> Self {
        self.default_app_access = policy;
        self
    }

    #[must_use]
    pub fn with_session_expiry_days(mut self, days: i64) -> Self {
        self.session_expiry_days = days;
        self
    }

    #[must_use]
    pub fn with_otp_expiry_minutes(mut self, minutes: i64) -> Self {
        self.otp_expiry_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_otp_max_attempts(mut self, attempts: i32) -> Self {
        self.otp_max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn cookie_domain(&self) -> Option<&str> {
        self.cookie_domain.as_deref()
    }

    #[must_use]
    pub fn default_app_access(&self) -> DefaultAppAccess {
        self.default_app_access
    }

    #[must_use]
    pub fn session_expiry_days(&self) -> i64 {
        self.session_expiry_days
    }

    #[must_use]
    pub fn otp_expiry_minutes(&self) -> i64 {
        self.otp_expiry_minutes
    }

    #[must_use]
    pub fn otp_max_attempts(&self) -> i32 {
        self.otp_max_attempts
    }

    #[must_use]
    pub fn session_cookie_secure(&self) -> bool {
        self.app_url.starts_with("https://")
    }

    /// Does this email's domain skip admin approval at registration?
    #[must_use]
    pub fn is_accepted_domain(&self, email: &str) -> bool {
        if self.accepted_domains.is_empty() {
            return false;
        }
        email
            .rsplit('@')
            .next()
            .is_some_and(|domain| self.accepted_domains.iter().any(|d| d == &domain.to_lowercase()))
    }
}

pub struct AuthState {
    config: AuthConfig,
    passkeys: PasskeyService,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, passkeys: PasskeyService) -> Self {
        Self { config, passkeys }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn passkeys(&self) -> &PasskeyService {
        &self.passkeys
    }
}

/// Shared handle used by handlers via `Extension`.
pub type SharedAuthState = Arc<AuthState>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_app_access_parses() {
        assert_eq!(
            DefaultAppAccess::parse("allow").ok(),
            Some(DefaultAppAccess::Allow)
        );
        assert_eq!(
            DefaultAppAccess::parse("deny").ok(),
            Some(DefaultAppAccess::Deny)
        );
        assert!(DefaultAppAccess::parse("maybe").is_err());
    }

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new("https://auth.example.com".to_string());
        assert!(config.session_cookie_secure());
        assert_eq!(config.session_expiry_days(), 30);
        assert_eq!(config.otp_expiry_minutes(), 5);
        assert_eq!(config.otp_max_attempts(), 5);
        assert!(config.cookie_domain().is_none());

        let config = config
            .with_cookie_domain(Some(".example.com".to_string()))
            .with_session_expiry_days(7)
            .with_otp_expiry_minutes(10)
            .with_otp_max_attempts(3)
            .with_default_app_access(DefaultAppAccess::Deny);
        assert_eq!(config.cookie_domain(), Some(".example.com"));
        assert_eq!(config.session_expiry_days(), 7);
        assert_eq!(config.otp_expiry_minutes(), 10);
        assert_eq!(config.otp_max_attempts(), 3);
        assert_eq!(config.default_app_access(), DefaultAppAccess::Deny);
    }

    #[test]
    fn blank_cookie_domain_is_dropped() {
        let config = AuthConfig::new("http://localhost:8080".to_string())
            .with_cookie_domain(Some("  ".to_string()));
        assert!(config.cookie_domain().is_none());
        assert!(!config.session_cookie_secure());
    }

    #[test]
    fn accepted_domain_matching() {
        let config = AuthConfig::new("http://localhost:8080".to_string())
            .with_accepted_domains(vec!["example.com".to_string()]);
        assert!(config.is_accepted_domain("alice@example.com"));
        assert!(config.is_accepted_domain("alice@EXAMPLE.com"));
        assert!(!config.is_accepted_domain("alice@other.com"));

        let empty = AuthConfig::new("http://localhost:8080".to_string());
        assert!(!empty.is_accepted_domain("alice@example.com"));
    }
}
