use crate::{
    api,
    api::email::{EmailWorkerConfig, HttpApiSender, LogSender, SenderIdentity, SmtpSender},
    api::handlers::auth::{AuthConfig, AuthState, DefaultAppAccess},
    webauthn::{PasskeyConfig, PasskeyService},
};
use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;
use std::sync::Arc;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub app_url: String,
    pub cookie_domain: Option<String>,
    pub accepted_domains: Option<String>,
    pub default_app_access: String,
    pub session_expiry_days: i64,
    pub otp_expiry_minutes: i64,
    pub otp_max_attempts: i32,
    pub webauthn_rp_id: String,
    pub webauthn_rp_name: String,
    pub webauthn_origin: String,
    pub webauthn_challenge_ttl_seconds: u64,
    pub email_provider: String,
    pub email_from: Option<String>,
    pub email_from_name: String,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub email_api_url: Option<String>,
    pub email_api_token: Option<String>,
    pub email_outbox_poll_seconds: u64,
    pub email_outbox_batch_size: usize,
    pub email_outbox_max_attempts: u32,
    pub email_outbox_backoff_base_seconds: u64,
    pub email_outbox_backoff_max_seconds: u64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if configuration is inconsistent or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let mailer = build_mailer(&args)?;

    let default_app_access = DefaultAppAccess::parse(&args.default_app_access)?;
    let accepted_domains = args
        .accepted_domains
        .as_deref()
        .map(split_domains)
        .unwrap_or_default();

    let auth_config = AuthConfig::new(args.app_url)
        .with_cookie_domain(args.cookie_domain)
        .with_accepted_domains(accepted_domains)
        .with_default_app_access(default_app_access)
        .with_session_expiry_days(args.session_expiry_days)
        .with_otp_expiry_minutes(args.otp_expiry_minutes)
        .with_otp_max_attempts(args.otp_max_attempts);

    let passkey_config = PasskeyConfig::new(
        args.webauthn_rp_id,
        args.webauthn_rp_name,
        args.webauthn_origin,
        std::time::Duration::from_secs(args.webauthn_challenge_ttl_seconds),
    )?;
    let passkeys = PasskeyService::new(passkey_config)?;

    let auth_state = Arc::new(AuthState::new(auth_config, passkeys));

    let email_config = EmailWorkerConfig::new()
        .with_poll_interval_seconds(args.email_outbox_poll_seconds)
        .with_batch_size(args.email_outbox_batch_size)
        .with_max_attempts(args.email_outbox_max_attempts)
        .with_backoff_base_seconds(args.email_outbox_backoff_base_seconds)
        .with_backoff_max_seconds(args.email_outbox_backoff_max_seconds);

    api::new(args.port, args.dsn, auth_state, mailer, email_config).await
}

fn build_mailer(args: &Args) -> Result<Arc<dyn api::email::EmailSender>> {
    let identity = || -> Result<SenderIdentity> {
        let from_email = args
            .email_from
            .clone()
            .ok_or_else(|| anyhow!("--email-from is required for this provider"))?;
        Ok(SenderIdentity::new(from_email, args.email_from_name.clone()))
    };

    match args.email_provider.as_str() {
        "smtp" => {
            let host = args
                .smtp_host
                .clone()
                .context("missing required argument: --smtp-host")?;
            let password = args.smtp_password.clone().map(SecretString::from);
            let sender = SmtpSender::new(
                identity()?,
                &host,
                args.smtp_port,
                args.smtp_user.clone(),
                password,
            )?;
            Ok(Arc::new(sender))
        }
        "api" => {
            let url = args
                .email_api_url
                .clone()
                .context("missing required argument: --email-api-url")?;
            let token = args
                .email_api_token
                .clone()
                .map(SecretString::from)
                .context("missing required argument: --email-api-token")?;
            let sender = HttpApiSender::new(identity()?, url, token)?;
            Ok(Arc::new(sender))
        }
        _ => Ok(Arc::new(LogSender)),
    }
}

fn split_domains(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|domain| !domain.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_domains_trims_and_lowercases() {
        let domains = split_domains(" Example.COM , corp.dev ,, ");
        assert_eq!(domains, vec!["example.com", "corp.dev"]);
    }

    #[test]
    fn split_domains_empty_input() {
        assert!(split_domains("").is_empty());
    }
}
