//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{auth, email};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    // Validate mailer arguments relative to the selected provider
    crate::cli::commands::validate(matches).map_err(|e| anyhow::anyhow!(e))?;

    let get = |name: &str| matches.get_one::<String>(name).cloned();

    Ok(Action::Server(Args {
        port,
        dsn,
        app_url: get(auth::ARG_APP_URL).unwrap_or_else(|| "http://localhost:8080".to_string()),
        cookie_domain: get(auth::ARG_COOKIE_DOMAIN),
        accepted_domains: get(auth::ARG_ACCEPTED_DOMAINS),
        default_app_access: get(auth::ARG_DEFAULT_APP_ACCESS)
            .unwrap_or_else(|| "allow".to_string()),
        session_expiry_days: matches
            .get_one::<i64>("session-expiry-days")
            .copied()
            .unwrap_or(30),
        otp_expiry_minutes: matches
            .get_one::<i64>("otp-expiry-minutes")
            .copied()
            .unwrap_or(5),
        otp_max_attempts: matches
            .get_one::<i32>("otp-max-attempts")
            .copied()
            .unwrap_or(5),
        webauthn_rp_id: get("webauthn-rp-id").unwrap_or_else(|| "localhost".to_string()),
        webauthn_rp_name: get("webauthn-rp-name").unwrap_or_else(|| "Gatekeeper".to_string()),
        webauthn_origin: get("webauthn-origin")
            .unwrap_or_else(|| "http://localhost:8080".to_string()),
        webauthn_challenge_ttl_seconds: matches
            .get_one::<u64>("webauthn-challenge-ttl-seconds")
            .copied()
            .unwrap_or(300),
        email_provider: get(email::ARG_EMAIL_PROVIDER).unwrap_or_else(|| "log".to_string()),
        email_from: get(email::ARG_EMAIL_FROM),
        email_from_name: get("email-from-name").unwrap_or_else(|| "Gatekeeper".to_string()),
        smtp_host: get(email::ARG_SMTP_HOST),
        smtp_port: matches.get_one::<u16>("smtp-port").copied().unwrap_or(587),
        smtp_user: get("smtp-user"),
        smtp_password: get("smtp-password"),
        email_api_url: get(email::ARG_EMAIL_API_URL),
        email_api_token: get(email::ARG_EMAIL_API_TOKEN),
        email_outbox_poll_seconds: matches
            .get_one::<u64>("email-outbox-poll-seconds")
            .copied()
            .unwrap_or(5),
        email_outbox_batch_size: matches
            .get_one::<usize>("email-outbox-batch-size")
            .copied()
            .unwrap_or(10),
        email_outbox_max_attempts: matches
            .get_one::<u32>("email-outbox-max-attempts")
            .copied()
            .unwrap_or(5),
        email_outbox_backoff_base_seconds: matches
            .get_one::<u64>("email-outbox-backoff-base-seconds")
            .copied()
            .unwrap_or(5),
        email_outbox_backoff_max_seconds: matches
            .get_one::<u64>("email-outbox-backoff-max-seconds")
            .copied()
            .unwrap_or(300),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::actions::Action;

    #[test]
    fn dsn_required() {
        temp_env::with_vars([("GK_DSN", None::<&str>)], || {
            let command = crate::cli::commands::new();
            let result = command.try_get_matches_from(vec!["gatekeeper"]);
            assert!(result.is_err());
        });
    }

    #[test]
    fn defaults_flow_through() {
        temp_env::with_vars(
            [
                ("GK_COOKIE_DOMAIN", None::<&str>),
                ("GK_ACCEPTED_DOMAINS", None::<&str>),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec![
                    "gatekeeper",
                    "--dsn",
                    "postgres://user@localhost:5432/gatekeeper",
                ]);
                let Ok(Action::Server(args)) = handler(&matches) else {
                    panic!("expected server action");
                };
                assert_eq!(args.port, 8080);
                assert_eq!(args.session_expiry_days, 30);
                assert_eq!(args.otp_expiry_minutes, 5);
                assert_eq!(args.otp_max_attempts, 5);
                assert_eq!(args.default_app_access, "allow");
                assert_eq!(args.email_provider, "log");
                assert!(args.cookie_domain.is_none());
            },
        );
    }

    #[test]
    fn smtp_provider_without_host_rejected() {
        temp_env::with_vars(
            [
                ("GK_SMTP_HOST", None::<&str>),
                ("GK_EMAIL_FROM", None::<&str>),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec![
                    "gatekeeper",
                    "--dsn",
                    "postgres://user@localhost:5432/gatekeeper",
                    "--email-provider",
                    "smtp",
                ]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(err.to_string().contains("--smtp-host"));
                }
            },
        );
    }
}
