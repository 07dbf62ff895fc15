use clap::{Arg, Command, builder::PossibleValuesParser};

pub const ARG_APP_URL: &str = "app-url";
pub const ARG_COOKIE_DOMAIN: &str = "cookie-domain";
pub const ARG_ACCEPTED_DOMAINS: &str = "accepted-domains";
pub const ARG_DEFAULT_APP_ACCESS: &str = "default-app-access";

pub fn with_args(command: Command) -> Command {
    let command = with_cookie_args(command);
    let command = with_otp_args(command);
    let command = with_access_args(command);
    with_webauthn_args(command)
}

fn with_cookie_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_APP_URL)
                .long("app-url")
                .help("External URL of this service, used for the Secure cookie flag")
                .env("GK_APP_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new(ARG_COOKIE_DOMAIN)
                .long("cookie-domain")
                .help("Session cookie Domain attribute, e.g. .example.com for multi-app SSO")
                .env("GK_COOKIE_DOMAIN"),
        )
        .arg(
            Arg::new("session-expiry-days")
                .long("session-expiry-days")
                .help("Absolute session lifetime in days")
                .env("GK_SESSION_EXPIRY_DAYS")
                .default_value("30")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_otp_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("otp-expiry-minutes")
                .long("otp-expiry-minutes")
                .help("One-time code lifetime in minutes")
                .env("GK_OTP_EXPIRY_MINUTES")
                .default_value("5")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("otp-max-attempts")
                .long("otp-max-attempts")
                .help("Verification attempts before a one-time code is burned")
                .env("GK_OTP_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(i32)),
        )
}

fn with_access_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCEPTED_DOMAINS)
                .long("accepted-domains")
                .help("Comma-separated email domains that skip admin approval at registration")
                .env("GK_ACCEPTED_DOMAINS"),
        )
        .arg(
            Arg::new(ARG_DEFAULT_APP_ACCESS)
                .long("default-app-access")
                .help("Edge decision for slugs with no registered app: allow or deny")
                .env("GK_DEFAULT_APP_ACCESS")
                .default_value("allow")
                .value_parser(PossibleValuesParser::new(["allow", "deny"])),
        )
}

fn with_webauthn_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("webauthn-rp-id")
                .long("webauthn-rp-id")
                .help("WebAuthn relying party ID (registrable domain)")
                .env("GK_WEBAUTHN_RP_ID")
                .default_value("localhost"),
        )
        .arg(
            Arg::new("webauthn-rp-name")
                .long("webauthn-rp-name")
                .help("WebAuthn relying party display name")
                .env("GK_WEBAUTHN_RP_NAME")
                .default_value("Gatekeeper"),
        )
        .arg(
            Arg::new("webauthn-origin")
                .long("webauthn-origin")
                .help("Origin the browser reports during ceremonies")
                .env("GK_WEBAUTHN_ORIGIN")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new("webauthn-challenge-ttl-seconds")
                .long("webauthn-challenge-ttl-seconds")
                .help("TTL for in-flight ceremony challenges")
                .env("GK_WEBAUTHN_CHALLENGE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}
