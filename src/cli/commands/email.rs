use clap::{Arg, Command, builder::PossibleValuesParser};

pub const ARG_EMAIL_PROVIDER: &str = "email-provider";
pub const ARG_EMAIL_FROM: &str = "email-from";
pub const ARG_SMTP_HOST: &str = "smtp-host";
pub const ARG_EMAIL_API_URL: &str = "email-api-url";
pub const ARG_EMAIL_API_TOKEN: &str = "email-api-token";

pub fn with_args(command: Command) -> Command {
    let command = with_provider_args(command);
    let command = with_smtp_args(command);
    let command = with_api_args(command);
    with_outbox_args(command)
}

fn with_provider_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_EMAIL_PROVIDER)
                .long("email-provider")
                .help("Email delivery backend")
                .env("GK_EMAIL_PROVIDER")
                .default_value("log")
                .value_parser(PossibleValuesParser::new(["log", "smtp", "api"])),
        )
        .arg(
            Arg::new(ARG_EMAIL_FROM)
                .long("email-from")
                .help("From address for outbound email")
                .env("GK_EMAIL_FROM"),
        )
        .arg(
            Arg::new("email-from-name")
                .long("email-from-name")
                .help("Display name for outbound email")
                .env("GK_EMAIL_FROM_NAME")
                .default_value("Gatekeeper"),
        )
}

fn with_smtp_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SMTP_HOST)
                .long("smtp-host")
                .help("SMTP relay hostname")
                .env("GK_SMTP_HOST"),
        )
        .arg(
            Arg::new("smtp-port")
                .long("smtp-port")
                .help("SMTP relay port")
                .env("GK_SMTP_PORT")
                .default_value("587")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("smtp-user")
                .long("smtp-user")
                .help("SMTP username")
                .env("GK_SMTP_USER"),
        )
        .arg(
            Arg::new("smtp-password")
                .long("smtp-password")
                .help("SMTP password")
                .env("GK_SMTP_PASSWORD"),
        )
}

fn with_api_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_EMAIL_API_URL)
                .long("email-api-url")
                .help("Transactional email API endpoint")
                .env("GK_EMAIL_API_URL"),
        )
        .arg(
            Arg::new(ARG_EMAIL_API_TOKEN)
                .long("email-api-token")
                .help("Bearer token for the transactional email API")
                .env("GK_EMAIL_API_TOKEN"),
        )
}

fn with_outbox_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("email-outbox-poll-seconds")
                .long("email-outbox-poll-seconds")
                .help("Email outbox poll interval in seconds")
                .env("GK_EMAIL_OUTBOX_POLL_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("email-outbox-batch-size")
                .long("email-outbox-batch-size")
                .help("Email outbox batch size per poll")
                .env("GK_EMAIL_OUTBOX_BATCH_SIZE")
                .default_value("10")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("email-outbox-max-attempts")
                .long("email-outbox-max-attempts")
                .help("Max attempts before marking an email as failed")
                .env("GK_EMAIL_OUTBOX_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("email-outbox-backoff-base-seconds")
                .long("email-outbox-backoff-base-seconds")
                .help("Base delay for email outbox retry backoff")
                .env("GK_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("email-outbox-backoff-max-seconds")
                .long("email-outbox-backoff-max-seconds")
                .help("Max delay for email outbox retry backoff")
                .env("GK_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}
