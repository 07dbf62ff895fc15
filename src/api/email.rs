//! Email outbox worker and delivery backends.
//!
//! Auth and access flows enqueue rows in `email_outbox` inside the same
//! transaction as the state change they announce. A background task
//! periodically polls that table, locks a batch via `FOR UPDATE SKIP LOCKED`,
//! renders each row's template, and hands it to an [`EmailSender`]. The
//! worker then updates the row to `sent`, or reschedules it with exponential
//! backoff and jitter until a max attempt threshold marks it `failed`.
//!
//! Because the request path only ever writes an outbox row, code issuance and
//! grant notifications never block on — or leak the result of — an actual
//! delivery attempt.
//!
//! Three senders exist, chosen by configuration:
//! - [`SmtpSender`]: direct SMTP relay via `lettre`.
//! - [`HttpApiSender`]: transactional-email HTTP API via `reqwest`.
//! - [`LogSender`]: local dev, logs the payload and reports success.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use lettre::{
    Message, SmtpTransport, Transport, message::header::ContentType,
    transport::smtp::authentication::Credentials,
};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

/// Email delivery abstraction used by the outbox worker.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to schedule a retry.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// From address and display name shared by the real senders.
#[derive(Clone, Debug)]
pub struct SenderIdentity {
    from_email: String,
    from_name: String,
}

impl SenderIdentity {
    #[must_use]
    pub fn new(from_email: String, from_name: String) -> Self {
        Self {
            from_email,
            from_name,
        }
    }

    fn mailbox(&self) -> String {
        if self.from_name.is_empty() {
            self.from_email.clone()
        } else {
            format!("{} <{}>", self.from_name, self.from_email)
        }
    }
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogSender;

#[async_trait]
impl EmailSender for LogSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            payload = %message.payload_json,
            "email outbox send stub"
        );
        Ok(())
    }
}

/// Direct SMTP delivery.
pub struct SmtpSender {
    transport: SmtpTransport,
    identity: SenderIdentity,
}

impl SmtpSender {
    /// Build a relay transport for the configured host.
    ///
    /// # Errors
    /// Returns error if the relay hostname is invalid.
    pub fn new(
        identity: SenderIdentity,
        host: &str,
        port: u16,
        user: Option<String>,
        password: Option<SecretString>,
    ) -> Result<Self> {
        let mut builder = SmtpTransport::relay(host)
            .with_context(|| format!("Invalid SMTP relay host: {host}"))?
            .port(port)
            .timeout(Some(Duration::from_secs(10)));

        if let (Some(user), Some(password)) = (user, password) {
            builder = builder.credentials(Credentials::new(
                user,
                password.expose_secret().to_string(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            identity,
        })
    }
}

#[async_trait]
impl EmailSender for SmtpSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let rendered = render(&message.template, &message.payload_json)?;
        let email = Message::builder()
            .from(
                self.identity
                    .mailbox()
                    .parse()
                    .context("invalid from address")?,
            )
            .to(message.to_email.parse().context("invalid to address")?)
            .subject(rendered.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(rendered.body)
            .context("failed to build email")?;

        // The SMTP transport blocks; keep it off the async worker thread.
        let transport = self.transport.clone();
        let result = tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .context("smtp send task failed")?;

        result.map(|_| ()).context("smtp delivery failed")
    }
}

/// Transactional-email HTTP API delivery.
pub struct HttpApiSender {
    client: reqwest::Client,
    url: String,
    token: SecretString,
    identity: SenderIdentity,
}

impl HttpApiSender {
    /// Build a JSON API client for the configured endpoint.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be constructed.
    pub fn new(identity: SenderIdentity, url: String, token: SecretString) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build email API client")?;

        Ok(Self {
            client,
            url,
            token,
            identity,
        })
    }
}

#[async_trait]
impl EmailSender for HttpApiSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let rendered = render(&message.template, &message.payload_json)?;
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.token.expose_secret())
            .json(&serde_json::json!({
                "from": self.identity.mailbox(),
                "to": [message.to_email],
                "subject": rendered.subject,
                "text": rendered.body,
            }))
            .send()
            .await
            .context("email API request failed")?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(anyhow!("email API returned {status}: {body}"))
        }
    }
}

struct RenderedEmail {
    subject: String,
    body: String,
}

/// Render an outbox row into subject and body.
///
/// # Errors
/// Returns error for unknown templates or malformed payloads; those rows end
/// up `failed` after the retry budget rather than crashing the worker.
fn render(template: &str, payload_json: &str) -> Result<RenderedEmail> {
    let payload: Value =
        serde_json::from_str(payload_json).context("invalid email payload JSON")?;
    let field = |key: &str| -> String {
        payload
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let rendered = match template {
        "signin_code" | "register_code" => {
            let action = if template == "signin_code" {
                "sign in"
            } else {
                "finish registering"
            };
            RenderedEmail {
                subject: format!("Your verification code: {}", field("code")),
                body: format!(
                    "Use this code to {action}:\n\n    {}\n\nIt expires in {} minutes. \
                     If you didn't request it, you can ignore this email.",
                    field("code"),
                    field("expires_minutes"),
                ),
            }
        }
        "registration_pending" => RenderedEmail {
            subject: "Registration received".to_string(),
            body: "Your registration is waiting for administrator approval. \
                   You'll get another email once it has been reviewed."
                .to_string(),
        },
        "registration_approved" => RenderedEmail {
            subject: "Registration approved".to_string(),
            body: "Your account has been approved. You can now sign in.".to_string(),
        },
        "admin_pending_registration" => RenderedEmail {
            subject: format!("New registration pending: {}", field("requester_email")),
            body: format!(
                "{} registered and is waiting for approval.",
                field("requester_email"),
            ),
        },
        "access_granted" => RenderedEmail {
            subject: format!("Access granted: {}", field("app_name")),
            body: format!(
                "{} gave you access to {}.{}",
                field("granted_by"),
                field("app_name"),
                match payload.get("app_url").and_then(Value::as_str) {
                    Some(url) if !url.is_empty() => format!("\n\nOpen it here: {url}"),
                    _ => String::new(),
                },
            ),
        },
        "admin_access_request" => RenderedEmail {
            subject: format!(
                "Access request: {} -> {}",
                field("requester_email"),
                field("app_name"),
            ),
            body: format!(
                "{} requested access to {}.{}",
                field("requester_email"),
                field("app_name"),
                match payload.get("message").and_then(Value::as_str) {
                    Some(msg) if !msg.is_empty() => format!("\n\nMessage:\n{msg}"),
                    _ => String::new(),
                },
            ),
        },
        other => return Err(anyhow!("unknown email template: {other}")),
    };

    Ok(rendered)
}

/// Queue an email inside the caller's transaction.
///
/// # Errors
/// Returns error if the insert fails.
pub async fn enqueue(
    tx: &mut Transaction<'_, Postgres>,
    to_email: &str,
    template: &str,
    payload: &Value,
) -> Result<()> {
    let payload_text = serde_json::to_string(payload).context("failed to serialize email payload")?;

    let query = r"
        INSERT INTO email_outbox (to_email, template, payload_json)
        VALUES ($1, $2, $3::jsonb)
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(to_email)
        .bind(template)
        .bind(payload_text)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert email outbox row")?;
    Ok(())
}

#[derive(Clone, Copy, Debug)]
pub struct EmailWorkerConfig {
    poll_interval: Duration,
    batch_size: usize,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl EmailWorkerConfig {
    /// Default worker config: 5s poll interval, 10 messages per batch,
    /// 5 max attempts, and 5s->5m exponential backoff with jitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base_seconds(mut self, seconds: u64) -> Self {
        self.backoff_base = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_backoff_max_seconds(mut self, seconds: u64) -> Self {
        self.backoff_max = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let poll_interval = if self.poll_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.poll_interval
        };
        let batch_size = if self.batch_size == 0 {
            1
        } else {
            self.batch_size
        };
        let max_attempts = self.max_attempts.max(1);
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_secs(1)
        } else {
            self.backoff_base
        };
        let backoff_max = if self.backoff_max < backoff_base {
            backoff_base
        } else {
            self.backoff_max
        };
        Self {
            poll_interval,
            batch_size,
            max_attempts,
            backoff_base,
            backoff_max,
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }
}

impl Default for EmailWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a background task that polls and processes the email outbox.
pub fn spawn_outbox_worker(
    pool: PgPool,
    sender: Arc<dyn EmailSender>,
    config: EmailWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = config.normalize();
        let poll_interval = config.poll_interval();

        loop {
            let batch_result = process_outbox_batch(&pool, sender.as_ref(), &config).await;
            if let Err(err) = batch_result {
                error!("email outbox batch failed: {err}");
            }

            sleep(poll_interval).await;
        }
    })
}

async fn process_outbox_batch(
    pool: &PgPool,
    sender: &dyn EmailSender,
    config: &EmailWorkerConfig,
) -> Result<usize> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start email outbox transaction")?;

    // Grab a locked batch so multiple workers can run without double-sending.
    let query = r"
        SELECT id, to_email, template, payload_json::text AS payload_json, attempts
        FROM email_outbox
        WHERE status = 'pending'
          AND next_attempt_at <= NOW()
        ORDER BY next_attempt_at ASC, created_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(i64::try_from(config.batch_size()).unwrap_or(0))
        .fetch_all(&mut *tx)
        .instrument(span)
        .await
        .context("failed to load email outbox batch")?;

    if rows.is_empty() {
        tx.commit()
            .await
            .context("failed to commit empty outbox batch")?;
        return Ok(0);
    }

    let row_count = rows.len();
    for row in rows {
        let id: Uuid = row.get("id");
        let attempts: i32 = row.get("attempts");
        let attempts = u32::try_from(attempts).unwrap_or(0);
        let message = EmailMessage {
            to_email: row.get("to_email"),
            template: row.get("template"),
            payload_json: row.get("payload_json"),
        };

        let send_result = sender.send(&message).await;
        update_outbox_status(&mut tx, id, attempts, send_result, config).await?;
    }

    tx.commit()
        .await
        .context("failed to commit email outbox batch")?;

    Ok(row_count)
}

async fn update_outbox_status(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    attempts: u32,
    send_result: Result<()>,
    config: &EmailWorkerConfig,
) -> Result<()> {
    let next_attempt = attempts.saturating_add(1);
    let next_attempts_i32 = i32::try_from(next_attempt).unwrap_or(i32::MAX);
    match send_result {
        Ok(()) => {
            let query = r"
                UPDATE email_outbox
                SET status = 'sent',
                    attempts = $2,
                    last_error = NULL,
                    sent_at = NOW(),
                    next_attempt_at = NOW()
                WHERE id = $1
            ";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(id)
                .bind(next_attempts_i32)
                .execute(&mut **tx)
                .instrument(span)
                .await
                .context("failed to update outbox status to sent")?;
        }
        Err(err) => {
            let max_attempts = config.max_attempts();
            if next_attempt >= max_attempts {
                let query = r"
                    UPDATE email_outbox
                    SET status = 'failed',
                        attempts = $2,
                        last_error = $3,
                        next_attempt_at = NOW()
                    WHERE id = $1
                ";
                let span = info_span!(
                    "db.query",
                    db.system = "postgresql",
                    db.operation = "UPDATE",
                    db.statement = query
                );
                sqlx::query(query)
                    .bind(id)
                    .bind(next_attempts_i32)
                    .bind(err.to_string())
                    .execute(&mut **tx)
                    .instrument(span)
                    .await
                    .context("failed to update outbox status to failed")?;
            } else {
                let delay =
                    backoff_delay(next_attempt, config.backoff_base(), config.backoff_max());
                let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
                let query = r"
                    UPDATE email_outbox
                    SET status = 'pending',
                        attempts = $2,
                        last_error = $3,
                        next_attempt_at = NOW() + ($4 * INTERVAL '1 millisecond')
                    WHERE id = $1
                ";
                let span = info_span!(
                    "db.query",
                    db.system = "postgresql",
                    db.operation = "UPDATE",
                    db.statement = query
                );
                sqlx::query(query)
                    .bind(id)
                    .bind(next_attempts_i32)
                    .bind(err.to_string())
                    .bind(delay_ms)
                    .execute(&mut **tx)
                    .instrument(span)
                    .await
                    .context("failed to update outbox retry schedule")?;
            }
        }
    }

    Ok(())
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    let capped = if delay > max { max } else { delay };
    jitter_delay(capped)
}

fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_code_templates() -> Result<()> {
        let payload = r#"{"code":"123456","expires_minutes":"5"}"#;
        let rendered = render("signin_code", payload)?;
        assert!(rendered.subject.contains("123456"));
        assert!(rendered.body.contains("sign in"));

        let rendered = render("register_code", payload)?;
        assert!(rendered.body.contains("finish registering"));
        Ok(())
    }

    #[test]
    fn render_access_granted_with_and_without_url() -> Result<()> {
        let with_url =
            r#"{"app_name":"docs","granted_by":"admin@example.com","app_url":"https://docs.example.com"}"#;
        let rendered = render("access_granted", with_url)?;
        assert!(rendered.body.contains("https://docs.example.com"));

        let without_url = r#"{"app_name":"docs","granted_by":"admin@example.com"}"#;
        let rendered = render("access_granted", without_url)?;
        assert!(!rendered.body.contains("Open it here"));
        Ok(())
    }

    #[test]
    fn render_rejects_unknown_template() {
        assert!(render("totally_unknown", "{}").is_err());
    }

    #[test]
    fn render_rejects_bad_payload() {
        assert!(render("signin_code", "not json").is_err());
    }

    #[test]
    fn sender_identity_mailbox_formats() {
        let named = SenderIdentity::new("auth@example.com".to_string(), "Gatekeeper".to_string());
        assert_eq!(named.mailbox(), "Gatekeeper <auth@example.com>");

        let bare = SenderIdentity::new("auth@example.com".to_string(), String::new());
        assert_eq!(bare.mailbox(), "auth@example.com");
    }

    #[test]
    fn worker_config_normalizes_zeroes() {
        let config = EmailWorkerConfig::new()
            .with_poll_interval_seconds(0)
            .with_batch_size(0)
            .with_max_attempts(0)
            .with_backoff_base_seconds(0)
            .with_backoff_max_seconds(0)
            .normalize();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.batch_size(), 1);
        assert_eq!(config.max_attempts(), 1);
        assert_eq!(config.backoff_base(), Duration::from_secs(1));
        assert_eq!(config.backoff_max(), config.backoff_base());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(300);
        let first = backoff_delay(1, base, max);
        assert!(first <= base);
        let late = backoff_delay(30, base, max);
        assert!(late <= max);
    }
}
