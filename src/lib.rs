//! # Gatekeeper (Authentication & Access-Control Gateway)
//!
//! `gatekeeper` is a small authentication authority that sits in front of a
//! family of self-hosted applications behind a reverse proxy. It answers one
//! question on every protected request — *is this cookie allowed to reach
//! this application?* — via the `/auth/validate` endpoint consumed by the
//! proxy's `auth_request` sub-request.
//!
//! ## Identity
//!
//! Users prove control of a mailbox with emailed 6-digit one-time codes, or
//! sign in with a WebAuthn passkey. Successful sign-in mints an opaque
//! session token delivered as an `HttpOnly` cookie; when a shared parent
//! domain is configured the cookie covers every application subdomain, so a
//! single sign-in works across the fleet.
//!
//! - **Hash at rest:** the database stores only the SHA-256 digest of
//!   session tokens; a dump of the sessions table cannot mint cookies.
//! - **Sign-count enforcement:** passkey authentications must present a
//!   strictly increasing signature counter. The counter update is a single
//!   conditional SQL write, so cloned or replayed assertions lose the race.
//!
//! ## Authorization
//!
//! Access is a flat `(user, app)` grant with an optional free-text role hint
//! forwarded to the application as `X-Auth-Role`. Users request access, and
//! administrators approve or reject; registrations from allow-listed email
//! domains skip the pending queue entirely.
//!
//! Email delivery (codes, approvals, admin notices) goes through a
//! transactional outbox drained by a background worker, so no request ever
//! blocks on a mail server.

pub mod access;
pub mod api;
pub mod cli;
pub mod db;
pub mod otp;
pub mod session;
pub mod webauthn;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
