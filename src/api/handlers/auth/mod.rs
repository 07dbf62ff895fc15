//! Auth handlers and supporting modules.
//!
//! Two ways in: emailed one-time codes (`register.rs`, `signin.rs`) and
//! passkeys (`passkeys.rs`). Both end in the same place — a session cookie
//! minted by `crate::session` — and everything downstream of sign-in flows
//! through `validate.rs`, the decision the reverse proxy asks for on every
//! protected request.
//!
//! ## Enumeration policy
//!
//! Registration answers differently for existing accounts (the flow
//! implicitly reveals existence through the auto-approval branch anyway);
//! sign-in answers identically for every address. Keep the asymmetry: it
//! mirrors what each flow already leaks by construction.

pub(crate) mod me;
pub(crate) mod passkeys;
pub(crate) mod register;
pub(crate) mod session;
pub(crate) mod signin;
mod state;
pub(crate) mod storage;
pub(crate) mod types;
pub(crate) mod utils;
pub(crate) mod validate;

pub use state::{AuthConfig, AuthState, DefaultAppAccess, SharedAuthState};

#[cfg(test)]
pub(crate) mod test_support;
