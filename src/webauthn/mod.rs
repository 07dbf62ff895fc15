//! Passkey (`WebAuthn`) ceremonies and credential storage.
//!
//! Ceremonies are stateless over HTTP: each begin call parks the protocol
//! state in an in-memory map under a fresh UUID with a short TTL, and the
//! matching finish call consumes it exactly once. The anti-replay decision is
//! not made here — the signature counter is compared and advanced in a single
//! conditional SQL update in [`PasskeyRepo::record_authentication`], so two
//! concurrent authentications with the same assertion cannot both win.

mod models;
mod repo;
mod service;

pub use models::{PasskeyCredential, StoredPasskey, serialize_passkey};
pub use repo::PasskeyRepo;
pub use service::{AuthCeremony, PasskeyConfig, PasskeyError, PasskeyService};
