//! One-time email codes for sign-in and registration.
//!
//! A code is six decimal digits, bound to an (email, purpose) pair, and lives
//! for a few minutes. Issuing a new code burns any previous unused codes for
//! the same pair. Verification locks the candidate row, charges an attempt,
//! and only then compares — so concurrent guesses serialize on the row lock
//! and the attempt ceiling cannot be raced past. A code verifies at most once.

mod models;
mod repo;
mod service;

pub use models::OtpPurpose;
pub use service::{OtpError, generate_code, issue, verify};
