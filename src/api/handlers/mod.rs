//! API handlers for gatekeeper.
//!
//! `auth` carries the user-facing flows (codes, passkeys, sessions, edge
//! validation), `admin` the management surface. `health` and `root` are the
//! usual service plumbing.

pub mod admin;
pub mod auth;
pub mod health;
pub mod root;
