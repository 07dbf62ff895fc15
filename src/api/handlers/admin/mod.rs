//! Admin handlers: user lifecycle, app registry, grants, request review.
//!
//! Every endpoint here resolves the session and requires the admin flag
//! before touching anything else; there is no separate admin credential.

pub(crate) mod apps;
pub(crate) mod requests;
mod storage;
pub(crate) mod types;
pub(crate) mod users;
