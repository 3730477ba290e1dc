//! # Sesio (Session & Token Authority)
//!
//! `sesio` is the session and authentication core of a multi-tenant web
//! platform. It issues, validates, rotates, and revokes the bearer
//! credentials that authorize API access.
//!
//! ## Credentials
//!
//! - **Access tokens** are short-lived signed envelopes (HS256) carrying
//!   subject, role, and expiry. They are stateless: validity is proven by the
//!   signature and the embedded expiry alone.
//! - **Refresh tokens** are long-lived opaque random values. The database
//!   stores only a SHA-256 hash, together with issuance and audit metadata.
//!
//! ## Rotation
//!
//! A refresh token is single-use. Consuming one atomically revokes it and
//! issues exactly one successor; the old row keeps a pointer to the successor
//! hash so rotation chains stay traceable. Concurrent attempts to consume the
//! same token have exactly one winner; the losers observe the row already
//! revoked and are reported as reuse.
//!
//! ## Cookie contract
//!
//! Both token cookies are `HttpOnly`. Cross-origin cookie mode switches them
//! to `SameSite=None`, which mandates `Secure`; the server refuses to start
//! when that pairing is violated.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
