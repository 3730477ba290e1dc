//! Session handlers and supporting modules.
//!
//! This module is the stateful heart of the service: it issues the
//! access/refresh token pair at login, rotates refresh tokens, and revokes
//! sessions one at a time or per subject.
//!
//! ## Rotation invariant
//!
//! Consuming a refresh token revokes it and creates exactly one successor in
//! a single transaction. The revoke step is a conditional `UPDATE` on the
//! token hash (`revoked_at IS NULL AND expires_at > NOW()`), so N concurrent
//! attempts on the same token have exactly one winner; every loser finds the
//! row already revoked and is reported as reuse.
//!
//! ## Token custody
//!
//! Raw refresh tokens exist only in the response that issued them. The
//! database stores a SHA-256 hash, and lookups always go through the hash.
//!
//! ## Cookie policy
//!
//! Cookies are `HttpOnly` and `Secure` by default. Cross-origin mode switches
//! `SameSite` to `None`, which is refused at startup unless Secure stays on.

mod codec;
mod error;
pub mod session;
mod state;
pub mod storage;
mod sweeper;
pub(crate) mod types;
mod utils;
mod verifier;

pub use codec::{AccessIdentity, AccessTokenCodec};
pub use error::AuthError;
pub use state::{
    AuthConfig, AuthState, REFRESH_TTL_MAX_SECONDS, REFRESH_TTL_MIN_SECONDS,
    SIGNING_SECRET_MIN_BYTES,
};
pub use sweeper::{spawn_retention_sweeper, SweeperConfig};
pub use types::Role;
pub use verifier::{CredentialVerifier, PgCredentialVerifier, Principal};
