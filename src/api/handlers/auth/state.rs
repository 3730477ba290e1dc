//! Session configuration and shared handler state.

use super::{codec::AccessTokenCodec, error::AuthError, verifier::CredentialVerifier};
use anyhow::anyhow;
use std::sync::Arc;

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

/// Refresh token lifetime bounds (1 to 90 days).
pub const REFRESH_TTL_MIN_SECONDS: i64 = 24 * 60 * 60;
pub const REFRESH_TTL_MAX_SECONDS: i64 = 90 * 24 * 60 * 60;

/// Minimum signing secret length in bytes.
pub const SIGNING_SECRET_MIN_BYTES: usize = 32;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    cookie_cross_origin: bool,
    cookie_secure: bool,
    frontend_origins: Vec<String>,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_origins: Vec<String>) -> Self {
        Self {
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            cookie_cross_origin: false,
            cookie_secure: true,
            frontend_origins,
        }
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_cookie_cross_origin(mut self, cross_origin: bool) -> Self {
        self.cookie_cross_origin = cross_origin;
        self
    }

    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    /// Check invariants that must hold before serving traffic.
    ///
    /// # Errors
    /// `MisconfiguredCookiePolicy` for cross-origin cookies without Secure;
    /// an internal error for out-of-range TTLs.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.cookie_cross_origin && !self.cookie_secure {
            return Err(AuthError::MisconfiguredCookiePolicy);
        }
        if self.access_token_ttl_seconds <= 0 {
            return Err(AuthError::Internal(anyhow!(
                "access token TTL must be positive"
            )));
        }
        if !(REFRESH_TTL_MIN_SECONDS..=REFRESH_TTL_MAX_SECONDS)
            .contains(&self.refresh_token_ttl_seconds)
        {
            return Err(AuthError::Internal(anyhow!(
                "refresh token TTL must be between 1 and 90 days"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    #[must_use]
    pub fn cookie_cross_origin(&self) -> bool {
        self.cookie_cross_origin
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    #[must_use]
    pub fn frontend_origins(&self) -> &[String] {
        &self.frontend_origins
    }
}

/// Shared state for session handlers: configuration, the access token codec,
/// and the credential verifier seam.
pub struct AuthState {
    config: AuthConfig,
    codec: AccessTokenCodec,
    verifier: Arc<dyn CredentialVerifier>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        codec: AccessTokenCodec,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self {
            config,
            codec,
            verifier,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &AccessTokenCodec {
        &self.codec
    }

    pub(super) fn verifier(&self) -> &dyn CredentialVerifier {
        self.verifier.as_ref()
    }
}
