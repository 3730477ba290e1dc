//! Error taxonomy for the session core.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Every way a session operation can fail.
///
/// The variants are precise internally; responses collapse them to generic
/// messages so callers cannot distinguish unknown users, wrong secrets, or
/// the exact token defect.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown identifier or wrong secret; never split externally.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Access token past its embedded expiry.
    #[error("access token expired")]
    Expired,
    /// Access token signature does not verify against the signing secret.
    #[error("access token signature mismatch")]
    BadSignature,
    /// Token could not be parsed at all.
    #[error("malformed token")]
    Malformed,
    /// Refresh token already rotated or revoked; replay or race loser.
    #[error("refresh token reuse detected")]
    Reused,
    /// Refresh token unknown or expired.
    #[error("session is no longer valid")]
    SessionInvalid,
    /// Transient store failure after bounded retries; retryable by the client.
    #[error("session store unavailable")]
    StoreUnavailable(#[source] sqlx::Error),
    /// Cross-origin cookies without Secure; startup-fatal.
    #[error("cross-origin cookie mode requires Secure cookies")]
    MisconfiguredCookiePolicy,
    /// Broken invariant (hash collision, corrupt row); not retryable.
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl AuthError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials
            | Self::Expired
            | Self::BadSignature
            | Self::Malformed
            | Self::Reused
            | Self::SessionInvalid => StatusCode::UNAUTHORIZED,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::MisconfiguredCookiePolicy | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable client-facing message; intentionally coarser than the variant.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid credentials",
            Self::Expired | Self::BadSignature | Self::Malformed => "unauthorized",
            Self::Reused | Self::SessionInvalid => "session invalid",
            Self::StoreUnavailable(_) => "service unavailable",
            Self::MisconfiguredCookiePolicy | Self::Internal(_) => "internal error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        // Precise cause goes to the logs; the response body stays generic.
        match &self {
            AuthError::StoreUnavailable(source) => error!("store unavailable: {source}"),
            AuthError::Internal(source) => error!("internal error: {source:#}"),
            AuthError::MisconfiguredCookiePolicy => error!("{self}"),
            AuthError::Reused => warn!("{self}"),
            _ => warn!("request rejected: {self}"),
        }
        let body = Json(json!({ "error": self.public_message() }));
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_failures_collapse_to_401() {
        for err in [
            AuthError::InvalidCredentials,
            AuthError::Expired,
            AuthError::BadSignature,
            AuthError::Malformed,
            AuthError::Reused,
            AuthError::SessionInvalid,
        ] {
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn token_defects_share_a_public_message() {
        // A caller probing with broken tokens learns nothing about why.
        assert_eq!(AuthError::Expired.public_message(), "unauthorized");
        assert_eq!(AuthError::BadSignature.public_message(), "unauthorized");
        assert_eq!(AuthError::Malformed.public_message(), "unauthorized");
    }

    #[test]
    fn store_failure_is_server_class() {
        let err = AuthError::StoreUnavailable(sqlx::Error::PoolTimedOut);
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.public_message(), "service unavailable");
    }

    #[test]
    fn cookie_policy_violation_is_internal() {
        assert_eq!(
            AuthError::MisconfiguredCookiePolicy.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
