//! Stateless mint/verify for the short-lived access token.
//!
//! Access tokens are HS256-signed envelopes carrying subject, role, and
//! expiry. Nothing here touches the database: validity is proven by the
//! signature and the embedded expiry alone.

use super::{error::AuthError, types::Role};
use anyhow::anyhow;
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tolerated clock skew between issuing and validating hosts.
const CLOCK_SKEW_LEEWAY_SECONDS: u64 = 60;

const ACCESS_TOKEN_KIND: &str = "access";

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    role: Role,
    iat: i64,
    exp: i64,
    kind: String,
}

/// Identity proven by a verified access token.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AccessIdentity {
    pub subject_id: Uuid,
    pub role: Role,
}

/// Mints and verifies access tokens against one signing secret.
///
/// The secret is explicit configuration threaded in at construction, so tests
/// can run with ephemeral secrets and rotation stays an out-of-band concern.
#[derive(Clone)]
pub struct AccessTokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_seconds: i64,
}

impl AccessTokenCodec {
    /// Build a codec from the signing secret and token TTL.
    ///
    /// # Errors
    /// Returns an error if the secret is shorter than 32 bytes.
    pub fn new(secret: &SecretString, ttl_seconds: i64) -> Result<Self, AuthError> {
        let bytes = secret.expose_secret().as_bytes();
        if bytes.len() < super::state::SIGNING_SECRET_MIN_BYTES {
            return Err(AuthError::Internal(anyhow!(
                "signing secret shorter than {} bytes",
                super::state::SIGNING_SECRET_MIN_BYTES
            )));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            ttl_seconds,
        })
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// Mint a signed access token for the subject. Pure, no side effects.
    ///
    /// # Errors
    /// Returns an error if serialization or signing fails.
    pub fn mint(&self, subject_id: Uuid, role: Role) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: subject_id.to_string(),
            role,
            iat: now,
            exp: now + self.ttl_seconds,
            kind: ACCESS_TOKEN_KIND.to_string(),
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|err| AuthError::Internal(anyhow!("failed to sign access token: {err}")))
    }

    /// Verify signature and expiry; never panics on malformed input.
    ///
    /// # Errors
    /// `Expired`, `BadSignature`, or `Malformed`; all collapse to a generic
    /// 401 at the response boundary.
    pub fn verify(&self, token: &str) -> Result<AccessIdentity, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = CLOCK_SKEW_LEEWAY_SECONDS;

        let data =
            decode::<AccessClaims>(token, &self.decoding, &validation).map_err(
                |err| match err.kind() {
                    ErrorKind::ExpiredSignature => AuthError::Expired,
                    ErrorKind::InvalidSignature => AuthError::BadSignature,
                    _ => AuthError::Malformed,
                },
            )?;

        if data.claims.kind != ACCESS_TOKEN_KIND {
            return Err(AuthError::Malformed);
        }
        let subject_id = Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::Malformed)?;

        Ok(AccessIdentity {
            subject_id,
            role: data.claims.role,
        })
    }
}
