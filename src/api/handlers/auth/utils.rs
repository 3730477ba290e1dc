//! Small helpers for token generation, hashing, and audit metadata.

use super::error::AuthError;
use anyhow::{anyhow, Context};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::net::IpAddr;

/// Longest client descriptor we persist; anything longer is truncated.
const MAX_CLIENT_DESCRIPTOR_LEN: usize = 256;

/// Create a new opaque refresh token.
///
/// The raw value is only ever returned to the client; the database stores a
/// hash.
pub(super) fn generate_refresh_token() -> Result<String, AuthError> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate refresh token")
        .map_err(AuthError::Internal)?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a refresh token so raw values never touch the database.
/// The hash is the primary key used for every lookup.
pub fn hash_refresh_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Normalize a login identifier for lookup.
pub(super) fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// Basic shape check on an already-normalized identifier.
pub(super) fn valid_identifier(identifier: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(identifier))
}

pub(super) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Failures worth retrying: the statement may never have reached the server.
pub(super) fn is_transient(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
}

/// Classify a store failure: transient outages are retryable, everything else
/// is a broken invariant.
pub(super) fn store_error(err: sqlx::Error, what: &'static str) -> AuthError {
    if is_transient(&err) {
        AuthError::StoreUnavailable(err)
    } else {
        AuthError::Internal(anyhow!(err).context(what))
    }
}

/// Extract a client IP for audit metadata from common proxy headers.
pub(super) fn extract_client_ip(headers: &axum::http::HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|value| value.trim().parse::<IpAddr>().ok());
    if forwarded.is_some() {
        return forwarded;
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<IpAddr>().ok())
}

/// User agent string for audit metadata, trimmed and bounded.
pub(super) fn client_descriptor(headers: &axum::http::HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            let mut owned = value.to_string();
            if owned.len() > MAX_CLIENT_DESCRIPTOR_LEN {
                owned.truncate(MAX_CLIENT_DESCRIPTOR_LEN);
            }
            owned
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[test]
    fn generate_refresh_token_is_256_bits() {
        let decoded_len = generate_refresh_token()
            .ok()
            .and_then(|token| URL_SAFE_NO_PAD.decode(token.as_bytes()).ok())
            .map(|bytes| bytes.len());
        assert_eq!(decoded_len, Some(32));
    }

    #[test]
    fn generated_tokens_differ() {
        let first = generate_refresh_token().expect("token should generate");
        let second = generate_refresh_token().expect("token should generate");
        assert_ne!(first, second);
    }

    #[test]
    fn hash_refresh_token_stable() {
        let first = hash_refresh_token("token");
        let second = hash_refresh_token("token");
        let different = hash_refresh_token("other");
        assert_eq!(first, second);
        assert_ne!(first, different);
        assert_eq!(first.len(), 32);
    }

    #[test]
    fn normalize_identifier_trims_and_lowercases() {
        assert_eq!(
            normalize_identifier(" Alice@Example.COM "),
            "alice@example.com"
        );
    }

    #[test]
    fn valid_identifier_accepts_basic_format() {
        assert!(valid_identifier("a@example.com"));
        assert!(!valid_identifier("not-an-identifier"));
        assert!(!valid_identifier("missing-domain@"));
    }

    #[derive(Debug)]
    struct TestDbError {
        code: Option<&'static str>,
    }

    impl fmt::Display for TestDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test database error")
        }
    }

    impl StdError for TestDbError {}

    impl DatabaseError for TestDbError {
        fn message(&self) -> &'static str {
            "test database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            self.code.map(Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::UniqueViolation
        }
    }

    #[test]
    fn is_unique_violation_matches_sqlstate() {
        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("23505"),
        }));
        assert!(is_unique_violation(&err));

        let err = sqlx::Error::Database(Box::new(TestDbError {
            code: Some("99999"),
        }));
        assert!(!is_unique_violation(&err));

        let err = sqlx::Error::RowNotFound;
        assert!(!is_unique_violation(&err));
    }

    #[test]
    fn transient_errors_become_store_unavailable() {
        let err = store_error(sqlx::Error::PoolTimedOut, "lookup");
        assert!(matches!(err, AuthError::StoreUnavailable(_)));

        let err = store_error(sqlx::Error::RowNotFound, "lookup");
        assert!(matches!(err, AuthError::Internal(_)));
    }

    #[test]
    fn extract_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.10, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.5"));
        assert_eq!(
            extract_client_ip(&headers),
            Some(IpAddr::from([203, 0, 113, 10]))
        );
    }

    #[test]
    fn extract_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.5"));
        assert_eq!(
            extract_client_ip(&headers),
            Some(IpAddr::from([198, 51, 100, 5]))
        );
    }

    #[test]
    fn extract_client_ip_ignores_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        assert_eq!(extract_client_ip(&headers), None);
    }

    #[test]
    fn client_descriptor_is_bounded() {
        let mut headers = HeaderMap::new();
        let long = "a".repeat(1000);
        headers.insert(
            axum::http::header::USER_AGENT,
            HeaderValue::from_str(&long).expect("ascii header"),
        );
        let descriptor = client_descriptor(&headers).expect("descriptor should be present");
        assert_eq!(descriptor.len(), MAX_CLIENT_DESCRIPTOR_LEN);
    }

    #[test]
    fn client_descriptor_absent_when_missing() {
        let headers = HeaderMap::new();
        assert_eq!(client_descriptor(&headers), None);
    }
}
