//! Credential verification seam.
//!
//! The session core treats secret checking as opaque: anything that can map
//! an identifier + secret to a subject and role will do. The default
//! implementation checks Argon2id hashes in the `users` table.

use super::{
    error::AuthError,
    storage::with_store_retries,
    types::Role,
    utils::{normalize_identifier, store_error, valid_identifier},
};
use anyhow::anyhow;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use sqlx::{PgPool, Row};
use std::{future::Future, pin::Pin};
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

/// A verified account: stable subject identifier plus role.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Principal {
    pub subject_id: Uuid,
    pub role: Role,
}

/// Opaque credential check. `Ok(None)` covers both unknown identifiers and
/// wrong secrets so callers cannot tell them apart.
pub trait CredentialVerifier: Send + Sync {
    fn verify<'a>(
        &'a self,
        identifier: &'a str,
        secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Principal>, AuthError>> + Send + 'a>>;
}

/// Default verifier backed by the `users` table.
#[derive(Clone)]
pub struct PgCredentialVerifier {
    pool: PgPool,
}

impl PgCredentialVerifier {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Hash a secret for account provisioning.
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    pub fn hash_secret(secret: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut rand::rngs::OsRng);
        Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| AuthError::Internal(anyhow!("failed to hash secret: {err}")))
    }
}

struct AccountRow {
    subject_id: Uuid,
    role: String,
    secret_hash: String,
}

async fn lookup_account(pool: &PgPool, identifier: &str) -> Result<Option<AccountRow>, AuthError> {
    let query = "SELECT id, role, secret_hash FROM users WHERE identifier = $1 AND status = 'active'";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(identifier)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .map_err(|err| store_error(err, "failed to lookup account"))?;

    Ok(row.map(|row| AccountRow {
        subject_id: row.get("id"),
        role: row.get("role"),
        secret_hash: row.get("secret_hash"),
    }))
}

impl CredentialVerifier for PgCredentialVerifier {
    fn verify<'a>(
        &'a self,
        identifier: &'a str,
        secret: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Principal>, AuthError>> + Send + 'a>> {
        Box::pin(async move {
            let identifier = normalize_identifier(identifier);
            if !valid_identifier(&identifier) {
                return Ok(None);
            }

            let ident = identifier.as_str();
            let row = with_store_retries(move || lookup_account(&self.pool, ident)).await?;
            let Some(row) = row else {
                return Ok(None);
            };

            let parsed = match PasswordHash::new(&row.secret_hash) {
                Ok(parsed) => parsed,
                Err(err) => {
                    // A corrupt stored hash is an operator problem, not a
                    // caller problem; fail closed.
                    warn!(subject = %row.subject_id, "unparseable secret hash: {err}");
                    return Ok(None);
                }
            };
            if Argon2::default()
                .verify_password(secret.as_bytes(), &parsed)
                .is_err()
            {
                return Ok(None);
            }

            let role = Role::parse(&row.role).ok_or_else(|| {
                AuthError::Internal(anyhow!("unknown role {:?} for {}", row.role, row.subject_id))
            })?;

            Ok(Some(Principal {
                subject_id: row.subject_id,
                role,
            }))
        })
    }
}

#[cfg(test)]
pub(super) mod test_support {
    use super::*;

    /// Static verifier for handler tests; accepts one identifier/secret pair.
    pub(in crate::api::handlers::auth) struct StubVerifier {
        pub identifier: &'static str,
        pub secret: &'static str,
        pub principal: Principal,
    }

    impl CredentialVerifier for StubVerifier {
        fn verify<'a>(
            &'a self,
            identifier: &'a str,
            secret: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Principal>, AuthError>> + Send + 'a>>
        {
            Box::pin(async move {
                if identifier == self.identifier && secret == self.secret {
                    Ok(Some(self.principal))
                } else {
                    Ok(None)
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
    use std::time::Duration;

    #[test]
    fn hash_secret_round_trips() {
        let hash = PgCredentialVerifier::hash_secret("correct horse battery staple")
            .expect("hashing should work");
        let parsed = PasswordHash::new(&hash).expect("hash should parse");
        assert!(Argon2::default()
            .verify_password(b"correct horse battery staple", &parsed)
            .is_ok());
        assert!(Argon2::default()
            .verify_password(b"wrong secret", &parsed)
            .is_err());
    }

    #[test]
    fn hashes_are_salted() {
        let first = PgCredentialVerifier::hash_secret("secret").expect("hashing should work");
        let second = PgCredentialVerifier::hash_secret("secret").expect("hashing should work");
        assert_ne!(first, second);
    }

    fn unreachable_pool() -> PgPool {
        let options = PgConnectOptions::new()
            .host("127.0.0.1")
            .port(1)
            .username("invalid")
            .database("invalid")
            .ssl_mode(PgSslMode::Disable);
        PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(100))
            .connect_lazy_with(options)
    }

    #[tokio::test]
    async fn invalid_identifier_short_circuits_before_store() {
        // The pool is unreachable, so reaching the store would error; a
        // malformed identifier must come back as plain rejection instead.
        let verifier = PgCredentialVerifier::new(unreachable_pool());
        let result = verifier.verify("not-an-identifier", "secret").await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn store_outage_is_not_a_credential_failure() {
        let verifier = PgCredentialVerifier::new(unreachable_pool());
        let result = verifier.verify("alice@example.com", "secret").await;
        assert!(matches!(result, Err(AuthError::StoreUnavailable(_))));
    }
}
