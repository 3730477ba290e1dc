//! Persistent refresh token store.
//!
//! Rows are written at issuance, mutated only to set `revoked_at` and
//! `replaced_by_hash`, and deleted only by the retention sweeper. The
//! conditional UPDATE in [`consume_and_rotate`] is what gives rotation its
//! exactly-one-winner guarantee: the database serializes the competing
//! updates on the primary key, and every loser matches zero rows.

use super::{
    error::AuthError,
    types::Role,
    utils::{
        client_descriptor, extract_client_ip, generate_refresh_token, hash_refresh_token,
        is_unique_violation, store_error,
    },
};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::{future::Future, net::IpAddr, time::Duration};
use tokio::time::sleep;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

/// Transient failures are retried this many times before surfacing.
const STORE_RETRY_ATTEMPTS: u32 = 3;
const STORE_RETRY_BASE: Duration = Duration::from_millis(50);

/// Audit metadata captured at issuance; write-once.
#[derive(Clone, Debug, Default)]
pub struct ClientMeta {
    pub descriptor: Option<String>,
    pub origin: Option<IpAddr>,
}

impl ClientMeta {
    #[must_use]
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        Self {
            descriptor: client_descriptor(headers),
            origin: extract_client_ip(headers),
        }
    }
}

/// The persisted view of one refresh token.
#[derive(Clone, Debug)]
pub struct RefreshTokenRecord {
    pub token_hash: Vec<u8>,
    pub subject_id: Uuid,
    pub role: Role,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Result of presenting a refresh token for rotation.
#[derive(Debug)]
pub enum RotateOutcome {
    /// The presented token won; it is now revoked and has one successor.
    Rotated {
        raw_token: String,
        record: RefreshTokenRecord,
    },
    /// Already rotated or revoked: replay, or the loser of a race.
    Reused,
    /// No row with this hash.
    NotFound,
    /// Row exists but is past its expiry.
    Expired,
}

/// One active session row for session listing.
#[derive(Clone, Debug)]
pub struct SessionRow {
    pub token_hash: Vec<u8>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub client_descriptor: Option<String>,
    pub origin_address: Option<IpAddr>,
}

/// Retry a store operation on transient failure with exponential backoff.
///
/// Only safe for operations that are idempotent or regenerate their inputs
/// per attempt; rotation is deliberately not wrapped.
pub(super) async fn with_store_retries<T, F, Fut>(mut op: F) -> Result<T, AuthError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AuthError>>,
{
    let mut delay = STORE_RETRY_BASE;
    let mut attempt = 1;
    loop {
        match op().await {
            Err(AuthError::StoreUnavailable(err)) if attempt < STORE_RETRY_ATTEMPTS => {
                warn!("store unavailable (attempt {attempt}/{STORE_RETRY_ATTEMPTS}): {err}");
                sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Issue a fresh refresh token for the subject.
///
/// Returns the raw value (the only moment it exists server-side) and the
/// persisted record.
///
/// # Errors
/// `StoreUnavailable` after bounded retries; a hash collision is surfaced as
/// a fatal internal error, never retried.
pub async fn issue_refresh_token(
    pool: &PgPool,
    subject_id: Uuid,
    role: Role,
    meta: &ClientMeta,
    ttl_seconds: i64,
) -> Result<(String, RefreshTokenRecord), AuthError> {
    // A new random value per attempt: retrying an ambiguous insert with the
    // same hash could trip the uniqueness constraint on our own row.
    with_store_retries(move || async move {
        let raw_token = generate_refresh_token()?;
        let record = insert_refresh_row(
            pool,
            &hash_refresh_token(&raw_token),
            subject_id,
            role,
            meta,
            ttl_seconds,
        )
        .await?;
        Ok((raw_token, record))
    })
    .await
}

async fn insert_refresh_row<'c, E>(
    executor: E,
    token_hash: &[u8],
    subject_id: Uuid,
    role: Role,
    meta: &ClientMeta,
    ttl_seconds: i64,
) -> Result<RefreshTokenRecord, AuthError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let query = r"
        INSERT INTO refresh_tokens
            (token_hash, subject_id, role, expires_at, client_descriptor, origin_address)
        VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'), $5, $6)
        RETURNING issued_at, expires_at
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .bind(subject_id)
        .bind(role.as_str())
        .bind(ttl_seconds)
        .bind(meta.descriptor.as_deref())
        .bind(meta.origin)
        .fetch_one(executor)
        .instrument(span)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                // 256-bit collisions do not happen by chance; treat as a
                // broken RNG or duplicated insert, not something to retry.
                AuthError::Internal(anyhow!("refresh token hash collision"))
            } else {
                store_error(err, "failed to insert refresh token")
            }
        })?;

    Ok(RefreshTokenRecord {
        token_hash: token_hash.to_vec(),
        subject_id,
        role,
        issued_at: row.get("issued_at"),
        expires_at: row.get("expires_at"),
    })
}

/// Consume a refresh token and issue its single successor.
///
/// Revoke-old and insert-new happen in one transaction; both writes are
/// all-or-nothing. Not retried internally: after a transient failure the
/// outcome is unknown, and the caller's retry will observe `Reused` if the
/// first attempt actually committed.
///
/// # Errors
/// `StoreUnavailable` on transient failure (unknown outcome, retryable).
pub async fn consume_and_rotate(
    pool: &PgPool,
    raw_token: &str,
    meta: &ClientMeta,
    ttl_seconds: i64,
) -> Result<RotateOutcome, AuthError> {
    let old_hash = hash_refresh_token(raw_token);
    let new_raw = generate_refresh_token()?;
    let new_hash = hash_refresh_token(&new_raw);

    let mut tx = pool
        .begin()
        .await
        .map_err(|err| store_error(err, "failed to begin rotation transaction"))?;

    // The conditional UPDATE is the whole concurrency story: of N racers,
    // exactly one matches the not-yet-revoked row.
    let query = r"
        UPDATE refresh_tokens
        SET revoked_at = NOW(), replaced_by_hash = $2
        WHERE token_hash = $1
          AND revoked_at IS NULL
          AND expires_at > NOW()
        RETURNING subject_id, role
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(&old_hash)
        .bind(&new_hash)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .map_err(|err| store_error(err, "failed to revoke refresh token"))?;

    let Some(row) = row else {
        let outcome = classify_rejection(&mut tx, &old_hash).await?;
        // Nothing was written; the transaction only held the lookups.
        let _ = tx.rollback().await;
        return Ok(outcome);
    };

    let subject_id: Uuid = row.get("subject_id");
    let role_text: String = row.get("role");
    let role = Role::parse(&role_text)
        .ok_or_else(|| AuthError::Internal(anyhow!("unknown role {role_text:?} in store")))?;

    let record =
        insert_refresh_row(&mut *tx, &new_hash, subject_id, role, meta, ttl_seconds).await?;

    tx.commit()
        .await
        .map_err(|err| store_error(err, "failed to commit rotation"))?;

    Ok(RotateOutcome::Rotated {
        raw_token: new_raw,
        record,
    })
}

/// Distinguish why a rotation matched nothing: reuse, expiry, or no row.
async fn classify_rejection(
    tx: &mut Transaction<'_, Postgres>,
    token_hash: &[u8],
) -> Result<RotateOutcome, AuthError> {
    let query = "SELECT revoked_at, expires_at FROM refresh_tokens WHERE token_hash = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .map_err(|err| store_error(err, "failed to classify rejected rotation"))?;

    let Some(row) = row else {
        return Ok(RotateOutcome::NotFound);
    };

    let revoked_at: Option<DateTime<Utc>> = row.get("revoked_at");
    if revoked_at.is_some() {
        // Revoked rows stay `Reused` forever, even past their expiry; a
        // replayed token is reported as replay, not as merely stale.
        return Ok(RotateOutcome::Reused);
    }
    Ok(RotateOutcome::Expired)
}

/// Revoke one refresh token. Idempotent: revoking a dead or unknown token is
/// not an error.
///
/// # Errors
/// `StoreUnavailable` after bounded retries.
pub async fn revoke_refresh_token(pool: &PgPool, raw_token: &str) -> Result<(), AuthError> {
    let token_hash = hash_refresh_token(raw_token);
    let token_hash = token_hash.as_slice();
    with_store_retries(move || async move {
        let query = r"
            UPDATE refresh_tokens
            SET revoked_at = NOW()
            WHERE token_hash = $1 AND revoked_at IS NULL
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(token_hash)
            .execute(pool)
            .instrument(span)
            .await
            .map_err(|err| store_error(err, "failed to revoke refresh token"))?;
        Ok(())
    })
    .await
}

/// Revoke every live refresh token for the subject ("log out everywhere").
/// One statement, so concurrent refreshes either rotate before it lands or
/// find their row revoked.
///
/// # Errors
/// `StoreUnavailable` after bounded retries.
pub async fn revoke_all_for_subject(pool: &PgPool, subject_id: Uuid) -> Result<u64, AuthError> {
    with_store_retries(move || async move {
        let query = r"
            UPDATE refresh_tokens
            SET revoked_at = NOW()
            WHERE subject_id = $1 AND revoked_at IS NULL
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(subject_id)
            .execute(pool)
            .instrument(span)
            .await
            .map_err(|err| store_error(err, "failed to revoke subject sessions"))?;
        Ok(result.rows_affected())
    })
    .await
}

/// Find the owning subject for a raw token, live or dead. Used by
/// "log out everywhere", which should work even with an already-rotated
/// handle.
///
/// # Errors
/// `StoreUnavailable` after bounded retries.
pub async fn find_subject_for_token(
    pool: &PgPool,
    raw_token: &str,
) -> Result<Option<Uuid>, AuthError> {
    let token_hash = hash_refresh_token(raw_token);
    let token_hash = token_hash.as_slice();
    with_store_retries(move || async move {
        let query = "SELECT subject_id FROM refresh_tokens WHERE token_hash = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(token_hash)
            .fetch_optional(pool)
            .instrument(span)
            .await
            .map_err(|err| store_error(err, "failed to lookup token subject"))?;
        Ok(row.map(|row| row.get("subject_id")))
    })
    .await
}

/// List the subject's currently-valid sessions, newest first.
///
/// # Errors
/// `StoreUnavailable` after bounded retries.
pub async fn list_active_sessions(
    pool: &PgPool,
    subject_id: Uuid,
) -> Result<Vec<SessionRow>, AuthError> {
    with_store_retries(move || async move {
        let query = r"
            SELECT token_hash, issued_at, expires_at, client_descriptor, origin_address
            FROM refresh_tokens
            WHERE subject_id = $1
              AND revoked_at IS NULL
              AND expires_at > NOW()
            ORDER BY issued_at DESC
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(subject_id)
            .fetch_all(pool)
            .instrument(span)
            .await
            .map_err(|err| store_error(err, "failed to list sessions"))?;

        Ok(rows
            .into_iter()
            .map(|row| SessionRow {
                token_hash: row.get("token_hash"),
                issued_at: row.get("issued_at"),
                expires_at: row.get("expires_at"),
                client_descriptor: row.get("client_descriptor"),
                origin_address: row.get("origin_address"),
            })
            .collect())
    })
    .await
}

/// Delete rows dead for longer than the grace period. Storage hygiene only;
/// correctness never depends on the sweep.
///
/// # Errors
/// `StoreUnavailable` after bounded retries.
pub async fn delete_expired_rows(pool: &PgPool, grace_days: i64) -> Result<u64, AuthError> {
    with_store_retries(move || async move {
        let query = r"
            DELETE FROM refresh_tokens
            WHERE expires_at < NOW() - ($1 * INTERVAL '1 day')
               OR (revoked_at IS NOT NULL AND revoked_at < NOW() - ($1 * INTERVAL '1 day'))
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(grace_days)
            .execute(pool)
            .instrument(span)
            .await
            .map_err(|err| store_error(err, "failed to sweep refresh tokens"))?;
        Ok(result.rows_affected())
    })
    .await
}
