//! Session lifecycle endpoints: login, refresh, logout, whoami, sessions.
//!
//! The refresh cookie is the primary transport; a JSON body field and the
//! `Authorization: Bearer` header are kept as compatibility fallbacks for
//! non-browser clients.

use anyhow::anyhow;
use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, CACHE_CONTROL, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{
    codec::AccessIdentity,
    error::AuthError,
    state::{AuthConfig, AuthState},
    storage::{self, ClientMeta, RotateOutcome},
    types::{
        LoginRequest, LogoutRequest, RefreshRequest, SessionInfo, SessionListResponse,
        TokenPairResponse, WhoamiResponse,
    },
    utils::hash_refresh_token,
};

pub(crate) const ACCESS_COOKIE_NAME: &str = "sesio_access";
pub(crate) const REFRESH_COOKIE_NAME: &str = "sesio_refresh";

const ACCESS_COOKIE_PATH: &str = "/";
// The refresh token is only ever needed by the auth endpoints themselves.
const REFRESH_COOKIE_PATH: &str = "/v1/auth";

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Credentials accepted, session issued", body = TokenPairResponse),
        (status = 401, description = "Unknown identifier or wrong secret"),
        (status = 503, description = "Session store unavailable")
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, AuthError> {
    let meta = ClientMeta::from_headers(&headers);

    let principal = auth_state
        .verifier()
        .verify(&request.identifier, &request.secret)
        .await?;
    let Some(principal) = principal else {
        // Unknown identifier and wrong secret are indistinguishable here on
        // purpose; the audit trail keeps the client context.
        warn!(client = ?meta.descriptor, origin = ?meta.origin, "login rejected");
        return Err(AuthError::InvalidCredentials);
    };

    let access_token = auth_state
        .codec()
        .mint(principal.subject_id, principal.role)?;
    let (refresh_token, _record) = storage::issue_refresh_token(
        &pool,
        principal.subject_id,
        principal.role,
        &meta,
        auth_state.config().refresh_token_ttl_seconds(),
    )
    .await?;

    info!(subject = %principal.subject_id, "session issued");

    let response_headers = session_headers(auth_state.config(), &access_token, &refresh_token)?;
    Ok((
        StatusCode::OK,
        response_headers,
        Json(TokenPairResponse::new(
            access_token,
            refresh_token,
            auth_state.codec().ttl_seconds(),
        )),
    )
        .into_response())
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token rotated, fresh pair issued", body = TokenPairResponse),
        (status = 401, description = "Refresh token unknown, expired, or already used"),
        (status = 503, description = "Session store unavailable; retry with the same token")
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    body: Option<Json<RefreshRequest>>,
) -> Response {
    let meta = ClientMeta::from_headers(&headers);
    let presented = extract_cookie(&headers, REFRESH_COOKIE_NAME)
        .or_else(|| body.and_then(|Json(request)| request.refresh_token));
    let Some(raw_token) = presented else {
        return invalid_session(auth_state.config());
    };

    match storage::consume_and_rotate(
        &pool,
        &raw_token,
        &meta,
        auth_state.config().refresh_token_ttl_seconds(),
    )
    .await
    {
        Ok(RotateOutcome::Rotated {
            raw_token: next_refresh,
            record,
        }) => {
            let access_token = match auth_state.codec().mint(record.subject_id, record.role) {
                Ok(token) => token,
                Err(err) => return err.into_response(),
            };
            match session_headers(auth_state.config(), &access_token, &next_refresh) {
                Ok(response_headers) => (
                    StatusCode::OK,
                    response_headers,
                    Json(TokenPairResponse::new(
                        access_token,
                        next_refresh,
                        auth_state.codec().ttl_seconds(),
                    )),
                )
                    .into_response(),
                Err(err) => err.into_response(),
            }
        }
        Ok(RotateOutcome::Reused) => {
            // The single most important signal in this service: either a
            // replayed token after theft, or the loser of a concurrent
            // refresh race. Both mean this chain must not continue.
            warn!(
                client = ?meta.descriptor,
                origin = ?meta.origin,
                "refresh token replay detected"
            );
            invalid_session(auth_state.config())
        }
        Ok(RotateOutcome::NotFound | RotateOutcome::Expired) => {
            invalid_session(auth_state.config())
        }
        // Unknown outcome: keep the client's credentials so it can retry;
        // if the rotation actually committed, the retry observes Reused.
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    body: Option<Json<LogoutRequest>>,
) -> Response {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let presented = extract_cookie(&headers, REFRESH_COOKIE_NAME).or(request.refresh_token);

    if let Some(raw_token) = presented {
        if request.all_devices {
            // Resolve the subject even through a dead token: logging out
            // everywhere with a stale handle should still work.
            match storage::find_subject_for_token(&pool, &raw_token).await {
                Ok(Some(subject_id)) => {
                    match storage::revoke_all_for_subject(&pool, subject_id).await {
                        Ok(count) => info!(subject = %subject_id, count, "sessions revoked"),
                        Err(err) => error!("failed to revoke subject sessions: {err}"),
                    }
                }
                Ok(None) => {}
                Err(err) => error!("failed to resolve logout token: {err}"),
            }
        } else if let Err(err) = storage::revoke_refresh_token(&pool, &raw_token).await {
            error!("failed to revoke session: {err}");
        }
    }

    // Always clear cookies and return 204; logout must not leak whether the
    // token was still valid.
    (
        StatusCode::NO_CONTENT,
        clear_session_headers(auth_state.config()),
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/v1/auth/whoami",
    responses(
        (status = 200, description = "Access token is valid", body = WhoamiResponse),
        (status = 401, description = "Missing, expired, or invalid access token")
    ),
    tag = "auth"
)]
pub async fn whoami(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<WhoamiResponse>, AuthError> {
    let identity = authenticate_access(&headers, &auth_state)?;
    Ok(Json(WhoamiResponse {
        subject_id: identity.subject_id.to_string(),
        role: identity.role,
    }))
}

#[utoipa::path(
    get,
    path = "/v1/auth/sessions",
    responses(
        (status = 200, description = "Active sessions for the authenticated subject", body = SessionListResponse),
        (status = 401, description = "Missing, expired, or invalid access token"),
        (status = 503, description = "Session store unavailable")
    ),
    tag = "auth"
)]
pub async fn sessions(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Json<SessionListResponse>, AuthError> {
    let identity = authenticate_access(&headers, &auth_state)?;
    let rows = storage::list_active_sessions(&pool, identity.subject_id).await?;

    let current_hash =
        extract_cookie(&headers, REFRESH_COOKIE_NAME).map(|raw| hash_refresh_token(&raw));
    let sessions = rows
        .into_iter()
        .map(|row| SessionInfo {
            issued_at: row.issued_at.to_rfc3339(),
            expires_at: row.expires_at.to_rfc3339(),
            client_descriptor: row.client_descriptor,
            origin_address: row.origin_address.map(|ip| ip.to_string()),
            current: current_hash.as_deref() == Some(row.token_hash.as_slice()),
        })
        .collect();

    Ok(Json(SessionListResponse { sessions }))
}

/// Resolve the access token (cookie first, bearer fallback) into an identity.
fn authenticate_access(
    headers: &HeaderMap,
    auth_state: &AuthState,
) -> Result<AccessIdentity, AuthError> {
    let token = extract_cookie(headers, ACCESS_COOKIE_NAME)
        .or_else(|| extract_bearer(headers))
        .ok_or(AuthError::Malformed)?;
    auth_state.codec().verify(&token)
}

/// Build one session cookie with the configured attributes.
fn token_cookie(
    config: &AuthConfig,
    name: &str,
    value: &str,
    path: &str,
    max_age: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    // Cross-origin delivery needs SameSite=None, which browsers only honor
    // together with Secure; that pairing is enforced at startup.
    let same_site = if config.cookie_cross_origin() {
        "None"
    } else {
        "Lax"
    };
    let mut cookie =
        format!("{name}={value}; Path={path}; HttpOnly; SameSite={same_site}; Max-Age={max_age}");
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Response headers carrying both token cookies for a fresh pair.
fn session_headers(
    config: &AuthConfig,
    access_token: &str,
    refresh_token: &str,
) -> Result<HeaderMap, AuthError> {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.append(
        SET_COOKIE,
        token_cookie(
            config,
            ACCESS_COOKIE_NAME,
            access_token,
            ACCESS_COOKIE_PATH,
            config.access_token_ttl_seconds(),
        )
        .map_err(cookie_error)?,
    );
    headers.append(
        SET_COOKIE,
        token_cookie(
            config,
            REFRESH_COOKIE_NAME,
            refresh_token,
            REFRESH_COOKIE_PATH,
            config.refresh_token_ttl_seconds(),
        )
        .map_err(cookie_error)?,
    );
    Ok(headers)
}

/// Clearing variants of both cookies (Max-Age=0).
fn clear_session_headers(config: &AuthConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, path) in [
        (ACCESS_COOKIE_NAME, ACCESS_COOKIE_PATH),
        (REFRESH_COOKIE_NAME, REFRESH_COOKIE_PATH),
    ] {
        if let Ok(cookie) = token_cookie(config, name, "", path, 0) {
            headers.append(SET_COOKIE, cookie);
        }
    }
    headers
}

fn cookie_error(err: InvalidHeaderValue) -> AuthError {
    AuthError::Internal(anyhow!("failed to build session cookie: {err}"))
}

/// 401 that also instructs the client to drop its session cookies.
fn invalid_session(config: &AuthConfig) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        clear_session_headers(config),
        Json(json!({ "error": "session invalid" })),
    )
        .into_response()
}

fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
