use crate::api::handlers::{auth, health, root};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{get, options},
    Extension,
};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;

pub mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Start the server
/// # Errors
/// Returns an error if the session configuration is invalid or the server
/// fails to start. Cookie policy violations abort here, before binding.
pub async fn new(
    port: u16,
    dsn: String,
    signing_secret: SecretString,
    auth_config: auth::AuthConfig,
    sweeper_config: auth::SweeperConfig,
) -> Result<()> {
    // Fail loudly on a broken cookie pairing: serving anyway would silently
    // break login for every cross-origin client.
    auth_config
        .validate()
        .context("refusing to start with invalid session configuration")?;

    let codec = auth::AccessTokenCodec::new(
        &signing_secret,
        auth_config.access_token_ttl_seconds(),
    )
    .context("failed to initialize access token codec")?;

    // Short acquire timeout: a stalled store should surface as a retryable
    // 503, not as requests queueing forever.
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .acquire_timeout(Duration::from_secs(3))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let verifier = Arc::new(auth::PgCredentialVerifier::new(pool.clone()));
    let cors = cors_layer(auth_config.frontend_origins())?;
    let auth_state = Arc::new(auth::AuthState::new(auth_config, codec, verifier));

    // Background task prunes refresh token rows dead past the grace period.
    auth::spawn_retention_sweeper(pool.clone(), sweeper_config);

    // Build the router from OpenAPI-wired routes, then extend it with non-doc
    // routes like `/` and preflight-only `OPTIONS /health`.
    let (router, _openapi) = router().split_for_parts();
    let app = router
        .route("/", get(root::root))
        .route("/health", options(health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state.clone()))
                .layer(Extension(pool.clone())),
        )
        .layer(Extension(pool));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// Credentialed CORS for the approved frontend origins.
///
/// `AllowOrigin::list` + credentials echoes the exact requesting origin back,
/// never a wildcard, which is what cookie-carrying cross-origin requests
/// require.
fn cors_layer(frontend_origins: &[String]) -> Result<CorsLayer> {
    let origins = frontend_origins
        .iter()
        .map(|origin| approved_origin(origin))
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true))
}

fn approved_origin(origin: &str) -> Result<HeaderValue> {
    let parsed =
        Url::parse(origin).with_context(|| format!("Invalid frontend origin: {origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Frontend origin must include a valid host: {origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let normalized = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&normalized).context("Failed to build frontend origin header")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approved_origin_normalizes() {
        let value = approved_origin("https://app.example.com/").expect("origin should parse");
        assert_eq!(value, "https://app.example.com");

        let value = approved_origin("http://localhost:5173").expect("origin should parse");
        assert_eq!(value, "http://localhost:5173");
    }

    #[test]
    fn approved_origin_rejects_garbage() {
        assert!(approved_origin("not a url").is_err());
        assert!(approved_origin("data:text/plain,hi").is_err());
    }

    #[test]
    fn cors_layer_accepts_origin_list() {
        let result = cors_layer(&[
            "https://app.example.com".to_string(),
            "https://staging.example.com".to_string(),
        ]);
        assert!(result.is_ok());
    }

    #[test]
    fn cors_layer_rejects_invalid_origin() {
        let result = cors_layer(&["nonsense".to_string()]);
        assert!(result.is_err());
    }
}
