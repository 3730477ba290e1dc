use crate::api::{self, handlers::auth};
use anyhow::Result;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub signing_secret: SecretString,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub cookie_cross_origin: bool,
    pub cookie_insecure: bool,
    pub frontend_origins: Vec<String>,
    pub sweep_interval_seconds: u64,
    pub sweep_grace_days: i64,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let auth_config = auth::AuthConfig::new(args.frontend_origins)
        .with_access_token_ttl_seconds(args.access_token_ttl_seconds)
        .with_refresh_token_ttl_seconds(args.refresh_token_ttl_seconds)
        .with_cookie_cross_origin(args.cookie_cross_origin)
        .with_cookie_secure(!args.cookie_insecure);

    let sweeper_config = auth::SweeperConfig::new()
        .with_interval_seconds(args.sweep_interval_seconds)
        .with_grace_days(args.sweep_grace_days);

    api::new(
        args.port,
        args.dsn,
        args.signing_secret,
        auth_config,
        sweeper_config,
    )
    .await
}
