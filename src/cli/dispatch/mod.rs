//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the
//! appropriate action, such as starting the API server with its full
//! session configuration.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::session;
use anyhow::{Context, Result};
use secrecy::SecretString;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    // Secret length, TTL bounds, and the cookie policy pairing are checked
    // here so a misconfigured deployment never begins serving.
    crate::cli::commands::validate(matches).map_err(|e| anyhow::anyhow!(e))?;

    let session_opts = session::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        signing_secret: SecretString::from(session_opts.signing_secret),
        access_token_ttl_seconds: session_opts.access_token_ttl_seconds,
        refresh_token_ttl_seconds: session_opts.refresh_token_ttl_seconds,
        cookie_cross_origin: session_opts.cookie_cross_origin,
        cookie_insecure: session_opts.cookie_insecure,
        frontend_origins: session_opts.frontend_origins,
        sweep_interval_seconds: session_opts.sweep_interval_seconds,
        sweep_grace_days: session_opts.sweep_grace_days,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_secret_required() {
        temp_env::with_vars(
            [
                ("SESIO_SIGNING_SECRET", None::<&str>),
                ("SESIO_DSN", Some("postgres://user@localhost:5432/sesio")),
            ],
            || {
                let command = crate::cli::commands::new();
                let result = command.try_get_matches_from(vec!["sesio"]);
                assert!(result.is_err(), "parsing should fail without the secret");
            },
        );
    }

    #[test]
    fn cookie_policy_violation_is_fatal() {
        temp_env::with_vars(
            [
                (
                    "SESIO_SIGNING_SECRET",
                    Some("0123456789abcdef0123456789abcdef"),
                ),
                ("SESIO_DSN", Some("postgres://user@localhost:5432/sesio")),
                ("SESIO_COOKIE_CROSS_ORIGIN", Some("true")),
                ("SESIO_COOKIE_INSECURE", Some("true")),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["sesio"]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(err.to_string().contains("requires Secure cookies"));
                }
            },
        );
    }

    #[test]
    fn server_action_carries_options() {
        temp_env::with_vars(
            [
                (
                    "SESIO_SIGNING_SECRET",
                    Some("0123456789abcdef0123456789abcdef"),
                ),
                ("SESIO_DSN", Some("postgres://user@localhost:5432/sesio")),
                ("SESIO_PORT", Some("9999")),
                ("SESIO_COOKIE_CROSS_ORIGIN", None),
                ("SESIO_COOKIE_INSECURE", None),
                ("SESIO_ACCESS_TOKEN_TTL", None),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["sesio"]);
                let action = handler(&matches).expect("handler should succeed");
                let Action::Server(args) = action;
                assert_eq!(args.port, 9999);
                assert_eq!(args.dsn, "postgres://user@localhost:5432/sesio");
                assert_eq!(args.access_token_ttl_seconds, 900);
            },
        );
    }
}
