use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};

pub const ARG_SIGNING_SECRET: &str = "signing-secret";
pub const ARG_ACCESS_TOKEN_TTL: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TOKEN_TTL: &str = "refresh-token-ttl-seconds";
pub const ARG_COOKIE_CROSS_ORIGIN: &str = "cookie-cross-origin";
pub const ARG_COOKIE_INSECURE: &str = "cookie-insecure";
pub const ARG_FRONTEND_ORIGINS: &str = "frontend-origins";
pub const ARG_SWEEP_INTERVAL: &str = "sweep-interval-seconds";
pub const ARG_SWEEP_GRACE_DAYS: &str = "sweep-grace-days";

pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_cookie_args(command);
    with_sweep_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SIGNING_SECRET)
                .long(ARG_SIGNING_SECRET)
                .help("Access token signing secret (at least 32 bytes)")
                .env("SESIO_SIGNING_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL)
                .long(ARG_ACCESS_TOKEN_TTL)
                .help("Access token TTL in seconds")
                .env("SESIO_ACCESS_TOKEN_TTL")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL)
                .long(ARG_REFRESH_TOKEN_TTL)
                .help("Refresh token TTL in seconds (1 to 90 days)")
                .env("SESIO_REFRESH_TOKEN_TTL")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_cookie_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_COOKIE_CROSS_ORIGIN)
                .long(ARG_COOKIE_CROSS_ORIGIN)
                .help("Issue SameSite=None cookies for cross-origin frontends (forces Secure)")
                .env("SESIO_COOKIE_CROSS_ORIGIN")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_COOKIE_INSECURE)
                .long(ARG_COOKIE_INSECURE)
                .help("Allow cookies over plain HTTP (local development only)")
                .env("SESIO_COOKIE_INSECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_FRONTEND_ORIGINS)
                .long(ARG_FRONTEND_ORIGINS)
                .help("Comma-separated list of approved frontend origins")
                .env("SESIO_FRONTEND_ORIGINS")
                .default_value("https://app.sesio.dev")
                .value_delimiter(','),
        )
}

fn with_sweep_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL)
                .long(ARG_SWEEP_INTERVAL)
                .help("Retention sweep interval in seconds")
                .env("SESIO_SWEEP_INTERVAL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_SWEEP_GRACE_DAYS)
                .long(ARG_SWEEP_GRACE_DAYS)
                .help("Days a dead refresh token row is kept before deletion")
                .env("SESIO_SWEEP_GRACE_DAYS")
                .default_value("30")
                .value_parser(clap::value_parser!(i64)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub signing_secret: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub cookie_cross_origin: bool,
    pub cookie_insecure: bool,
    pub frontend_origins: Vec<String>,
    pub sweep_interval_seconds: u64,
    pub sweep_grace_days: i64,
}

impl Options {
    /// Extract session options from parsed matches.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let signing_secret = matches
            .get_one::<String>(ARG_SIGNING_SECRET)
            .cloned()
            .context("missing required argument: --signing-secret")?;

        let frontend_origins = matches
            .get_many::<String>(ARG_FRONTEND_ORIGINS)
            .map(|values| values.cloned().collect())
            .unwrap_or_default();

        Ok(Self {
            signing_secret,
            access_token_ttl_seconds: matches
                .get_one::<i64>(ARG_ACCESS_TOKEN_TTL)
                .copied()
                .unwrap_or(900),
            refresh_token_ttl_seconds: matches
                .get_one::<i64>(ARG_REFRESH_TOKEN_TTL)
                .copied()
                .unwrap_or(604_800),
            cookie_cross_origin: matches.get_flag(ARG_COOKIE_CROSS_ORIGIN),
            cookie_insecure: matches.get_flag(ARG_COOKIE_INSECURE),
            frontend_origins,
            sweep_interval_seconds: matches
                .get_one::<u64>(ARG_SWEEP_INTERVAL)
                .copied()
                .unwrap_or(3600),
            sweep_grace_days: matches
                .get_one::<i64>(ARG_SWEEP_GRACE_DAYS)
                .copied()
                .unwrap_or(30),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches_for(args: Vec<&str>) -> clap::ArgMatches {
        crate::cli::commands::new().get_matches_from(args)
    }

    // Pin the env vars parsing reads so parallel tests cannot interfere.
    fn with_pinned_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(
            [
                ("SESIO_ACCESS_TOKEN_TTL", None::<&str>),
                ("SESIO_REFRESH_TOKEN_TTL", None),
                ("SESIO_COOKIE_CROSS_ORIGIN", None),
                ("SESIO_COOKIE_INSECURE", None),
                ("SESIO_FRONTEND_ORIGINS", None),
                ("SESIO_SWEEP_INTERVAL_SECONDS", None),
                ("SESIO_SWEEP_GRACE_DAYS", None),
            ],
            f,
        );
    }

    #[test]
    fn options_defaults() {
        with_pinned_env(|| {
            let matches = matches_for(vec![
                "sesio",
                "--dsn",
                "postgres://localhost/sesio",
                "--signing-secret",
                "0123456789abcdef0123456789abcdef",
            ]);
            let options = Options::parse(&matches).expect("options should parse");
            assert_eq!(options.access_token_ttl_seconds, 900);
            assert_eq!(options.refresh_token_ttl_seconds, 604_800);
            assert!(!options.cookie_cross_origin);
            assert!(!options.cookie_insecure);
            assert_eq!(
                options.frontend_origins,
                vec!["https://app.sesio.dev".to_string()]
            );
            assert_eq!(options.sweep_interval_seconds, 3600);
            assert_eq!(options.sweep_grace_days, 30);
        });
    }

    #[test]
    fn options_origin_list_splits_on_comma() {
        temp_env::with_vars(
            [(
                "SESIO_FRONTEND_ORIGINS",
                Some("https://app.example.com,https://staging.example.com"),
            )],
            || {
                let matches = matches_for(vec![
                    "sesio",
                    "--dsn",
                    "postgres://localhost/sesio",
                    "--signing-secret",
                    "0123456789abcdef0123456789abcdef",
                ]);
                let options = Options::parse(&matches).expect("options should parse");
                assert_eq!(
                    options.frontend_origins,
                    vec![
                        "https://app.example.com".to_string(),
                        "https://staging.example.com".to_string(),
                    ]
                );
            },
        );
    }

    #[test]
    fn options_overrides() {
        with_pinned_env(|| {
            let matches = matches_for(vec![
                "sesio",
                "--dsn",
                "postgres://localhost/sesio",
                "--signing-secret",
                "0123456789abcdef0123456789abcdef",
                "--access-token-ttl-seconds",
                "120",
                "--refresh-token-ttl-seconds",
                "86400",
                "--cookie-cross-origin",
                "--sweep-interval-seconds",
                "60",
                "--sweep-grace-days",
                "7",
            ]);
            let options = Options::parse(&matches).expect("options should parse");
            assert_eq!(options.access_token_ttl_seconds, 120);
            assert_eq!(options.refresh_token_ttl_seconds, 86_400);
            assert!(options.cookie_cross_origin);
            assert_eq!(options.sweep_interval_seconds, 60);
            assert_eq!(options.sweep_grace_days, 7);
        });
    }
}
