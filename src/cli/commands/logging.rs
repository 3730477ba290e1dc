use clap::{builder::ValueParser, Arg, Command};

pub const ARG_VERBOSITY: &str = "verbosity";

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(move |level: &str| -> std::result::Result<u8, String> {
        if let Ok(parsed) = level.parse::<u8>() {
            // Successfully parsed as a number
            if parsed <= 5 {
                return Ok(parsed);
            }
        }

        match level.to_lowercase().as_str() {
            "error" => Ok(0),
            "warn" => Ok(1),
            "info" => Ok(2),
            "debug" => Ok(3),
            "trace" => Ok(4),
            _ => Err("invalid log level".to_string()),
        }
    })
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("SESIO_LOG_LEVEL")
            .global(true)
            .action(clap::ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_env_names_map_to_counts() {
        let levels = ["error", "warn", "info", "debug", "trace"];
        for (index, level) in levels.iter().enumerate() {
            temp_env::with_vars([("SESIO_LOG_LEVEL", Some(*level))], || {
                let command = with_args(Command::new("test"));
                let matches = command.get_matches_from(vec!["test"]);
                assert_eq!(
                    matches.get_one::<u8>(ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn verbosity_flags_accumulate() {
        temp_env::with_vars([("SESIO_LOG_LEVEL", None::<&str>)], || {
            let command = with_args(Command::new("test"));
            let matches = command.get_matches_from(vec!["test", "-vvv"]);
            assert_eq!(matches.get_one::<u8>(ARG_VERBOSITY).copied(), Some(3));
        });
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        temp_env::with_vars([("SESIO_LOG_LEVEL", Some("noisy"))], || {
            let command = with_args(Command::new("test"));
            let result = command.try_get_matches_from(vec!["test"]);
            assert!(result.is_err());
        });
    }
}
