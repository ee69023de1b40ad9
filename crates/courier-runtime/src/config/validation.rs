//! Configuration validation utilities.

use std::collections::HashSet;

use courier_core::BotProfile;
use tracing_subscriber::filter::Directive;

use super::error::{ConfigError, ConfigResult};
use super::schema::{CourierConfig, DispatchConfig, LogOutput, LoggingConfig};

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validates the entire configuration.
pub fn validate_config(config: &CourierConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_dispatch_config(&config.dispatch)?;
    validate_profiles(&config.profiles)?;
    Ok(())
}

fn validate_log_level(level: &str) -> ConfigResult<()> {
    if !VALID_LOG_LEVELS.contains(&level.to_lowercase().as_str()) {
        return Err(ConfigError::validation(format!(
            "Invalid log level: {level}. Valid values are: {VALID_LOG_LEVELS:?}"
        )));
    }
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    validate_log_level(&logging.level)?;

    for (target, level) in &logging.filters {
        if target.is_empty() {
            return Err(ConfigError::validation("Log filter target cannot be empty"));
        }
        validate_log_level(level)?;
        if let Err(e) = format!("{target}={level}").parse::<Directive>() {
            return Err(ConfigError::validation(format!(
                "Invalid log filter for '{target}': {e}"
            )));
        }
    }

    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    Ok(())
}

fn validate_dispatch_config(dispatch: &DispatchConfig) -> ConfigResult<()> {
    if dispatch.max_in_flight == 0 {
        return Err(ConfigError::validation(
            "dispatch.max_in_flight must be greater than 0",
        ));
    }
    if dispatch.max_pending < dispatch.max_in_flight {
        return Err(ConfigError::validation(format!(
            "dispatch.max_pending ({}) must be at least dispatch.max_in_flight ({})",
            dispatch.max_pending, dispatch.max_in_flight
        )));
    }
    Ok(())
}

fn validate_profiles(profiles: &[BotProfile]) -> ConfigResult<()> {
    let mut seen = HashSet::new();

    for profile in profiles {
        let language = profile.language_code.trim();
        if language.is_empty() {
            return Err(ConfigError::missing_field("profiles.language_code"));
        }
        if language.contains(char::is_whitespace) {
            return Err(ConfigError::validation(format!(
                "Language code cannot contain spaces: {language}"
            )));
        }
        if !seen.insert(language.to_lowercase()) {
            return Err(ConfigError::DuplicateProfile(language.to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn profile(language_code: &str) -> BotProfile {
        BotProfile {
            language_code: language_code.to_string(),
            name: Some("Courier".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&CourierConfig::default()).is_ok());
    }

    #[rstest]
    #[case("info", true)]
    #[case("DEBUG", true)]
    #[case("verbose", false)]
    #[case("", false)]
    fn test_validate_log_level(#[case] level: &str, #[case] ok: bool) {
        let mut config = CourierConfig::default();
        config.logging.level = level.to_string();
        assert_eq!(validate_config(&config).is_ok(), ok);
    }

    #[test]
    fn test_validate_filter_levels() {
        let mut config = CourierConfig::default();
        config
            .logging
            .filters
            .insert("courier_framework".into(), "loud".into());
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_validate_file_output_requires_path() {
        let mut config = CourierConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));

        config.logging.file_path = Some("courier.log".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_max_in_flight() {
        let mut config = CourierConfig::default();
        config.dispatch.max_in_flight = 0;
        assert!(validate_config(&config).is_err());
    }

    #[rstest]
    #[case(64, 1024, true)]
    #[case(4, 4, true)]
    #[case(8, 4, false)]
    fn test_validate_max_pending(
        #[case] max_in_flight: usize,
        #[case] max_pending: usize,
        #[case] ok: bool,
    ) {
        let mut config = CourierConfig::default();
        config.dispatch.max_in_flight = max_in_flight;
        config.dispatch.max_pending = max_pending;
        assert_eq!(validate_config(&config).is_ok(), ok);
    }

    #[test]
    fn test_validate_filter_directive() {
        let mut config = CourierConfig::default();
        config
            .logging
            .filters
            .insert("courier_runtime".into(), "debug".into());
        assert!(validate_config(&config).is_ok());

        config
            .logging
            .filters
            .insert("courier[unclosed".into(), "debug".into());
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_validate_profiles() {
        let mut config = CourierConfig::default();
        config.profiles = vec![profile("en"), profile("ru")];
        assert!(validate_config(&config).is_ok());

        config.profiles.push(profile("EN"));
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::DuplicateProfile(code)) if code == "EN"
        ));

        config.profiles = vec![profile("")];
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }
}
