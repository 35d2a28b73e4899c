use super::types::*;
use crate::config::{env_var_pattern, expand_env_vars, expand_tilde};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(err) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), err),
        )),
        other => other,
    })
}

/// Parse and validate a config from a YAML string
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml_string = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;

    if let Some(key_file) = config.auth.private_key_file.as_mut() {
        *key_file = expand_tilde(key_file);
    }

    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = env_var_pattern();
    let mut unexpanded: Vec<String> = re
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded.is_empty() {
        return Ok(());
    }

    unexpanded.sort();
    unexpanded.dedup();

    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}\n\
         \n\
         To fix this, either:\n\
         1. Set the environment variables (e.g., export SNOWFLAKE_KEY_PASSPHRASE=...)\n\
         2. Replace the variables in the config file with literal values",
        unexpanded.join(", ")
    )))
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_snowflake(&config.snowflake, &mut errors);
    validate_auth(&config.auth, &mut errors);
    validate_streaming(&config.streaming, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_snowflake(snowflake: &SnowflakeConfig, errors: &mut Vec<String>) {
    let required = [
        ("snowflake.account", &snowflake.account),
        ("snowflake.user", &snowflake.user),
        ("snowflake.database", &snowflake.database),
        ("snowflake.schema", &snowflake.schema),
        ("snowflake.pipe", &snowflake.pipe),
        ("snowflake.channel_name", &snowflake.channel_name),
    ];

    for (name, value) in required {
        if value.trim().is_empty() {
            errors.push(format!("{} cannot be empty", name));
        }
    }

    // Identifiers end up as URL path segments
    for (name, value) in [
        ("snowflake.database", &snowflake.database),
        ("snowflake.schema", &snowflake.schema),
        ("snowflake.pipe", &snowflake.pipe),
        ("snowflake.channel_name", &snowflake.channel_name),
    ] {
        if value.contains('/') || value.contains('?') || value.contains(char::is_whitespace) {
            errors.push(format!(
                "{} '{}' must not contain '/', '?' or whitespace",
                name, value
            ));
        }
    }

    if let Some(url) = &snowflake.url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            errors.push(format!(
                "snowflake.url '{}' must start with http:// or https://",
                url
            ));
        }
    }
}

fn validate_auth(auth: &AuthConfig, errors: &mut Vec<String>) {
    match (&auth.private_key_file, &auth.pat_token) {
        (None, None) => errors.push(
            "auth: either 'private_key_file' or 'pat_token' must be provided".to_string(),
        ),
        (Some(_), Some(_)) => errors.push(
            "auth: 'private_key_file' and 'pat_token' are mutually exclusive".to_string(),
        ),
        (Some(path), None) => {
            if !path.exists() {
                errors.push(format!(
                    "auth.private_key_file '{}' does not exist",
                    path.display()
                ));
            }
        }
        (None, Some(token)) => {
            if token.trim().is_empty() {
                errors.push("auth.pat_token cannot be empty".to_string());
            }
        }
    }

    if auth.private_key_passphrase.is_some() && auth.private_key_file.is_none() {
        errors.push(
            "auth.private_key_passphrase requires auth.private_key_file".to_string(),
        );
    }
}

fn validate_streaming(streaming: &StreamingConfig, errors: &mut Vec<String>) {
    if streaming.batch_size == 0 {
        errors.push("streaming.batch_size must be at least 1".to_string());
    }
    if streaming.batch_interval.is_zero() {
        errors.push("streaming.batch_interval must be greater than zero".to_string());
    }
    if streaming.reading_interval.is_zero() {
        errors.push("streaming.reading_interval must be greater than zero".to_string());
    }
    if streaming.request_timeout.is_zero() {
        errors.push("streaming.request_timeout must be greater than zero".to_string());
    }
    if streaming.retry.max_attempts == 0 {
        errors.push("streaming.retry.max_attempts must be at least 1".to_string());
    }
    if streaming.retry.base_delay > streaming.retry.max_delay {
        errors.push(
            "streaming.retry.base_delay must not exceed streaming.retry.max_delay".to_string(),
        );
    }
    if streaming.shutdown.commit_poll_interval.is_zero() {
        errors.push(
            "streaming.shutdown.commit_poll_interval must be greater than zero".to_string(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const MINIMAL: &str = r#"
snowflake:
  account: myorg-myaccount
  user: sensehat_user
  database: DEMO
  schema: DEMO
  pipe: SENSEHAT_PIPE
auth:
  pat_token: abc123
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.snowflake.channel_name, "SENSEHAT_CHNL");
        assert_eq!(config.streaming.batch_size, 10);
        assert_eq!(config.streaming.batch_interval, Duration::from_secs(5));
        assert_eq!(config.streaming.reading_interval, Duration::from_millis(500));
        assert_eq!(config.streaming.retry.max_attempts, 5);
        assert!(config.streaming.shutdown.verify_commit);
        assert!(!config.sensor.simulate);
    }

    #[test]
    fn test_control_url_derived_from_account() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(
            config.snowflake.control_url(),
            "https://myorg-myaccount.snowflakecomputing.com"
        );
    }

    #[test]
    fn test_missing_auth_method_rejected() {
        let yaml = MINIMAL.replace("  pat_token: abc123\n", "  private_key_passphrase: x\n");
        let err = parse_config(&yaml).unwrap_err();
        match err {
            ConfigError::ValidationList(errors) => {
                assert!(errors.iter().any(|e| e.contains("either 'private_key_file'")));
                assert!(errors.iter().any(|e| e.contains("requires auth.private_key_file")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let yaml = format!("{MINIMAL}streaming:\n  batch_size: 0\n");
        let err = parse_config(&yaml).unwrap_err();
        assert!(err.to_string().contains("batch_size must be at least 1"));
    }

    #[test]
    fn test_humantime_durations() {
        let yaml = format!(
            "{MINIMAL}streaming:\n  batch_interval: 30s\n  reading_interval: 250ms\n  retry:\n    max_delay: 2m\n"
        );
        let config = parse_config(&yaml).unwrap();
        assert_eq!(config.streaming.batch_interval, Duration::from_secs(30));
        assert_eq!(config.streaming.reading_interval, Duration::from_millis(250));
        assert_eq!(config.streaming.retry.max_delay, Duration::from_secs(120));
    }

    #[test]
    fn test_unexpanded_env_var_reported() {
        let yaml = MINIMAL.replace("abc123", "$env{SENSESTREAM_UNSET_PAT}");
        let err = parse_config(&yaml).unwrap_err();
        assert!(err.to_string().contains("SENSESTREAM_UNSET_PAT"));
    }
}
