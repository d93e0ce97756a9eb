use super::overrides::ConfigOverrides;
use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, ENV_VAR_PATTERN};
use regex::Regex;
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

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let config = read_config_file(path)?;
    validate_config(&config)?;
    Ok(config)
}

/// Build the effective config: defaults, then the file (if any), then overrides.
pub fn resolve_config(
    path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    };

    overrides.apply(&mut config);
    config.general.offset_file = expand_tilde(&config.general.offset_file);

    validate_config(&config)?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    // Expand environment variables in the YAML string before parsing
    let yaml_string = expand_env_vars(&yaml_string);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = if yaml_string.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(&yaml_string)?
    };

    config.general.offset_file = expand_tilde(&config.general.offset_file);

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(ENV_VAR_PATTERN).expect("static regex");
    let mut unexpanded_vars: Vec<String> = yaml_string
        .lines()
        .map(strip_comment)
        .flat_map(|line| re.captures_iter(line))
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    Err(ConfigError::Validation(format!(
        "environment variables referenced in the config file are not set: {}",
        unexpanded_vars.join(", ")
    )))
}

/// Drop a trailing YAML comment: `#` at the start of a line or after whitespace.
fn strip_comment(line: &str) -> &str {
    let bytes = line.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'#' && (i == 0 || bytes[i - 1].is_ascii_whitespace()) {
            return &line[..i];
        }
    }
    line
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    let mut missing = Vec::new();
    if config.falcon.api_id.is_empty() {
        missing.push("FALCON_API_ID");
    }
    if config.falcon.api_secret.is_empty() {
        missing.push("FALCON_API_SECRET");
    }
    if config.humio.token.is_empty() {
        missing.push("HUMIO_TOKEN");
    }
    if !missing.is_empty() {
        errors.push(format!("Please set missing variables: {}", missing.join(", ")));
    }

    if let Err(e) = url::Url::parse(&config.falcon.url) {
        errors.push(format!("falcon.url '{}' is invalid: {}", config.falcon.url, e));
    }
    if let Err(e) = url::Url::parse(&config.humio.url) {
        errors.push(format!("humio.url '{}' is invalid: {}", config.humio.url, e));
    }

    let advanced = &config.advanced;
    if advanced.app_id.is_empty() {
        errors.push("advanced.app_id cannot be empty".to_string());
    }
    if advanced.bulk_max_size == 0 {
        errors.push("advanced.bulk_max_size must be greater than 0".to_string());
    }
    if advanced.flush_wait_time == 0 {
        errors.push("advanced.flush_wait_time must be greater than 0".to_string());
    }
    if advanced.stream_timeout == 0 {
        errors.push("advanced.stream_timeout must be greater than 0".to_string());
    }
    if advanced.keepalive == 0 {
        errors.push("advanced.keepalive must be greater than 0".to_string());
    }
    if advanced.buffer_limit != 0 && advanced.buffer_limit < advanced.bulk_max_size {
        errors.push(format!(
            "advanced.buffer_limit ({}) must be 0 or at least bulk_max_size ({})",
            advanced.buffer_limit, advanced.bulk_max_size
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_comment() {
        assert_eq!(strip_comment("# $env{X}"), "");
        assert_eq!(strip_comment("token: abc  # $env{X}"), "token: abc  ");
        assert_eq!(strip_comment("url: http://host/#anchor"), "url: http://host/#anchor");
    }

    #[test]
    fn test_unexpanded_var_in_comment_is_ignored() {
        let yaml = "# set $env{CSES2HUMIO_COMMENT_ONLY} before running\nhumio:\n  token: abc # or $env{CSES2HUMIO_COMMENT_ONLY}\n";
        assert!(check_unexpanded_vars(yaml).is_ok());
    }

    #[test]
    fn test_unexpanded_var_in_value_is_reported() {
        let yaml = "humio:\n  token: $env{CSES2HUMIO_VALUE_UNSET}\n";
        match check_unexpanded_vars(yaml) {
            Err(ConfigError::Validation(message)) => {
                assert!(message.contains("CSES2HUMIO_VALUE_UNSET"))
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
