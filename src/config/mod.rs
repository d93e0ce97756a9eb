pub mod generate;
pub mod overrides;
pub mod parse;
pub mod types;

use regex::Regex;
use std::path::{Path, PathBuf};

pub use overrides::ConfigOverrides;
pub use parse::{load_config, resolve_config, validate_config, ConfigError};
pub use types::Config;

/// `$env{VAR_NAME}` where VAR_NAME starts with a letter or underscore
pub(crate) const ENV_VAR_PATTERN: &str = r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}";

/// Expands environment variables in a string.
/// Supports $env{VAR_NAME} syntax.
/// If an environment variable is not set, it's left unchanged.
pub fn expand_env_vars(text: &str) -> String {
    let re = Regex::new(ENV_VAR_PATTERN).expect("static regex");

    re.replace_all(text, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .to_string()
}

/// Expands tilde (~) in paths to the user's home directory.
/// Returns the path unchanged if it doesn't start with tilde or home directory cannot be determined.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// User-level config location, `~/.config/cses2humio/config.yml`.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".config/cses2humio/config.yml"))
}

pub const SYSTEM_CONFIG_PATH: &str = "/etc/cses2humio/config.yml";

/// Resolves the config file path based on explicit argument or default locations.
/// Returns the first existing path from:
/// 1. Explicit path (if provided, with tilde expansion)
/// 2. ~/.config/cses2humio/config.yml
/// 3. /etc/cses2humio/config.yml
///
/// No file at all is fine: flags and environment variables can carry everything.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from(SYSTEM_CONFIG_PATH);
    if system_config.exists() {
        return Some(system_config);
    }

    None
}
