pub mod generate;
pub mod parse;
pub mod types;

use regex::Regex;
use std::path::{Path, PathBuf};

pub use parse::{load_config, parse_config, validate_config, ConfigError};
pub use types::{Config, StreamingConfig};

/// Expands environment variables in a string.
/// Supports $env{VAR_NAME} syntax.
/// If an environment variable is not set, it's left unchanged.
pub fn expand_env_vars(text: &str) -> String {
    let re = env_var_pattern();

    re.replace_all(text, |caps: &regex::Captures| {
        let whole = caps.get(0).map_or("", |m| m.as_str());
        let var_name = caps.get(1).map_or("", |m| m.as_str());
        std::env::var(var_name).unwrap_or_else(|_| whole.to_string())
    })
    .to_string()
}

pub(crate) fn env_var_pattern() -> Regex {
    // Static pattern, always valid
    Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var pattern")
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

/// Resolves the config file path based on explicit argument or default locations.
/// Returns the first existing path from:
/// 1. Explicit path (if provided, with tilde expansion)
/// 2. ~/.config/sensestream/config.yml
/// 3. /etc/sensestream/config.yml
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(".config/sensestream/config.yml");
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from("/etc/sensestream/config.yml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_expand_env_vars_single() {
        std::env::set_var("SENSESTREAM_TEST_VAR", "test_value");
        let result = expand_env_vars("path/$env{SENSESTREAM_TEST_VAR}/file");
        assert_eq!(result, "path/test_value/file");
        std::env::remove_var("SENSESTREAM_TEST_VAR");
    }

    #[test]
    fn test_expand_env_vars_unset() {
        let result = expand_env_vars("path/$env{SENSESTREAM_NONEXISTENT}/file");
        assert_eq!(result, "path/$env{SENSESTREAM_NONEXISTENT}/file");
    }

    #[test]
    fn test_expand_env_vars_no_expansion() {
        let result = expand_env_vars("plain/path/without/vars");
        assert_eq!(result, "plain/path/without/vars");
    }

    #[test]
    fn test_expand_tilde_with_path() {
        let expanded = expand_tilde(Path::new("~/.snowflake/rsa_key.p8"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join(".snowflake/rsa_key.p8"));
        }
    }

    #[test]
    fn test_expand_tilde_no_expansion() {
        let expanded = expand_tilde(Path::new("/absolute/path"));
        assert_eq!(expanded, Path::new("/absolute/path"));
    }

    #[test]
    fn test_resolve_explicit_path_wins() {
        let resolved = resolve_config_path(Some(Path::new("/tmp/custom.yml")));
        assert_eq!(resolved, Some(PathBuf::from("/tmp/custom.yml")));
    }
}
