//! Environment variable names and default paths for DocAIche.
//!
//! This module keeps the process-level names in one place. The per-setting
//! override table lives in [`crate::config::ENV_OVERRIDES`].

use std::path::PathBuf;

/// Variable naming the YAML configuration file
pub const CONFIG_FILE_ENV: &str = "DOCAICHE_CONFIG_FILE";

/// Configuration file name used when no override is set
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Variable holding the configuration database URL
pub const DATABASE_URL_ENV: &str = "DOCAICHE_DATABASE_URL";

/// Log filter used when `RUST_LOG` is unset
pub const LOG_TARGET: &str = "docaiche";

/// Configuration file path from the environment, else `config.yaml`
pub fn config_file_path() -> PathBuf {
    resolve_config_file_path(std::env::var(CONFIG_FILE_ENV).ok().as_deref())
}

pub fn resolve_config_file_path(override_value: Option<&str>) -> PathBuf {
    match override_value.map(str::trim) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

/// Database URL from the environment, if any
pub fn database_url() -> Option<String> {
    std::env::var(DATABASE_URL_ENV)
        .ok()
        .filter(|url| !url.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_config_path_resolution() {
        assert_eq!(resolve_config_file_path(None), Path::new("config.yaml"));
        assert_eq!(resolve_config_file_path(Some("  ")), Path::new("config.yaml"));
        assert_eq!(
            resolve_config_file_path(Some("/etc/docaiche/config.yaml")),
            Path::new("/etc/docaiche/config.yaml")
        );
    }
}
