//! Configuration management, environment loading and credential resolution

use crate::{Result, WrenError};
use std::env;
use std::path::Path;

/// Load environment variables from a .env file
///
/// Loads from a .env file in the current directory or a parent directory.
/// Safe to call multiple times (only loads once).
pub fn load_env() -> Result<()> {
    match dotenvy::dotenv() {
        Ok(path) => {
            tracing::info!("Loaded environment from: {}", path.display());
            Ok(())
        }
        Err(dotenvy::Error::LineParse(line, pos)) => Err(WrenError::config(format!(
            "Failed to parse .env file at line {}, position {}",
            line, pos
        ))),
        Err(dotenvy::Error::Io(_)) => {
            tracing::debug!("No .env file found - using system environment variables only");
            Ok(())
        }
        Err(e) => Err(WrenError::config(format!("Failed to load .env file: {}", e))),
    }
}

/// Load environment variables from a specific file
pub fn load_env_from_path<P: AsRef<Path>>(path: P) -> Result<()> {
    match dotenvy::from_path(path.as_ref()) {
        Ok(_) => {
            tracing::info!("Loaded environment from: {}", path.as_ref().display());
            Ok(())
        }
        Err(e) => Err(WrenError::config(format!(
            "Failed to load {} environment file: {}",
            path.as_ref().display(),
            e
        ))),
    }
}

/// Get optional environment variable with default
pub fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get environment variable as integer
pub fn get_env_int<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Get environment variable as float
pub fn get_env_float(key: &str, default: f32) -> f32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<f32>().ok())
        .unwrap_or(default)
}

/// Resolve a credential: environment variable first, then a dotted path into
/// the settings JSON (`"discord.token"` looks up `settings["discord"]["token"]`).
///
/// Empty strings in either source are treated as unset.
pub fn resolve_credential(
    env_keys: &[&str],
    settings: &serde_json::Value,
    settings_path: &str,
) -> Option<String> {
    for key in env_keys {
        if let Ok(value) = env::var(key) {
            if !value.trim().is_empty() {
                return Some(value);
            }
        }
    }

    let mut node = settings;
    for segment in settings_path.split('.') {
        node = node.get(segment)?;
    }
    node.as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Resolve a credential or fail with a user-facing `MissingCredential` error
pub fn require_credential(
    env_keys: &[&str],
    settings: &serde_json::Value,
    settings_path: &str,
    what: &str,
) -> Result<String> {
    resolve_credential(env_keys, settings, settings_path).ok_or_else(|| {
        WrenError::missing_credential(format!(
            "{} is not configured. Set {} or settings.{}",
            what,
            env_keys.join(" / "),
            settings_path
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_env_or() {
        env::set_var("WREN_TEST_STRING", "hello");
        assert_eq!(get_env_or("WREN_TEST_STRING", "default"), "hello");
        assert_eq!(get_env_or("WREN_TEST_NONEXISTENT", "default"), "default");
        env::remove_var("WREN_TEST_STRING");
    }

    #[test]
    fn test_get_env_int() {
        env::set_var("WREN_TEST_INT", "42");
        assert_eq!(get_env_int("WREN_TEST_INT", 0), 42);
        assert_eq!(get_env_int("WREN_TEST_INT_MISSING", 99), 99);
        env::remove_var("WREN_TEST_INT");
    }

    #[test]
    fn test_resolve_credential_prefers_env() {
        env::set_var("WREN_TEST_TOKEN", "from-env");
        let settings = json!({"discord": {"token": "from-settings"}});
        assert_eq!(
            resolve_credential(&["WREN_TEST_TOKEN"], &settings, "discord.token").as_deref(),
            Some("from-env")
        );
        env::remove_var("WREN_TEST_TOKEN");
    }

    #[test]
    fn test_resolve_credential_falls_back_to_settings() {
        let settings = json!({"discord": {"token": "from-settings"}});
        assert_eq!(
            resolve_credential(&["WREN_TEST_UNSET_TOKEN"], &settings, "discord.token").as_deref(),
            Some("from-settings")
        );
    }

    #[test]
    fn test_resolve_credential_ignores_empty() {
        env::set_var("WREN_TEST_EMPTY_TOKEN", "   ");
        let settings = json!({"discord": {"token": ""}});
        assert_eq!(
            resolve_credential(&["WREN_TEST_EMPTY_TOKEN"], &settings, "discord.token"),
            None
        );
        env::remove_var("WREN_TEST_EMPTY_TOKEN");
    }

    #[test]
    fn test_require_credential_error_is_user_facing() {
        let settings = json!({});
        let err = require_credential(
            &["WREN_TEST_NO_KEY"],
            &settings,
            "voice.transcription.api_key",
            "Transcription API key",
        )
        .unwrap_err();
        assert_eq!(err.code(), "missing_credential");
        assert!(err.to_string().contains("WREN_TEST_NO_KEY"));
    }
}
