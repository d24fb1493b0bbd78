use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "LegalLens";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hosted OpenAI-compatible endpoint used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.sambanova.ai/v1";
pub const DEFAULT_VISION_MODEL: &str = "Llama-3.2-11B-Vision-Instruct";
pub const DEFAULT_TEXT_MODEL: &str = "Meta-Llama-3.1-70B-Instruct";
pub const DEFAULT_EMAIL_MODEL: &str = "Meta-Llama-3.1-405B-Instruct";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

const SETTINGS_FILE: &str = "settings.json";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "legallens=info,warn"
}

/// Get the application configuration directory.
///
/// `~/.config/legallens` on Linux, the platform equivalent elsewhere.
/// Falls back to the working directory when no config dir can be determined.
pub fn app_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("legallens")
}

/// Path of the optional JSON settings file.
pub fn settings_path() -> PathBuf {
    app_config_dir().join(SETTINGS_FILE)
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

/// Connection settings for the hosted completion service.
///
/// Resolved in three layers: built-in defaults, then the JSON settings file,
/// then environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    /// Never written back to disk by this crate.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub vision_model: String,
    pub text_model: String,
    pub email_model: String,
    pub timeout_secs: u64,
    pub dump_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            email_model: DEFAULT_EMAIL_MODEL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            dump_dir: None,
        }
    }
}

impl Settings {
    /// Load settings from the default file location and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = Self::from_file(&settings_path())?;
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Read a settings file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay environment variables through an injectable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("LEGALLENS_API_KEY").or_else(|| non_empty("SAMBANOVA_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(url) = non_empty("LEGALLENS_BASE_URL") {
            self.base_url = url;
        }
        if let Some(model) = non_empty("LEGALLENS_VISION_MODEL") {
            self.vision_model = model;
        }
        if let Some(model) = non_empty("LEGALLENS_TEXT_MODEL") {
            self.text_model = model;
        }
        if let Some(model) = non_empty("LEGALLENS_EMAIL_MODEL") {
            self.email_model = model;
        }
        if let Some(raw) = non_empty("LEGALLENS_TIMEOUT_SECS") {
            self.timeout_secs = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: "LEGALLENS_TIMEOUT_SECS".into(),
                    value: raw.clone(),
                })?;
        }
        if let Some(dir) = non_empty("LEGALLENS_DUMP_DIR") {
            self.dump_dir = Some(PathBuf::from(dir));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn app_name_is_legallens() {
        assert_eq!(APP_NAME, "LegalLens");
    }

    #[test]
    fn settings_path_under_config_dir() {
        let path = settings_path();
        assert!(path.starts_with(app_config_dir()));
        assert!(path.ends_with("settings.json"));
    }

    #[test]
    fn defaults_point_at_hosted_service() {
        let settings = Settings::default();
        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.timeout_secs, 120);
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::from_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"text_model": "my-model", "timeout_secs": 30}"#).unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.text_model, "my-model");
        assert_eq!(settings.timeout_secs, 30);
        assert_eq!(settings.vision_model, DEFAULT_VISION_MODEL);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Settings::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Json { .. }));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("LEGALLENS_BASE_URL", "http://localhost:8080/v1"),
                ("LEGALLENS_TEXT_MODEL", "local-llm"),
                ("LEGALLENS_TIMEOUT_SECS", "15"),
                ("LEGALLENS_DUMP_DIR", "/tmp/dump"),
            ]))
            .unwrap();

        assert_eq!(settings.base_url, "http://localhost:8080/v1");
        assert_eq!(settings.text_model, "local-llm");
        assert_eq!(settings.timeout_secs, 15);
        assert_eq!(settings.dump_dir, Some(PathBuf::from("/tmp/dump")));
    }

    #[test]
    fn api_key_prefers_legallens_variable() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("LEGALLENS_API_KEY", "primary"),
                ("SAMBANOVA_API_KEY", "fallback"),
            ]))
            .unwrap();
        assert_eq!(settings.api_key.as_deref(), Some("primary"));

        let mut settings = Settings::default();
        settings
            .apply_env(env(&[("SAMBANOVA_API_KEY", "fallback")]))
            .unwrap();
        assert_eq!(settings.api_key.as_deref(), Some("fallback"));
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[("LEGALLENS_TEXT_MODEL", "   ")]))
            .unwrap();
        assert_eq!(settings.text_model, DEFAULT_TEXT_MODEL);
    }

    #[test]
    fn invalid_timeout_rejected() {
        for bad in ["abc", "0", "-3"] {
            let mut settings = Settings::default();
            let err = settings
                .apply_env(env(&[("LEGALLENS_TIMEOUT_SECS", bad)]))
                .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { .. }), "{bad}");
        }
    }

    #[test]
    fn api_key_never_serialized() {
        let settings = Settings {
            api_key: Some("secret".into()),
            ..Settings::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("secret"));
    }
}
