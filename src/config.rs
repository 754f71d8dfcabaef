//! Configuration file support for spark-chat
//!
//! Loads config from ~/.spark-chat/config.toml

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, SparkError};
use crate::session::DEFAULT_TIMEOUT;
use crate::types::{ChatParameters, Domain, SessionCredentials};

/// Configuration for spark-chat
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Application id issued with the key pair
    pub app_id: Option<String>,

    pub api_key: Option<String>,

    pub api_secret: Option<String>,

    /// WebSocket endpoint
    pub url: Option<String>,

    /// Domain override (otherwise derived from the URL path)
    pub domain: Option<String>,

    pub temperature: Option<f32>,

    pub max_tokens: Option<u32>,

    pub top_k: Option<u8>,

    /// Idle timeout in seconds; 0 disables it
    pub timeout_secs: Option<u64>,
}

impl Config {
    /// Load config from ~/.spark-chat/config.toml
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    /// Load config from an explicit path, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Failed to parse {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Sampling parameters from the file, defaults for anything unset
    pub fn parameters(&self) -> ChatParameters {
        let defaults = ChatParameters::default();
        ChatParameters {
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            top_k: self.top_k.unwrap_or(defaults.top_k),
            domain: self.domain.as_deref().and_then(|d| d.parse::<Domain>().ok()),
            chat_id: None,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_secs {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => Some(DEFAULT_TIMEOUT),
        }
    }
}

/// Build credentials, naming whichever value is missing
pub fn require_credentials(
    app_id: Option<String>,
    api_key: Option<String>,
    api_secret: Option<String>,
) -> Result<SessionCredentials> {
    let missing = |name: &str| {
        SparkError::Config(format!(
            "{} required (set via CLI flag, env var, or {})",
            name,
            config_path().display()
        ))
    };

    Ok(SessionCredentials::new(
        app_id.ok_or_else(|| missing("SPARK_APP_ID"))?,
        api_key.ok_or_else(|| missing("SPARK_API_KEY"))?,
        api_secret.ok_or_else(|| missing("SPARK_API_SECRET"))?,
    ))
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".spark-chat")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.api_key.is_none());
        assert!(config.api_secret.is_none());
        assert_eq!(config.timeout(), Some(DEFAULT_TIMEOUT));
    }

    #[test]
    fn test_config_path() {
        let path = config_path();
        assert!(path.to_string_lossy().contains(".spark-chat"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
app_id = "app"
api_key = "key"
api_secret = "secret"
url = "wss://spark-api.xf-yun.com/v3.1/chat"
domain = "general"
max_tokens = 1024
timeout_secs = 0
"#
        )
        .unwrap();

        let config = Config::load_from(file.path());
        assert_eq!(config.app_id.as_deref(), Some("app"));
        assert_eq!(config.url.as_deref(), Some("wss://spark-api.xf-yun.com/v3.1/chat"));
        assert_eq!(config.timeout(), None);

        let params = config.parameters();
        assert_eq!(params.domain, Some(Domain::General));
        assert_eq!(params.max_tokens, 1024);
        assert_eq!(params.top_k, 4);
    }

    #[test]
    fn test_invalid_file_falls_back_to_default() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "this is = = not toml").unwrap();
        let config = Config::load_from(file.path());
        assert!(config.app_id.is_none());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml"));
        assert!(config.url.is_none());
    }

    #[test]
    fn test_require_credentials_names_missing_value() {
        let err = require_credentials(Some("app".into()), None, Some("s".into())).unwrap_err();
        assert!(err.to_string().contains("SPARK_API_KEY"));

        let creds =
            require_credentials(Some("a".into()), Some("k".into()), Some("s".into())).unwrap();
        assert_eq!(creds.app_id, "a");
    }
}
