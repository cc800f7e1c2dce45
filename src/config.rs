//! Configuration loaded from `coursegen.toml`.
//!
//! Missing keys fall back to defaults. `COURSEGEN_API_KEY`,
//! `COURSEGEN_SERVICE_TOKEN` and `COURSEGEN_CONTENT_URL` take precedence
//! over the file; command-line flags are applied on top by the binary.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::CoursegenError;
use crate::job::{Backoff, RetryPolicy};
use crate::orchestrator::OrchestratorSettings;

pub const CONFIG_FILE: &str = "coursegen.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct CoursegenConfig {
    /// Generator attempts per node, first attempt included.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default)]
    pub backoff: Backoff,

    /// Limit for a single generator attempt.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Base URL of the content service. Unset means no HTTP backend.
    #[serde(default)]
    pub content_service_url: Option<String>,

    /// Bearer key for the content service.
    #[serde(default)]
    pub api_key: String,

    /// Secret a trigger caller must present.
    #[serde(default)]
    pub service_token: String,

    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Receives the final job of every run when set.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_max_concurrency() -> usize {
    4
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".coursegen/jobs")
}

impl Default for CoursegenConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            backoff: Backoff::default(),
            timeout_ms: default_timeout_ms(),
            max_concurrency: default_max_concurrency(),
            content_service_url: None,
            api_key: String::new(),
            service_token: String::new(),
            store_dir: default_store_dir(),
            webhook_url: None,
        }
    }
}

impl CoursegenConfig {
    /// Load `coursegen.toml` from the working directory, then the environment.
    pub fn load() -> Result<Self, CoursegenError> {
        let mut config = Self::from_file(Path::new(CONFIG_FILE))?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file; a missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, CoursegenError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str::<CoursegenConfig>(&contents)?)
    }

    /// Overlay non-empty environment values read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(key) = var("COURSEGEN_API_KEY") {
            self.api_key = key;
        }
        if let Some(token) = var("COURSEGEN_SERVICE_TOKEN") {
            self.service_token = token;
        }
        if let Some(url) = var("COURSEGEN_CONTENT_URL") {
            self.content_service_url = Some(url);
        }
    }

    pub fn validate(&self) -> Result<(), CoursegenError> {
        if self.max_retries == 0 {
            return Err(CoursegenError::Config("max_retries must be at least 1".into()));
        }
        if self.max_concurrency == 0 {
            return Err(CoursegenError::Config(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(CoursegenError::Config("timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay_ms,
            backoff: self.backoff,
            timeout_ms: self.timeout_ms,
        }
    }

    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            policy: self.retry_policy(),
            max_concurrency: self.max_concurrency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_values() {
        let config = CoursegenConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay_ms, 2000);
        assert_eq!(config.backoff, Backoff::Exponential);
        assert_eq!(config.max_concurrency, 4);
        assert!(config.content_service_url.is_none());
        assert!(config.service_token.is_empty());
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            max_retries = 5
            backoff = "fixed"
            content_service_url = "https://content.internal"
            store_dir = "/var/lib/coursegen"
        "#;
        let config: CoursegenConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.backoff, Backoff::Fixed);
        assert_eq!(
            config.content_service_url.as_deref(),
            Some("https://content.internal")
        );
        assert_eq!(config.store_dir, PathBuf::from("/var/lib/coursegen"));
        assert_eq!(config.base_delay_ms, 2000);
        assert_eq!(config.settings().policy.max_retries, 5);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config: CoursegenConfig = toml::from_str(
            r#"
            api_key = "from-file"
            service_token = "file-token"
        "#,
        )
        .unwrap();
        let env: HashMap<&str, &str> = [
            ("COURSEGEN_API_KEY", "from-env"),
            ("COURSEGEN_SERVICE_TOKEN", ""),
            ("COURSEGEN_CONTENT_URL", "http://localhost:9000"),
        ]
        .into();

        config.apply_env(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.api_key, "from-env");
        assert_eq!(config.service_token, "file-token");
        assert_eq!(
            config.content_service_url.as_deref(),
            Some("http://localhost:9000")
        );
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CoursegenConfig::from_file(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "max_retries = \"many\"").unwrap();
        assert!(matches!(
            CoursegenConfig::from_file(&path),
            Err(CoursegenError::Toml(_))
        ));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let config = CoursegenConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CoursegenError::Config(_))));
    }
}
