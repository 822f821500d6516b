//! Bridge Configuration
//!
//! Settings are resolved with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! The file lives at `$XDG_CONFIG_HOME/codepulse/bridge.toml` (typically
//! `~/.config/codepulse/bridge.toml`). A missing file is not an error.
//!
//! ```toml
//! [provider]
//! kind = "gemini"
//! model = "gemini-1.5-flash"
//! fallback_model = "gemini-1.5-flash-latest"
//! request_timeout_secs = 120
//!
//! [session]
//! default_strictness = 2
//! ```
//!
//! API keys are only read from the environment (`GEMINI_API_KEY`,
//! `GROQ_API_KEY`).

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::{ProviderConfig, ProviderKind};
use crate::session::Strictness;

/// Environment variable selecting the backend
pub const PROVIDER_ENV: &str = "AI_PROVIDER";
/// Environment variable setting the initial strictness
pub const STRICTNESS_ENV: &str = "CODEPULSE_STRICTNESS";

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Where the highest-priority value came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Default value
    #[default]
    Default,
    /// TOML configuration file
    File,
    /// Environment variable
    Env,
    /// Command-line argument
    Cli,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Root of `bridge.toml`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeToml {
    /// `[provider]`
    pub provider: ProviderToml,
    /// `[session]`
    pub session: SessionToml,
}

/// `[provider]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderToml {
    /// `gemini` or `groq`
    pub kind: Option<String>,
    /// Primary model
    pub model: Option<String>,
    /// Model used after a rate limit
    pub fallback_model: Option<String>,
    /// API root
    pub base_url: Option<String>,
    /// Per-request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// `[session]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionToml {
    /// Strictness for a fresh session (1-4)
    pub default_strictness: Option<i64>,
}

/// Fully resolved bridge settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Provider settings
    pub provider: ProviderConfig,
    /// Strictness of a fresh session
    pub default_strictness: Strictness,
    /// File the settings were read from, if any
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::new(ProviderKind::default()),
            default_strictness: Strictness::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl BridgeConfig {
    /// Highest-priority layer that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    fn raise_source(&mut self, source: ConfigSource) {
        self.source = self.source.max(source);
    }
}

/// Values supplied on the command line
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Backend override
    pub provider: Option<ProviderKind>,
    /// Primary model override
    pub model: Option<String>,
    /// Strictness override
    pub strictness: Option<Strictness>,
}

impl ConfigOverrides {
    /// Create an empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set backend override
    #[must_use]
    pub fn with_provider(mut self, kind: ProviderKind) -> Self {
        self.provider = Some(kind);
        self
    }

    /// Set model override
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set strictness override
    #[must_use]
    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = Some(strictness);
        self
    }

    fn apply(&self, config: &mut BridgeConfig) {
        if let Some(model) = &self.model {
            config.provider.model.clone_from(model);
            config.raise_source(ConfigSource::Cli);
        }
        if let Some(strictness) = self.strictness {
            config.default_strictness = strictness;
            config.raise_source(ConfigSource::Cli);
        }
    }
}

/// Get the default configuration file path
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("codepulse").join("bridge.toml"))
}

/// Load configuration from the default path and the process environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or a value
/// is invalid.
pub fn load_config(overrides: &ConfigOverrides) -> Result<BridgeConfig, ConfigError> {
    load_config_from_path(default_config_path(), overrides)
}

/// Load configuration from a specific path and the process environment
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or a value is
/// invalid.
pub fn load_config_from_path(
    path: Option<PathBuf>,
    overrides: &ConfigOverrides,
) -> Result<BridgeConfig, ConfigError> {
    load_config_with_env(path, overrides, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env(
    path: Option<PathBuf>,
    overrides: &ConfigOverrides,
    env: impl Fn(&str) -> Option<String>,
) -> Result<BridgeConfig, ConfigError> {
    let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());
    let mut config = BridgeConfig::default();

    let toml_config = match &path {
        Some(config_path) if config_path.exists() => {
            let content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;
            let parsed: BridgeToml = toml::from_str(&content)?;
            config.config_file_path = Some(config_path.clone());
            config.raise_source(ConfigSource::File);
            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
            Some(parsed)
        }
        Some(config_path) => {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
            None
        }
        None => None,
    };
    let toml_config = toml_config.unwrap_or_default();

    // The backend decides which model and key variables apply, so it is
    // resolved before everything else.
    let file_kind = toml_config
        .provider
        .kind
        .as_deref()
        .map(parse_kind)
        .transpose()?;
    let env_kind = env(PROVIDER_ENV).as_deref().map(parse_kind).transpose()?;
    let kind = overrides
        .provider
        .or(env_kind)
        .or(file_kind)
        .unwrap_or_default();
    if overrides.provider.is_some() {
        config.raise_source(ConfigSource::Cli);
    } else if env_kind.is_some() {
        config.raise_source(ConfigSource::Env);
    }
    config.provider = ProviderConfig::new(kind);

    // Model settings in the file describe the file's backend only.
    if file_kind.unwrap_or_default() == kind {
        apply_provider_toml(&mut config.provider, &toml_config.provider);
    } else if let Some(secs) = toml_config.provider.request_timeout_secs {
        config.provider.request_timeout = Duration::from_secs(secs);
    }
    if let Some(level) = toml_config.session.default_strictness {
        config.default_strictness = parse_strictness(level)?;
    }

    apply_env_config(&mut config, &env)?;
    overrides.apply(&mut config);
    validate(&config)?;

    tracing::debug!(
        provider = %config.provider.kind,
        model = %config.provider.model,
        strictness = config.default_strictness.level(),
        source = %config.source,
        "Configuration resolved"
    );
    Ok(config)
}

fn apply_provider_toml(provider: &mut ProviderConfig, toml: &ProviderToml) {
    if let Some(model) = &toml.model {
        provider.model.clone_from(model);
    }
    if let Some(fallback) = &toml.fallback_model {
        provider.fallback_model = Some(fallback.clone()).filter(|f| !f.trim().is_empty());
    }
    if let Some(base_url) = &toml.base_url {
        provider.base_url.clone_from(base_url);
    }
    if let Some(secs) = toml.request_timeout_secs {
        provider.request_timeout = Duration::from_secs(secs);
    }
}

fn apply_env_config(
    config: &mut BridgeConfig,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    let kind = config.provider.kind;

    if let Some(model) = env(kind.model_env()) {
        config.provider.model = model.trim().to_string();
        config.raise_source(ConfigSource::Env);
    }
    if let Some(fallback) = env(kind.fallback_model_env()) {
        config.provider.fallback_model = Some(fallback.trim().to_string());
        config.raise_source(ConfigSource::Env);
    }
    if let Some(key) = env(kind.api_key_env()) {
        config.provider.api_key = Some(key.trim().to_string());
    }
    if let Some(level) = env(STRICTNESS_ENV) {
        let level = level.trim().parse::<i64>().map_err(|_| {
            ConfigError::ValidationError(format!("{STRICTNESS_ENV} must be an integer, got {level:?}"))
        })?;
        config.default_strictness = parse_strictness(level)?;
        config.raise_source(ConfigSource::Env);
    }
    Ok(())
}

fn parse_kind(value: &str) -> Result<ProviderKind, ConfigError> {
    value.parse().map_err(ConfigError::ValidationError)
}

fn parse_strictness(level: i64) -> Result<Strictness, ConfigError> {
    Strictness::new(level).map_err(|e| ConfigError::ValidationError(e.to_string()))
}

fn validate(config: &BridgeConfig) -> Result<(), ConfigError> {
    if config.provider.model.trim().is_empty() {
        return Err(ConfigError::ValidationError("model must not be empty".to_string()));
    }
    if config.provider.request_timeout.is_zero() {
        return Err(ConfigError::ValidationError(
            "request_timeout_secs must be greater than zero".to_string(),
        ));
    }
    if !config.provider.base_url.starts_with("http://")
        && !config.provider.base_url.starts_with("https://")
    {
        return Err(ConfigError::ValidationError(format!(
            "base_url must be an http(s) URL, got {:?}",
            config.provider.base_url
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file() {
        let config = load_config_with_env(None, &ConfigOverrides::new(), no_env).unwrap();
        assert_eq!(config.provider.kind, ProviderKind::Gemini);
        assert_eq!(config.provider.model, "gemini-1.5-flash");
        assert_eq!(config.default_strictness, Strictness::MID);
        assert_eq!(config.provider.api_key, None);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let path = PathBuf::from("/nonexistent/codepulse/bridge.toml");
        let config = load_config_with_env(Some(path), &ConfigOverrides::new(), no_env).unwrap();
        assert_eq!(config.config_file_path, None);
    }

    #[test]
    fn test_file_values() {
        let file = write_toml(
            r#"
[provider]
kind = "groq"
model = "llama-3.1-8b-instant"
fallback_model = "llama-3.3-70b-versatile"
request_timeout_secs = 30

[session]
default_strictness = 3
"#,
        );

        let config = load_config_with_env(
            Some(file.path().to_path_buf()),
            &ConfigOverrides::new(),
            no_env,
        )
        .unwrap();

        assert_eq!(config.provider.kind, ProviderKind::Groq);
        assert_eq!(config.provider.model, "llama-3.1-8b-instant");
        assert_eq!(
            config.provider.fallback_model.as_deref(),
            Some("llama-3.3-70b-versatile")
        );
        assert_eq!(config.provider.request_timeout, Duration::from_secs(30));
        assert_eq!(config.default_strictness, Strictness::SENIOR);
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_toml("[provider]\nmodel = \"from-file\"\n");
        let env = env_from(&[
            ("GEMINI_MODEL", "from-env"),
            ("GEMINI_API_KEY", "k-123"),
            ("CODEPULSE_STRICTNESS", "1"),
        ]);

        let config =
            load_config_with_env(Some(file.path().to_path_buf()), &ConfigOverrides::new(), env)
                .unwrap();

        assert_eq!(config.provider.model, "from-env");
        assert_eq!(config.provider.api_key.as_deref(), Some("k-123"));
        assert_eq!(config.default_strictness, Strictness::JUNIOR);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_cli_overrides_env() {
        let env = env_from(&[("AI_PROVIDER", "gemini"), ("GROQ_API_KEY", "g-1")]);
        let overrides = ConfigOverrides::new()
            .with_provider(ProviderKind::Groq)
            .with_model("cli-model")
            .with_strictness(Strictness::PRINCIPAL);

        let config = load_config_with_env(None, &overrides, env).unwrap();

        assert_eq!(config.provider.kind, ProviderKind::Groq);
        assert_eq!(config.provider.model, "cli-model");
        assert_eq!(config.provider.api_key.as_deref(), Some("g-1"));
        assert_eq!(config.default_strictness, Strictness::PRINCIPAL);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_file_models_ignored_for_other_backend() {
        let file = write_toml("[provider]\nkind = \"gemini\"\nmodel = \"gemini-2.0-flash\"\n");
        let env = env_from(&[("AI_PROVIDER", "groq")]);

        let config =
            load_config_with_env(Some(file.path().to_path_buf()), &ConfigOverrides::new(), env)
                .unwrap();

        assert_eq!(config.provider.kind, ProviderKind::Groq);
        assert_eq!(config.provider.model, "llama-3.3-70b-versatile");
    }

    #[test]
    fn test_blank_env_is_ignored() {
        let env = env_from(&[("AI_PROVIDER", "  "), ("GEMINI_MODEL", "")]);
        let config = load_config_with_env(None, &ConfigOverrides::new(), env).unwrap();
        assert_eq!(config.provider.kind, ProviderKind::Gemini);
        assert_eq!(config.provider.model, "gemini-1.5-flash");
    }

    #[test]
    fn test_invalid_values() {
        let env = env_from(&[("AI_PROVIDER", "openai")]);
        let err = load_config_with_env(None, &ConfigOverrides::new(), env).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let env = env_from(&[("CODEPULSE_STRICTNESS", "5")]);
        let err = load_config_with_env(None, &ConfigOverrides::new(), env).unwrap_err();
        assert!(err.to_string().contains("Invalid strictness level: 5"));

        let file = write_toml("[provider]\nrequest_timeout_secs = 0\n");
        let err = load_config_with_env(
            Some(file.path().to_path_buf()),
            &ConfigOverrides::new(),
            no_env,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = write_toml("[provider\nkind = 3\n");
        let result = load_config_with_env(
            Some(file.path().to_path_buf()),
            &ConfigOverrides::new(),
            no_env,
        );
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let file = write_toml("[provider]\ntemperature = 0.2\n");
        let result = load_config_with_env(
            Some(file.path().to_path_buf()),
            &ConfigOverrides::new(),
            no_env,
        );
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_default_config_path() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("codepulse/bridge.toml"));
        }
    }
}
