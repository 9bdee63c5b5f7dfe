//! TOML Configuration with Environment Variable Overrides
//!
//! Every setting has a default, so a missing config file is fine. Precedence is
//! defaults, then the TOML file, then `CITY_SCOUT_*` environment variables.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::ConfigError;
use crate::agents::VerdictMode;
use crate::ai::ProviderKind;
use crate::tools::web_search::DEFAULT_SEARCH_ENDPOINT;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScoutConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub check: CheckConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_max_completion_tokens")]
    pub max_completion_tokens: usize,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    /// Stop sequences sent with every request
    #[serde(default)]
    pub stop: Option<Vec<String>>,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model_id() -> String {
    "gpt-4o".to_string()
}
fn default_max_completion_tokens() -> usize {
    8096
}
fn default_model_timeout() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model_id: default_model_id(),
            api_base: None,
            max_completion_tokens: default_max_completion_tokens(),
            temperature: None,
            top_p: None,
            stop: None,
            timeout_secs: default_model_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

fn default_search_endpoint() -> String {
    DEFAULT_SEARCH_ENDPOINT.to_string()
}
fn default_search_timeout() -> u64 {
    30
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            timeout_secs: default_search_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

fn default_fetch_timeout() -> u64 {
    20
}
fn default_max_chars() -> usize {
    40_000
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_chars: default_max_chars(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default = "default_web_max_steps")]
    pub web_max_steps: usize,
    #[serde(default = "default_manager_max_steps")]
    pub manager_max_steps: usize,
    #[serde(default = "default_planning_interval")]
    pub planning_interval: usize,
    #[serde(default = "default_verbosity")]
    pub verbosity: u8,
}

fn default_web_max_steps() -> usize {
    10
}
fn default_manager_max_steps() -> usize {
    15
}
fn default_planning_interval() -> usize {
    5
}
fn default_verbosity() -> u8 {
    2
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            web_max_steps: default_web_max_steps(),
            manager_max_steps: default_manager_max_steps(),
            planning_interval: default_planning_interval(),
            verbosity: default_verbosity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_python_bin")]
    pub python_bin: String,
    #[serde(default = "default_authorized_imports")]
    pub authorized_imports: Vec<String>,
    #[serde(default = "default_code_timeout")]
    pub timeout_secs: u64,
    /// Directory snippets run in; defaults to the current directory
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_python_bin() -> String {
    "python3".to_string()
}
fn default_authorized_imports() -> Vec<String> {
    [
        "geopandas",
        "plotly",
        "plotly.express",
        "plotly.express.colors",
        "shapely",
        "json",
        "pandas",
        "numpy",
    ]
    .iter()
    .map(|m| m.to_string())
    .collect()
}
fn default_code_timeout() -> u64 {
    60
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            python_bin: default_python_bin(),
            authorized_imports: default_authorized_imports(),
            timeout_secs: default_code_timeout(),
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConfig {
    #[serde(default = "default_artifact_path")]
    pub artifact_path: PathBuf,
    #[serde(default)]
    pub verdict_mode: VerdictMode,
}

fn default_artifact_path() -> PathBuf {
    PathBuf::from("saved_map.png")
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            artifact_path: default_artifact_path(),
            verdict_mode: VerdictMode::default(),
        }
    }
}

/// `<config_dir>/city-scout/config.toml`
pub fn default_config_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("city-scout");
    path.push("config.toml");
    path
}

impl ScoutConfig {
    /// Load configuration. An explicit path must exist; the default path may not.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        let config = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|e| ConfigError::Read {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            let config = Self::from_toml(&contents)?;
            tracing::info!("Loaded config from {:?}", path);
            config
        } else if required {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                reason: "file not found".to_string(),
            });
        } else {
            tracing::debug!("No config file at {:?}, using defaults", path);
            Self::default()
        };

        let config = apply_env_overrides(config, |key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn provider_kind(&self) -> Result<ProviderKind, ConfigError> {
        ProviderKind::from_str(&self.model.provider).ok_or_else(|| {
            ConfigError::Invalid(format!("unknown model provider '{}'", self.model.provider))
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.provider_kind()?;

        if self.agents.web_max_steps == 0 || self.agents.manager_max_steps == 0 {
            return Err(ConfigError::Invalid("max steps must be at least 1".to_string()));
        }
        if self.agents.verbosity > 2 {
            return Err(ConfigError::Invalid("verbosity must be 0, 1 or 2".to_string()));
        }
        for (name, secs) in [
            ("model.timeout_secs", self.model.timeout_secs),
            ("search.timeout_secs", self.search.timeout_secs),
            ("fetch.timeout_secs", self.fetch.timeout_secs),
            ("sandbox.timeout_secs", self.sandbox.timeout_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        if self.fetch.max_chars == 0 {
            return Err(ConfigError::Invalid("fetch.max_chars must be positive".to_string()));
        }
        if self.check.artifact_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("check.artifact_path must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Apply `CITY_SCOUT_*` overrides. `lookup` is normally `std::env::var`.
pub fn apply_env_overrides<F>(mut config: ScoutConfig, lookup: F) -> ScoutConfig
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(model) = non_empty("CITY_SCOUT_MODEL") {
        config.model.model_id = model;
    }

    if let Some(api_base) = non_empty("CITY_SCOUT_API_BASE") {
        config.model.api_base = Some(api_base);
    }

    if let Some(artifact) = non_empty("CITY_SCOUT_ARTIFACT") {
        config.check.artifact_path = PathBuf::from(artifact);
    }

    if let Some(python) = non_empty("CITY_SCOUT_PYTHON") {
        config.sandbox.python_bin = python;
    }

    if let Some(mode) = non_empty("CITY_SCOUT_VERDICT_MODE") {
        match VerdictMode::from_str(&mode) {
            Some(mode) => config.check.verdict_mode = mode,
            None => tracing::warn!("Ignoring unknown CITY_SCOUT_VERDICT_MODE '{}'", mode),
        }
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ScoutConfig::default();
        assert_eq!(config.model.model_id, "gpt-4o");
        assert_eq!(config.model.max_completion_tokens, 8096);
        assert_eq!(config.fetch.timeout_secs, 20);
        assert_eq!(config.fetch.max_chars, 40_000);
        assert_eq!(config.agents.web_max_steps, 10);
        assert_eq!(config.agents.manager_max_steps, 15);
        assert_eq!(config.agents.planning_interval, 5);
        assert_eq!(config.check.artifact_path, PathBuf::from("saved_map.png"));
        assert_eq!(config.check.verdict_mode, VerdictMode::Substring);
        assert!(config.sandbox.authorized_imports.contains(&"plotly.express".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ScoutConfig::from_toml(
            r#"
            [fetch]
            max_chars = 1000

            [check]
            verdict_mode = "strict"
            "#,
        )
        .unwrap();
        assert_eq!(config.fetch.max_chars, 1000);
        assert_eq!(config.fetch.timeout_secs, 20);
        assert_eq!(config.check.verdict_mode, VerdictMode::Strict);
        assert_eq!(config.model.model_id, "gpt-4o");
    }

    #[test]
    fn test_model_sampling_settings() {
        let config = ScoutConfig::from_toml(
            r#"
            [model]
            top_p = 0.9
            stop = ["Observation:"]
            "#,
        )
        .unwrap();
        assert_eq!(config.model.top_p, Some(0.9));
        assert_eq!(config.model.stop, Some(vec!["Observation:".to_string()]));
        assert_eq!(config.model.temperature, None);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ScoutConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(ScoutConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CITY_SCOUT_MODEL", "gpt-4o-mini"),
            ("CITY_SCOUT_ARTIFACT", "out/map.png"),
            ("CITY_SCOUT_VERDICT_MODE", "strict"),
            ("CITY_SCOUT_PYTHON", ""),
        ]
        .into_iter()
        .collect();

        let config = apply_env_overrides(ScoutConfig::default(), |k| {
            env.get(k).map(|v| v.to_string())
        });
        assert_eq!(config.model.model_id, "gpt-4o-mini");
        assert_eq!(config.check.artifact_path, PathBuf::from("out/map.png"));
        assert_eq!(config.check.verdict_mode, VerdictMode::Strict);
        // Empty values are ignored
        assert_eq!(config.sandbox.python_bin, "python3");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ScoutConfig::default();
        config.agents.manager_max_steps = 0;
        assert!(config.validate().is_err());

        let mut config = ScoutConfig::default();
        config.model.provider = "mystery".to_string();
        assert!(config.validate().is_err());

        let mut config = ScoutConfig::default();
        config.fetch.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            ScoutConfig::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }
}
