//! Config module - settings file, environment overrides and credentials

pub mod secrets;
pub mod toml_config;

// Re-export commonly used types
pub use secrets::Credentials;
pub use toml_config::{apply_env_overrides, default_config_path, ScoutConfig};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not read config {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("Invalid config file: {0}")]
    Parse(String),
    #[error("Invalid config: {0}")]
    Invalid(String),
    #[error("Missing credential: set {0}")]
    MissingCredential(&'static str),
}
