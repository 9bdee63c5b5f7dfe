//! API credentials
//!
//! Keys come from the environment (after `.env` is loaded) and are never
//! written to config files or logs.

use super::ConfigError;

pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const TAVILY_API_KEY: &str = "TAVILY_API_KEY";

#[derive(Clone)]
pub struct Credentials {
    pub openai_api_key: String,
    pub tavily_api_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("tavily_api_key", &redact(&self.tavily_api_key))
            .finish()
    }
}

fn redact(key: &str) -> String {
    if key.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{}****", key.chars().take(4).collect::<String>())
    }
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &'static str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingCredential(key))
        };

        Ok(Self {
            openai_api_key: require(OPENAI_API_KEY)?,
            tavily_api_key: require(TAVILY_API_KEY)?,
        })
    }
}

/// Search key only, for the standalone `search` command
pub fn tavily_key_from_env() -> Result<String, ConfigError> {
    std::env::var(TAVILY_API_KEY)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingCredential(TAVILY_API_KEY))
}
