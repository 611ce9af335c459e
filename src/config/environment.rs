//! Deployment environment, selecting the `{environment}.toml` overlay

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Staging,
    Production,
}

impl Environment {
    /// Variable consulted when `--env` is not given
    pub const ENV_VAR: &'static str = "FLOWCRON_APP_ENV";

    pub const ALL: [Environment; 4] = [
        Environment::Development,
        Environment::Test,
        Environment::Staging,
        Environment::Production,
    ];

    /// Read `FLOWCRON_APP_ENV`. Unset means `Development`; an unknown
    /// value is an error rather than a silent fallback.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(Self::ENV_VAR) {
            Ok(value) if !value.trim().is_empty() => value.parse(),
            _ => Ok(Self::default()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    /// Name of the optional overlay file in the config directory
    pub fn overlay_file(&self) -> String {
        format!("{}.toml", self.as_str())
    }

    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Environment::Development => &["dev"],
            Environment::Test => &[],
            Environment::Staging => &["stage"],
            Environment::Production => &["prod"],
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|env| env.as_str() == wanted || env.aliases().contains(&wanted.as_str()))
            .ok_or_else(|| ConfigError::UnknownEnvironment(s.to_string()))
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
