use std::env;
use thiserror::Error;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com/graphql";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required (env var or --{1})")]
    Missing(&'static str, &'static str),
}

/// Connection settings explicitly passed on the command line. `None` falls back to the env.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub amqp_url: Option<String>,
    pub github_api_url: Option<String>,
}

pub struct Config {
    pub db_url: String,
    pub amqp_url: String,
    /// GraphQL endpoint. Defaults to the public GitHub API.
    pub github_api_url: String,
    /// Empty when unset; requests then fail upstream with 401.
    pub github_token: String,
}

impl Config {
    pub fn from_env_with_overrides(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        Self::resolve(overrides, |key| env::var(key).ok())
    }

    /// Resolves configuration against an arbitrary variable lookup.
    ///
    /// `RABBIT_URI` is accepted as an alias of `AMQP_URL` for older deployments.
    pub fn resolve<L>(overrides: ConfigOverrides, lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let db_url = overrides
            .database_url
            .or_else(|| lookup("DATABASE_URL"))
            .ok_or(ConfigError::Missing("DATABASE_URL", "database-url"))?;
        let amqp_url = overrides
            .amqp_url
            .or_else(|| lookup("AMQP_URL"))
            .or_else(|| lookup("RABBIT_URI"))
            .ok_or(ConfigError::Missing("AMQP_URL", "amqp-url"))?;
        let github_api_url = overrides
            .github_api_url
            .or_else(|| lookup("GITHUB_API_URL"))
            .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string());
        let github_token = lookup("GITHUB_GQL_OAUTH_TOKEN").unwrap_or_default();

        Ok(Self {
            db_url,
            amqp_url,
            github_api_url,
            github_token,
        })
    }
}
