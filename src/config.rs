//! Service configuration from the environment

use crate::flow::{ConfigErrorMode, FlowSettings, DEFAULT_MAX_DEPTH, DEFAULT_STATE_TTL};
use crate::store::DEFAULT_MAX_RETRIES;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Invalid value for {var}: '{value}' ({reason})")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Which atomic store backs conversation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Sqlite,
    Redis,
    Memory,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(StoreKind::Sqlite),
            "redis" => Ok(StoreKind::Redis),
            "memory" => Ok(StoreKind::Memory),
            other => Err(format!("unknown store '{other}', expected sqlite, redis, or memory")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub api_base: String,
    pub access_token: Option<String>,
    pub phone_number_id: Option<String>,
    pub verify_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store: StoreKind,
    pub db_path: String,
    pub redis_url: String,
    pub state_ttl: Duration,
    pub store_max_retries: u32,
    pub max_flow_depth: usize,
    pub environment: Environment,
    pub api_base_url: Option<String>,
    pub api_timeout: Duration,
    pub whatsapp: WhatsAppConfig,
    /// Honour the `x-mock-testing` request header
    pub allow_mock_testing: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source; `from_env` passes the process env
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let db_path = lookup("CREDEX_DB_PATH").unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            format!("{home}/.credex-flow/state.db")
        });

        Ok(Self {
            port: parse_or(&lookup, "CREDEX_PORT", 8000)?,
            store: parse_or(&lookup, "CREDEX_STORE", StoreKind::Sqlite)?,
            db_path,
            redis_url: lookup("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            state_ttl: Duration::from_secs(parse_or(
                &lookup,
                "CREDEX_STATE_TTL_SECS",
                DEFAULT_STATE_TTL.as_secs(),
            )?),
            store_max_retries: parse_or(&lookup, "CREDEX_STORE_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            max_flow_depth: parse_or(&lookup, "CREDEX_MAX_FLOW_DEPTH", DEFAULT_MAX_DEPTH)?,
            environment: parse_or(&lookup, "CREDEX_ENV", Environment::Development)?,
            api_base_url: lookup("CREDEX_API_BASE_URL"),
            api_timeout: Duration::from_secs(parse_or(&lookup, "CREDEX_API_TIMEOUT_SECS", 30)?),
            whatsapp: WhatsAppConfig {
                api_base: lookup("WHATSAPP_API_BASE")
                    .unwrap_or_else(|| "https://graph.facebook.com/v18.0".to_string()),
                access_token: lookup("WHATSAPP_ACCESS_TOKEN"),
                phone_number_id: lookup("WHATSAPP_PHONE_NUMBER_ID"),
                verify_token: lookup("WHATSAPP_VERIFY_TOKEN"),
            },
            allow_mock_testing: lookup("CREDEX_ALLOW_MOCK_TESTING")
                .is_some_and(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes")),
        })
    }

    pub fn flow_settings(&self) -> FlowSettings {
        FlowSettings {
            state_ttl: self.state_ttl,
            max_depth: self.max_flow_depth,
            mode: match self.environment {
                Environment::Development => ConfigErrorMode::Strict,
                Environment::Production => ConfigErrorMode::Lenient,
            },
        }
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("HOME", "/home/credex")]).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.store, StoreKind::Sqlite);
        assert_eq!(config.db_path, "/home/credex/.credex-flow/state.db");
        assert_eq!(config.state_ttl, Duration::from_secs(900));
        assert_eq!(config.store_max_retries, 3);
        assert_eq!(config.max_flow_depth, 10);
        assert!(!config.allow_mock_testing);
        assert_eq!(config.flow_settings().mode, ConfigErrorMode::Strict);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("CREDEX_PORT", "9090"),
            ("CREDEX_STORE", "Redis"),
            ("CREDEX_STATE_TTL_SECS", "60"),
            ("CREDEX_ENV", "production"),
            ("CREDEX_ALLOW_MOCK_TESTING", "true"),
        ])
        .unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.store, StoreKind::Redis);

        let settings = config.flow_settings();
        assert_eq!(settings.state_ttl, Duration::from_secs(60));
        assert_eq!(settings.mode, ConfigErrorMode::Lenient);
        assert!(config.allow_mock_testing);
    }

    #[test]
    fn test_bad_value_names_the_variable() {
        let err = config(&[("CREDEX_STORE", "postgres")]).unwrap_err();
        assert_eq!(err.var, "CREDEX_STORE");
        assert!(err.to_string().contains("postgres"));

        let err = config(&[("CREDEX_PORT", "eighty")]).unwrap_err();
        assert_eq!(err.var, "CREDEX_PORT");
    }
}
