use std::{path::PathBuf, time::Duration};

use serde::Deserialize;
use thiserror::Error;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable not set: {0}")]
    Missing(&'static str),

    #[error("environment variable {name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Provider login settings. Built once at startup and never mutated.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub oauth: OAuthConfig,
    pub root_dir: PathBuf,
    pub api_auto_provision: bool,
    pub fetch_timeout: Duration,
    pub store_timeout: Duration,
    pub session_ttl_minutes: i64,
    pub production: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let oauth = OAuthConfig {
            client_id: required("OAUTH2_CLIENT_ID")?,
            client_secret: required("OAUTH2_CLIENT_SECRET")?,
            redirect_url: required("OAUTH2_REDIRECT_URL")?,
            auth_url: get("OAUTH2_AUTH_URL").unwrap_or_else(|| GOOGLE_AUTH_URL.into()),
            token_url: get("OAUTH2_TOKEN_URL").unwrap_or_else(|| GOOGLE_TOKEN_URL.into()),
            userinfo_url: get("OAUTH2_USERINFO_URL")
                .unwrap_or_else(|| GOOGLE_USERINFO_URL.into()),
            scopes: vec!["openid".into(), "email".into(), "profile".into()],
        };

        Ok(Self {
            host: get("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or("APP_PORT", get("APP_PORT"), 8080)?,
            database_url: required("DATABASE_URL")?,
            oauth,
            root_dir: PathBuf::from(required("ROOT_DIR")?),
            api_auto_provision: parse_bool("API_AUTO_PROVISION", get("API_AUTO_PROVISION"))?,
            fetch_timeout: Duration::from_millis(parse_or(
                "FETCH_TIMEOUT_MS",
                get("FETCH_TIMEOUT_MS"),
                10_000,
            )?),
            store_timeout: Duration::from_millis(parse_or(
                "STORE_TIMEOUT_MS",
                get("STORE_TIMEOUT_MS"),
                5_000,
            )?),
            session_ttl_minutes: parse_or(
                "SESSION_TTL_MINUTES",
                get("SESSION_TTL_MINUTES"),
                60 * 24 * 14,
            )?,
            production: parse_bool("PRODUCTION", get("PRODUCTION"))?,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(v) => v.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

fn parse_bool(name: &'static str, raw: Option<String>) -> Result<bool, ConfigError> {
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                name,
                reason: format!("expected a boolean, got {v:?}"),
            }),
        },
    }
}
