//! Configuration management for agent-relay.
//!
//! Configuration can be set via environment variables:
//! - `AGENT_ENDPOINT` - Required. URL of the streaming agent invocation endpoint.
//! - `AGENT_AUTH_TOKEN` - Optional. Bearer token for the invocation endpoint.
//! - `MCP_SERVER_URL` - Required. URL of the MCP tool server (streamable HTTP).
//! - `MCP_AUTH_TOKEN` - Optional. Bearer token for the MCP server.
//! - `ATTEMPT_TIMEOUT_SECS` - Optional. Read deadline for one attempt. Defaults to `60`.
//! - `SESSION_DEADLINE_SECS` - Optional. Ceiling for a whole session. Defaults to `300`.
//! - `MAX_ATTEMPTS` - Optional. Total invocation attempts. Defaults to `3`.
//! - `BACKOFF_BASE_MS` - Optional. Delay before the second attempt. Defaults to `1000`.
//! - `BACKOFF_MAX_MS` - Optional. Cap on any single backoff delay. Defaults to `60000`.
//! - `MANIFEST_TTL_SECS` - Optional. How long a tool manifest is served from cache. Defaults to `300`.
//! - `DISCOVERY_TIMEOUT_SECS` - Optional. Bound on one tool discovery call. Defaults to `10`.
//! - `CONNECT_TIMEOUT_SECS` - Optional. Bound on opening the tool execution channel. Defaults to `60`.
//! - `FRAME_DATA_PREFIX` - Optional. Prefix marking data frames. Defaults to `data: `.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::agent::{BackoffConfig, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Agent-relay configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Streaming invocation endpoint
    pub agent_endpoint: Url,

    /// Bearer token for the invocation endpoint
    pub agent_auth_token: Option<String>,

    /// MCP tool server endpoint
    pub mcp_server_url: Url,

    /// Bearer token for the MCP server
    pub mcp_auth_token: Option<String>,

    /// Read deadline for a single attempt
    pub attempt_timeout: Duration,

    /// Ceiling for the whole session, across attempts
    pub session_deadline: Duration,

    /// Total invocation attempts, including the first
    pub max_attempts: u32,

    /// Backoff between attempts
    pub backoff: BackoffConfig,

    /// Tool manifest cache TTL
    pub manifest_ttl: Duration,

    /// Bound on one discovery lease (acquire + list)
    pub discovery_timeout: Duration,

    /// Bound on acquiring the execution lease
    pub connect_timeout: Duration,

    /// Prefix that marks a data frame
    pub frame_data_prefix: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `AGENT_ENDPOINT` or
    /// `MCP_SERVER_URL` is not set, and `ConfigError::InvalidValue` for
    /// anything that fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let agent_endpoint = required_url("AGENT_ENDPOINT")?;
        let mcp_server_url = required_url("MCP_SERVER_URL")?;

        let backoff = BackoffConfig {
            base_delay: Duration::from_millis(parse_var("BACKOFF_BASE_MS", 1000)?),
            max_delay: Duration::from_millis(parse_var("BACKOFF_MAX_MS", 60_000)?),
            multiplier: 2.0,
        };

        let max_attempts: u32 = parse_var("MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            agent_endpoint,
            agent_auth_token: optional_var("AGENT_AUTH_TOKEN"),
            mcp_server_url,
            mcp_auth_token: optional_var("MCP_AUTH_TOKEN"),
            attempt_timeout: Duration::from_secs(parse_var("ATTEMPT_TIMEOUT_SECS", 60)?),
            session_deadline: Duration::from_secs(parse_var("SESSION_DEADLINE_SECS", 300)?),
            max_attempts,
            backoff,
            manifest_ttl: Duration::from_secs(parse_var("MANIFEST_TTL_SECS", 300)?),
            discovery_timeout: Duration::from_secs(parse_var("DISCOVERY_TIMEOUT_SECS", 10)?),
            connect_timeout: Duration::from_secs(parse_var("CONNECT_TIMEOUT_SECS", 60)?),
            frame_data_prefix: std::env::var("FRAME_DATA_PREFIX")
                .unwrap_or_else(|_| "data: ".to_string()),
        })
    }

    /// Create a config with default tuning (useful for testing).
    pub fn new(agent_endpoint: Url, mcp_server_url: Url) -> Self {
        Self {
            agent_endpoint,
            agent_auth_token: None,
            mcp_server_url,
            mcp_auth_token: None,
            attempt_timeout: Duration::from_secs(60),
            session_deadline: Duration::from_secs(300),
            max_attempts: 3,
            backoff: BackoffConfig::default(),
            manifest_ttl: Duration::from_secs(300),
            discovery_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(60),
            frame_data_prefix: "data: ".to_string(),
        }
    }

    /// Retry policy derived from this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff.clone(),
            attempt_timeout: self.attempt_timeout,
            connect_timeout: self.connect_timeout,
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required_url(name: &str) -> Result<Url, ConfigError> {
    let raw = optional_var(name).ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))?;
    parse_url(name, &raw)
}

fn parse_url(name: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), format!("{}", e)))
}
