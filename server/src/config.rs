//! Server configuration from environment variables.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    str::FromStr,
    time::Duration,
};

use rentdesk_agents::{DEFAULT_MODEL, GeminiConfig};
use rentdesk_session::SelectionPolicy;
use rentdesk_transport::http::DEFAULT_MAX_UPLOAD_BYTES;

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("GEMINI_API_KEY not set in environment variables.")]
    MissingApiKey,
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind. `RENTDESK_HOST` is an IP literal or `localhost`.
    pub addr: SocketAddr,
    /// Gemini connection settings.
    pub gemini: GeminiConfig,
    /// Generation model.
    pub model: String,
    /// Request body limit.
    pub max_upload_bytes: usize,
    /// Maximum exchanges kept per session.
    pub history_limit: Option<usize>,
    /// Evict sessions idle this long.
    pub session_ttl: Option<Duration>,
    /// Agent selection policy.
    pub selection: SelectionPolicy,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    /// Returns error if `GEMINI_API_KEY` is missing or any value fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`.
    ///
    /// # Errors
    /// Returns error if `GEMINI_API_KEY` is missing or any value fails to parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("GEMINI_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let ip = match lookup("RENTDESK_HOST") {
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Some(host) if host.trim() == "localhost" => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Some(host) => parse_value("RENTDESK_HOST", &host)?,
        };
        let port: u16 = parse(&lookup, "RENTDESK_PORT")?.unwrap_or(8000);
        let addr = SocketAddr::new(ip, port);

        let mut gemini = GeminiConfig::new(api_key);
        if let Some(base_url) = lookup("GEMINI_BASE_URL") {
            gemini.base_url = base_url;
        }
        if let Some(upload_base_url) = lookup("GEMINI_UPLOAD_URL") {
            gemini.upload_base_url = upload_base_url;
        }
        gemini.timeout = parse::<u64>(&lookup, "GEMINI_TIMEOUT_SECS")?.map(Duration::from_secs);

        Ok(Self {
            addr,
            gemini,
            model: lookup("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_upload_bytes: parse(&lookup, "RENTDESK_MAX_UPLOAD_BYTES")?
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            history_limit: parse(&lookup, "RENTDESK_HISTORY_LIMIT")?,
            session_ttl: parse::<u64>(&lookup, "RENTDESK_SESSION_TTL_SECS")?
                .map(Duration::from_secs),
            selection: parse(&lookup, "RENTDESK_AGENT_SELECTION")?.unwrap_or_default(),
        })
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name).map(|value| parse_value(name, &value)).transpose()
}

fn parse_value<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
