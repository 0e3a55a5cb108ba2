//! Environment-backed configuration for `laddrs-chat`.

use std::{env, error::Error, fmt, time::Duration};

use chat_core::{BackoffPolicy, HeartbeatPolicy, SessionTuning, backoff::DEFAULT_FLOOR_MS};
use chat_laddrs::LaddrsConfig;
use url::Url;

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const SOCKET_PATH: &str = "/channel/socket";
const DEFAULT_HEARTBEAT_BASE_MS: u64 = 30_000;
const DEFAULT_HEARTBEAT_MAX_MS: u64 = 120_000;
const DEFAULT_TRANSCRIPT_MAX_ITEMS: usize = 1_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// Root of the laddrs site; actions live under `/channel/{ladder}/`.
    pub base_url: Url,
    /// Push transport endpoint.
    pub socket_url: Url,
    pub ladder_name: String,
    pub user_id: String,
    pub tuning: SessionTuning,
    pub request_timeout_ms: u64,
}

impl ChatConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let base_url = parse_url(
            "LADDRS_BASE_URL",
            optional_trimmed_env("LADDRS_BASE_URL", &mut lookup)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
            &["http", "https"],
        )?;
        let socket_url = match optional_trimmed_env("LADDRS_SOCKET_URL", &mut lookup) {
            Some(value) => parse_url("LADDRS_SOCKET_URL", value, &["ws", "wss"])?,
            None => derive_socket_url(&base_url)?,
        };

        let ladder_name = required_env("LADDRS_LADDER", &mut lookup)?;
        let user_id = required_env("LADDRS_USER_ID", &mut lookup)?;

        let client_version =
            parse_optional_u32_with_default("LADDRS_CLIENT_VERSION", 0, &mut lookup)?;
        let floor_ms = parse_optional_u64_with_default(
            "LADDRS_RECONNECT_FLOOR_MS",
            DEFAULT_FLOOR_MS,
            &mut lookup,
        )?;
        let backoff = match optional_trimmed_env("LADDRS_BACKOFF", &mut lookup).as_deref() {
            None | Some("stepped") => BackoffPolicy::stepped(floor_ms),
            Some("doubling") => BackoffPolicy::doubling(floor_ms),
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "LADDRS_BACKOFF",
                    value: other.to_owned(),
                    reason: "expected `stepped` or `doubling`".to_owned(),
                });
            }
        };

        let heartbeat_base_ms = parse_optional_u64_with_default(
            "LADDRS_HEARTBEAT_BASE_MS",
            DEFAULT_HEARTBEAT_BASE_MS,
            &mut lookup,
        )?;
        let heartbeat_max_ms = parse_optional_u64_with_default(
            "LADDRS_HEARTBEAT_MAX_MS",
            DEFAULT_HEARTBEAT_MAX_MS,
            &mut lookup,
        )?;
        let transcript_max_items = parse_optional_usize(
            "LADDRS_TRANSCRIPT_MAX_ITEMS",
            DEFAULT_TRANSCRIPT_MAX_ITEMS,
            &mut lookup,
        )?;
        let request_timeout_ms = parse_optional_u64_with_default(
            "LADDRS_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
            &mut lookup,
        )?;

        if floor_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LADDRS_RECONNECT_FLOOR_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if heartbeat_base_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LADDRS_HEARTBEAT_BASE_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if heartbeat_max_ms < heartbeat_base_ms {
            return Err(ConfigError::InvalidValue {
                key: "LADDRS_HEARTBEAT_MAX_MS",
                value: heartbeat_max_ms.to_string(),
                reason: format!("must be at least LADDRS_HEARTBEAT_BASE_MS ({heartbeat_base_ms})"),
            });
        }
        if transcript_max_items == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LADDRS_TRANSCRIPT_MAX_ITEMS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            base_url,
            socket_url,
            ladder_name,
            user_id,
            tuning: SessionTuning {
                client_version,
                backoff,
                heartbeat: HeartbeatPolicy::growing(heartbeat_base_ms, heartbeat_max_ms),
                transcript_max_items,
            },
            request_timeout_ms,
        })
    }

    pub fn runtime_config(&self) -> LaddrsConfig {
        LaddrsConfig {
            base_url: self.base_url.clone(),
            tuning: self.tuning.clone(),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

/// Errors produced while parsing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is unset or blank.
    Missing { key: &'static str },
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { key } => write!(f, "{key} must be set"),
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn required_env<F>(key: &'static str, lookup: &mut F) -> Result<String, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    optional_trimmed_env(key, lookup).ok_or(ConfigError::Missing { key })
}

fn parse_url(key: &'static str, value: String, schemes: &[&str]) -> Result<Url, ConfigError> {
    let url = Url::parse(&value).map_err(|err| ConfigError::InvalidValue {
        key,
        value: value.clone(),
        reason: err.to_string(),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidValue {
            key,
            value,
            reason: format!("scheme must be one of {}", schemes.join(", ")),
        });
    }
    Ok(url)
}

fn derive_socket_url(base_url: &Url) -> Result<Url, ConfigError> {
    let scheme = if base_url.scheme() == "https" { "wss" } else { "ws" };
    let mut socket_url = base_url.clone();
    socket_url
        .set_scheme(scheme)
        .map_err(|()| ConfigError::InvalidValue {
            key: "LADDRS_BASE_URL",
            value: base_url.to_string(),
            reason: "cannot derive a websocket endpoint".to_owned(),
        })?;
    socket_url.set_path(SOCKET_PATH);
    socket_url.set_query(None);
    socket_url.set_fragment(None);
    Ok(socket_url)
}

fn parse_optional_u32_with_default<F>(
    key: &'static str,
    default: u32,
    lookup: &mut F,
) -> Result<u32, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<u32>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u64_with_default<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_usize<F>(
    key: &'static str,
    default: usize,
    lookup: &mut F,
) -> Result<usize, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<usize>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}
