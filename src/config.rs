use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::level_filters::LevelFilter;

pub const DEFAULT_VAPI_BASE_URL: &str = "https://api.vapi.ai";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} not set!")]
    Missing(&'static str),
    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
    #[error("unsupported voice provider '{0}'")]
    UnsupportedProvider(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Vapi,
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vapi" => Ok(ProviderKind::Vapi),
            other => Err(ConfigError::UnsupportedProvider(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VapiConfig {
    pub api_key: String,
    pub api_base_url: String,
    /// `None` runs webhooks unsecured
    pub webhook_secret: Option<String>,
    pub request_timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub workers: usize,
    pub queue_depth: usize,
    pub fetch_timeout: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub provider: ProviderKind,
    pub vapi: VapiConfig,
    pub reconciler: ReconcilerConfig,
    pub log_level: LevelFilter,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_addr = parse_or(&get, "BIND_ADDR", "0.0.0.0:3000".parse().ok())?;
        let provider = match get("VOICE_PROVIDER") {
            Some(raw) => raw.parse()?,
            None => ProviderKind::Vapi,
        };
        let api_key = get("VAPI_API_KEY").ok_or(ConfigError::Missing("VAPI_API_KEY"))?;
        let provider_timeout: u64 = parse_or(&get, "PROVIDER_TIMEOUT_SECS", Some(30))?;
        let transcript_timeout: u64 = parse_or(&get, "TRANSCRIPT_TIMEOUT_SECS", Some(120))?;
        let workers: usize = parse_or(&get, "TRANSCRIPT_WORKERS", Some(4))?;
        let queue_depth: usize = parse_or(&get, "TRANSCRIPT_QUEUE_DEPTH", Some(64))?;

        Ok(Self {
            bind_addr,
            database_url: get("DATABASE_URL"),
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", Some(25))?,
            provider,
            vapi: VapiConfig {
                api_key,
                api_base_url: get("VAPI_API_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_VAPI_BASE_URL.to_string()),
                webhook_secret: get("VAPI_WEBHOOK_SECRET"),
                request_timeout: Duration::from_secs(provider_timeout.max(1)),
            },
            reconciler: ReconcilerConfig {
                workers: workers.max(1),
                queue_depth: queue_depth.max(1),
                fetch_timeout: Duration::from_secs(transcript_timeout.max(1)),
            },
            log_level: parse_or(&get, "LOG_LEVEL", Some(LevelFilter::DEBUG))?,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: Option<T>) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            value: raw,
        }),
        None => default.ok_or(ConfigError::Missing(key)),
    }
}
