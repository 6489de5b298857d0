//! Service Configuration Settings
//!
//! Configuration types for the price stream, loaded from environment
//! variables. Numeric values that fail to parse fall back to defaults;
//! only the provider credentials are required.

use std::time::Duration;

use crate::infrastructure::alpaca::{Credentials, DEFAULT_DATA_URL};

/// Market data feed type for the Alpaca stock stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFeed {
    /// SIP (Securities Information Processor) - Full real-time market data.
    Sip,
    /// IEX (Investors Exchange) - Free tier with limited data.
    #[default]
    Iex,
}

impl DataFeed {
    /// Pick the feed from the `ALPACA_REALTIME` flag.
    #[must_use]
    pub fn from_realtime_flag(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Self::Sip,
            _ => Self::Iex,
        }
    }

    /// Get the feed name for stream URLs and REST queries.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sip => "sip",
            Self::Iex => "iex",
        }
    }

    /// Production stream URL for this feed.
    #[must_use]
    pub fn stream_url(&self) -> String {
        format!("wss://stream.data.alpaca.markets/v2/{}", self.as_str())
    }
}

/// Stream connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// WebSocket URL.
    pub url: String,
    /// Market data feed.
    pub feed: DataFeed,
    /// Delay before the first reconnect attempt.
    pub reconnect_base_delay: Duration,
    /// Optional ceiling on a single reconnect delay.
    pub reconnect_max_delay: Option<Duration>,
    /// Jitter applied to reconnect delays (0.0 - 1.0).
    pub reconnect_jitter: f64,
    /// Reconnect attempts before the stream gives up.
    pub max_reconnect_attempts: u32,
    /// WebSocket ping interval.
    pub ping_interval: Duration,
    /// Time allowed for any traffic after a ping.
    pub pong_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: DataFeed::default().stream_url(),
            feed: DataFeed::default(),
            reconnect_base_delay: Duration::from_millis(1_000),
            reconnect_max_delay: None,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 5,
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(20),
        }
    }
}

/// Price cache settings.
#[derive(Clone)]
pub struct CacheSettings {
    /// Upstash REST URL.
    pub upstash_url: Option<String>,
    /// Upstash REST token.
    pub upstash_token: Option<String>,
    /// Entry lifetime.
    pub ttl: Duration,
}

impl CacheSettings {
    /// Upstash URL and token, when both are configured.
    #[must_use]
    pub fn upstash(&self) -> Option<(&str, &str)> {
        match (&self.upstash_url, &self.upstash_token) {
            (Some(url), Some(token)) => Some((url, token)),
            _ => None,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            upstash_url: None,
            upstash_token: None,
            ttl: Duration::from_secs(5),
        }
    }
}

impl std::fmt::Debug for CacheSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSettings")
            .field("upstash_url", &self.upstash_url)
            .field("upstash_token", &self.upstash_token.as_ref().map(|_| "[REDACTED]"))
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Backfill settings.
#[derive(Debug, Clone)]
pub struct BackfillSettings {
    /// Generic backfill endpoint. Absent means Alpaca latest trades.
    pub url: Option<String>,
    /// Alpaca REST data API base.
    pub data_url: String,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self {
            url: None,
            data_url: DEFAULT_DATA_URL.to_string(),
        }
    }
}

/// Alert-matching endpoint settings.
#[derive(Clone, Default)]
pub struct AlertSettings {
    /// Endpoint URL. Absent disables alert checks.
    pub url: Option<String>,
    /// Bearer token.
    pub token: Option<String>,
}

impl std::fmt::Debug for AlertSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertSettings")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastSettings {
    /// Capacity of the price channel.
    pub prices_capacity: usize,
    /// Capacity of the alert channel.
    pub alerts_capacity: usize,
    /// Capacity of the feed status channel.
    pub feed_status_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            prices_capacity: 10_000,
            alerts_capacity: 1_000,
            feed_status_capacity: 64,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check and metrics HTTP port.
    pub health_port: u16,
    /// Timeout for outbound HTTP calls (cache, backfill, alerts).
    pub http_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            health_port: 8083,
            http_timeout: Duration::from_millis(5_000),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Provider credentials.
    pub credentials: Credentials,
    /// Stream connection settings.
    pub stream: StreamSettings,
    /// Price cache settings.
    pub cache: CacheSettings,
    /// Backfill settings.
    pub backfill: BackfillSettings,
    /// Alert endpoint settings.
    pub alerts: AlertSettings,
    /// Broadcast channel settings.
    pub broadcast: BroadcastSettings,
    /// Server settings.
    pub server: ServerSettings,
    /// Symbols to subscribe at startup.
    pub startup_symbols: Vec<String>,
}

impl ServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider credentials are missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider credentials are missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = required(&lookup, "ALPACA_KEY")?;
        let api_secret = required(&lookup, "ALPACA_SECRET")?;
        let credentials = Credentials::new(api_key, api_secret)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let feed = lookup("ALPACA_REALTIME")
            .map(|s| DataFeed::from_realtime_flag(&s))
            .unwrap_or_default();

        let stream_defaults = StreamSettings::default();
        let stream = StreamSettings {
            url: optional(&lookup, "ALPACA_STREAM_URL").unwrap_or_else(|| feed.stream_url()),
            feed,
            reconnect_base_delay: parse_env_duration_millis(
                &lookup,
                "PRICE_STREAM_RECONNECT_BASE_MS",
                stream_defaults.reconnect_base_delay,
            ),
            reconnect_max_delay: optional(&lookup, "PRICE_STREAM_RECONNECT_MAX_MS")
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis),
            reconnect_jitter: parse_env_f64(
                &lookup,
                "PRICE_STREAM_RECONNECT_JITTER",
                stream_defaults.reconnect_jitter,
            )
            .clamp(0.0, 1.0),
            max_reconnect_attempts: parse_env_u32(
                &lookup,
                "PRICE_STREAM_MAX_RECONNECT_ATTEMPTS",
                stream_defaults.max_reconnect_attempts,
            ),
            ping_interval: parse_env_duration_secs(
                &lookup,
                "PRICE_STREAM_PING_INTERVAL_SECS",
                stream_defaults.ping_interval,
            ),
            pong_timeout: parse_env_duration_secs(
                &lookup,
                "PRICE_STREAM_PONG_TIMEOUT_SECS",
                stream_defaults.pong_timeout,
            ),
        };

        let cache = CacheSettings {
            upstash_url: optional(&lookup, "UPSTASH_REDIS_REST_URL"),
            upstash_token: optional(&lookup, "UPSTASH_REDIS_REST_TOKEN"),
            ttl: parse_env_duration_secs(
                &lookup,
                "PRICE_CACHE_TTL_SECS",
                CacheSettings::default().ttl,
            ),
        };

        let backfill = BackfillSettings {
            url: optional(&lookup, "PRICE_BACKFILL_URL"),
            data_url: optional(&lookup, "ALPACA_DATA_URL")
                .unwrap_or_else(|| DEFAULT_DATA_URL.to_string()),
        };

        let alerts = AlertSettings {
            url: optional(&lookup, "ALERT_CHECK_URL"),
            token: optional(&lookup, "ALERT_CHECK_TOKEN"),
        };

        let broadcast_defaults = BroadcastSettings::default();
        let broadcast = BroadcastSettings {
            prices_capacity: parse_env_usize(
                &lookup,
                "PRICE_STREAM_PRICES_CAPACITY",
                broadcast_defaults.prices_capacity,
            ),
            alerts_capacity: parse_env_usize(
                &lookup,
                "PRICE_STREAM_ALERTS_CAPACITY",
                broadcast_defaults.alerts_capacity,
            ),
            feed_status_capacity: parse_env_usize(
                &lookup,
                "PRICE_STREAM_FEED_STATUS_CAPACITY",
                broadcast_defaults.feed_status_capacity,
            ),
        };

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            health_port: parse_env_u16(
                &lookup,
                "PRICE_STREAM_HEALTH_PORT",
                server_defaults.health_port,
            ),
            http_timeout: parse_env_duration_millis(
                &lookup,
                "PRICE_STREAM_HTTP_TIMEOUT_MS",
                server_defaults.http_timeout,
            ),
        };

        let startup_symbols = optional(&lookup, "PRICE_STREAM_SYMBOLS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            credentials,
            stream,
            cache,
            backfill,
            alerts,
            broadcast,
            server,
            startup_symbols,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Value present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

/// Non-blank value for `key`.
fn optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|v| !v.trim().is_empty())
}

fn parse_env_u16<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u16) -> u16 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u32) -> u32 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: f64) -> f64 {
    lookup(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn parse_env_duration_secs<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
