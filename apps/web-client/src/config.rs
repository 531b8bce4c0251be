use std::path::PathBuf;
use std::time::Duration;

use crate::error::ClientError;

/// Lifetime the gateway assigns to every access token.
pub const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// How long before expiry the scheduled renewal fires.
pub const RENEWAL_MARGIN: Duration = Duration::from_secs(30);

/// Upper bound for any single refresh, gateway or presence call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Web client configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// The web gateway origin (e.g. `http://localhost:8080`).
    pub base_url: String,
    /// Timeout applied to every network call the client makes.
    pub request_timeout: Duration,
    /// Access token lifetime, counted from the moment the token is stored.
    pub access_token_ttl: Duration,
    /// Safety margin before expiry at which the renewal timer fires.
    pub renewal_margin: Duration,
    /// Optional file used to persist the session between runs.
    pub store_path: Option<PathBuf>,
}

impl Config {
    /// Defaults for everything except the gateway origin.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            access_token_ttl: ACCESS_TOKEN_TTL,
            renewal_margin: RENEWAL_MARGIN,
            store_path: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// `GATEWAY_URL` is required; the rest fall back to the defaults above.
    pub fn from_env() -> Result<Self, ClientError> {
        let mut config = Self::new(required_var("GATEWAY_URL")?);
        if let Some(secs) = secs_var("REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = secs;
        }
        if let Some(secs) = secs_var("ACCESS_TOKEN_TTL_SECS")? {
            config.access_token_ttl = secs;
        }
        if let Some(secs) = secs_var("RENEWAL_MARGIN_SECS")? {
            config.renewal_margin = secs;
        }
        config.store_path = std::env::var("SESSION_STORE_PATH")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        Ok(config)
    }

    /// Delay between storing a token and its scheduled renewal.
    pub fn renewal_delay(&self) -> Duration {
        self.access_token_ttl.saturating_sub(self.renewal_margin)
    }
}

fn required_var(name: &str) -> Result<String, ClientError> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ClientError::Config(format!("{name} env var is required")))
}

fn secs_var(name: &str) -> Result<Option<Duration>, ClientError> {
    match std::env::var(name) {
        Ok(v) if !v.is_empty() => v
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| ClientError::Config(format!("{name} must be a whole number of seconds"))),
        _ => Ok(None),
    }
}
