use std::env;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_HOST: &str = "anonafrica.fly.dev";
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Client configuration shared by the text and video sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Host of the matching service (no scheme).
    pub host: String,
    /// Use `wss` instead of `ws`, mirroring the page's own transport security.
    pub secure: bool,
    /// The single public STUN resolver handed to the peer transport.
    pub stun_url: String,
    /// Delay before the designated initiator sends its offer.
    pub initiator_delay: Duration,
    /// Delay between failed media acquisition attempts.
    pub retry_delay: Duration,
    /// Delay before a fresh cycle is opened after skip or partner loss.
    pub reopen_delay: Duration,
    /// Automatic media retries before the failure becomes terminal.
    pub max_media_retries: u32,
    /// Remote candidates held while no remote description exists.
    pub pending_candidate_cap: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            secure: true,
            stun_url: DEFAULT_STUN_URL.to_string(),
            initiator_delay: Duration::from_secs(2),
            retry_delay: Duration::from_secs(1),
            reopen_delay: Duration::from_secs(1),
            max_media_retries: 3,
            pending_candidate_cap: 64,
        }
    }
}

impl ClientConfig {
    /// Load configuration from `ANONAFRICA_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(host) = non_empty_var("ANONAFRICA_HOST") {
            config.host = host;
        }
        if let Some(value) = non_empty_var("ANONAFRICA_INSECURE") {
            config.secure = !truthy("ANONAFRICA_INSECURE", &value)?;
        }
        if let Some(url) = non_empty_var("ANONAFRICA_STUN_URL") {
            config.stun_url = url;
        }
        if let Some(ms) = millis_var("ANONAFRICA_INITIATOR_DELAY_MS")? {
            config.initiator_delay = ms;
        }
        if let Some(ms) = millis_var("ANONAFRICA_RETRY_DELAY_MS")? {
            config.retry_delay = ms;
        }
        if let Some(ms) = millis_var("ANONAFRICA_REOPEN_DELAY_MS")? {
            config.reopen_delay = ms;
        }
        if let Some(value) = non_empty_var("ANONAFRICA_MAX_MEDIA_RETRIES") {
            config.max_media_retries =
                value
                    .parse()
                    .map_err(|err: std::num::ParseIntError| ConfigError::InvalidValue {
                        key: "ANONAFRICA_MAX_MEDIA_RETRIES",
                        value: value.clone(),
                        reason: err.to_string(),
                    })?;
        }
        Ok(config)
    }

    pub fn websocket_scheme(&self) -> &'static str {
        if self.secure { "wss" } else { "ws" }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn millis_var(key: &'static str) -> Result<Option<Duration>, ConfigError> {
    let Some(value) = non_empty_var(key) else {
        return Ok(None);
    };
    value
        .parse::<u64>()
        .map(|ms| Some(Duration::from_millis(ms)))
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn truthy(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "expected a boolean".into(),
        }),
    }
}
