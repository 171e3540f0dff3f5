//! Queue service configuration.

use std::time::Duration;

/// Cadence at which the server advances admission; polling faster reveals nothing.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_TOKEN_HEADER: &str = "X-Queue-Token";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Paths of the queue service operations, relative to the base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub register_entry: String,
    pub entry_status: String,
    pub enter_capacity: String,
    pub capacity_status: String,
    pub exit_capacity: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            register_entry: "/queue/entry/register".to_string(),
            entry_status: "/queue/entry/status".to_string(),
            enter_capacity: "/queue/capacity/enter".to_string(),
            capacity_status: "/queue/capacity/status".to_string(),
            exit_capacity: "/queue/capacity/exit".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub base_url: String,
    pub endpoints: Endpoints,
    /// Header carrying the entry token on status queries.
    pub token_header: String,
    /// Bearer credential identifying the shopper's session to the Capacity Gate.
    pub session_token: Option<String>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl GateConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            endpoints: Endpoints::default(),
            token_header: DEFAULT_TOKEN_HEADER.to_string(),
            session_token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Read `WAITROOM_BASE_URL` (required), `WAITROOM_SESSION_TOKEN` and
    /// `WAITROOM_REQUEST_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let base_url = lookup("WAITROOM_BASE_URL")
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("WAITROOM_BASE_URL"))?;

        let mut config = Self::new(base_url);

        if let Some(token) = lookup("WAITROOM_SESSION_TOKEN").filter(|s| !s.is_empty()) {
            config.session_token = Some(token);
        }

        if let Some(raw) = lookup("WAITROOM_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = raw
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|s| *s > 0.0)
                .and_then(|s| Duration::try_from_secs_f64(s).ok())
                .ok_or(ConfigError::Invalid {
                    name: "WAITROOM_REQUEST_TIMEOUT_SECS",
                    value: raw.clone(),
                })?;
        }

        Ok(config)
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}
