//! Relay configuration parsed from environment variables.

use std::time::Duration;

use rand::Rng;

use crate::error::RelayError;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000";
pub const DEFAULT_SOCKETIO_PATH: &str = "/socket.io/";
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 100;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_RECONNECT_MIN_MS: u64 = 1_000;
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 10_000;
pub const DEFAULT_RECONNECT_JITTER: f64 = 0.5;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 2;
pub const DEFAULT_INBOUND_CAPACITY: usize = 16;

/// Backoff applied between connection attempts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// When false, a lost session is not retried.
    pub enabled: bool,
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Upper bound on any retry delay.
    pub max_delay: Duration,
    /// Randomization factor in `0.0..=1.0` applied around the base delay.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            min_delay: Duration::from_millis(DEFAULT_RECONNECT_MIN_MS),
            max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            jitter: DEFAULT_RECONNECT_JITTER,
        }
    }
}

impl ReconnectPolicy {
    /// Base delay for the given zero-based retry attempt: doubles from
    /// `min_delay`, capped at `max_delay`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.min_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// [`ReconnectPolicy::delay`] spread by up to `jitter` in either direction.
    #[must_use]
    pub fn jittered<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.delay(attempt).as_secs_f64();
        let spread = base * self.jitter.clamp(0.0, 1.0);
        if !spread.is_finite() || spread <= 0.0 {
            return self.delay(attempt);
        }
        let offset = rng.random_range(-spread..=spread);
        Duration::from_secs_f64((base + offset).max(0.0)).min(self.max_delay)
    }
}

/// Settings for one relay client and its connection.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayConfig {
    /// Base address of the processing service, e.g. `http://localhost:8000`.
    pub endpoint: String,
    /// Socket.IO namespace to join.
    pub namespace: String,
    /// Socket.IO endpoint path on the server.
    pub path: String,
    /// Period of the sampling timer.
    pub sample_interval: Duration,
    /// Bound on websocket connect plus the Socket.IO open sequence.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Frames allowed to wait for the socket writer before new ones drop.
    pub outbound_capacity: usize,
    /// Inbound events buffered for the client to drain.
    pub inbound_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            namespace: packets::DEFAULT_NAMESPACE.to_owned(),
            path: DEFAULT_SOCKETIO_PATH.to_owned(),
            sample_interval: Duration::from_millis(DEFAULT_SAMPLE_INTERVAL_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            reconnect: ReconnectPolicy::default(),
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            inbound_capacity: DEFAULT_INBOUND_CAPACITY,
        }
    }
}

impl RelayConfig {
    /// Build relay config from environment variables.
    ///
    /// Optional (defaults in parentheses):
    /// - `FRAMERELAY_ENDPOINT` (`http://localhost:8000`)
    /// - `FRAMERELAY_NAMESPACE` (`/`)
    /// - `FRAMERELAY_SOCKETIO_PATH` (`/socket.io/`)
    /// - `FRAMERELAY_SAMPLE_INTERVAL_MS` (100)
    /// - `FRAMERELAY_CONNECT_TIMEOUT_MS` (20000)
    /// - `FRAMERELAY_RECONNECT` (`true`)
    /// - `FRAMERELAY_RECONNECT_MIN_MS` (1000)
    /// - `FRAMERELAY_RECONNECT_MAX_MS` (10000)
    /// - `FRAMERELAY_RECONNECT_JITTER` (0.5)
    /// - `FRAMERELAY_OUTBOUND_CAPACITY` (2)
    /// - `FRAMERELAY_INBOUND_CAPACITY` (16)
    ///
    /// Unparseable or zero values fall back to the default.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RelayConfig::from_env`] with an explicit variable source.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_owned())
        };
        let millis = |key: &str, default: u64| {
            Duration::from_millis(parse_nonzero(lookup(key).as_deref(), default))
        };

        let reconnect = ReconnectPolicy {
            enabled: lookup("FRAMERELAY_RECONNECT")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(true),
            min_delay: millis("FRAMERELAY_RECONNECT_MIN_MS", DEFAULT_RECONNECT_MIN_MS),
            max_delay: millis("FRAMERELAY_RECONNECT_MAX_MS", DEFAULT_RECONNECT_MAX_MS),
            jitter: lookup("FRAMERELAY_RECONNECT_JITTER")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|j| (0.0..=1.0).contains(j))
                .unwrap_or(DEFAULT_RECONNECT_JITTER),
        };

        Self {
            endpoint: text("FRAMERELAY_ENDPOINT", DEFAULT_ENDPOINT),
            namespace: text("FRAMERELAY_NAMESPACE", packets::DEFAULT_NAMESPACE),
            path: text("FRAMERELAY_SOCKETIO_PATH", DEFAULT_SOCKETIO_PATH),
            sample_interval: millis("FRAMERELAY_SAMPLE_INTERVAL_MS", DEFAULT_SAMPLE_INTERVAL_MS),
            connect_timeout: millis("FRAMERELAY_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS),
            reconnect,
            outbound_capacity: usize_nonzero(
                lookup("FRAMERELAY_OUTBOUND_CAPACITY").as_deref(),
                DEFAULT_OUTBOUND_CAPACITY,
            ),
            inbound_capacity: usize_nonzero(
                lookup("FRAMERELAY_INBOUND_CAPACITY").as_deref(),
                DEFAULT_INBOUND_CAPACITY,
            ),
        }
    }

    /// Websocket URL for the Engine.IO transport.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidEndpoint`] unless the endpoint uses one
    /// of `http`, `https`, `ws`, or `wss`.
    pub fn socket_url(&self) -> Result<String, RelayError> {
        let trimmed = self.endpoint.trim().trim_end_matches('/');

        let base = if let Some(rest) = trimmed.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if let Some(rest) = trimmed.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
            trimmed.to_owned()
        } else {
            return Err(RelayError::InvalidEndpoint(self.endpoint.clone()));
        };

        let query = format!("?EIO={}&transport=websocket", packets::ENGINE_IO_VERSION);
        let path = self.path.trim_matches('/');
        if path.is_empty() {
            return Ok(format!("{base}/{query}"));
        }
        Ok(format!("{base}/{path}/{query}"))
    }
}

fn parse_nonzero(raw: Option<&str>, default: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn usize_nonzero(raw: Option<&str>, default: usize) -> usize {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
