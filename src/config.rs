//! Mutual authentication configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::num::{NonZeroU64, NonZeroUsize};
use std::time::Duration;

/// Environment variable holding the listener port.
pub const LISTENER_PORT_ENV: &str = "MESH_AUTH_MUTUAL_LISTENER_PORT";

/// Environment variable holding the inbound handshake admission limit.
pub const MAX_CONCURRENT_HANDSHAKES_ENV: &str = "MESH_AUTH_MUTUAL_MAX_CONCURRENT_HANDSHAKES";

/// Environment variable holding the inbound handshake deadline, in seconds.
pub const HANDSHAKE_TIMEOUT_ENV: &str = "MESH_AUTH_MUTUAL_HANDSHAKE_TIMEOUT_SECONDS";

const DEFAULT_HANDSHAKE_TIMEOUT_SECS: NonZeroU64 = match NonZeroU64::new(10) {
    Some(secs) => secs,
    None => unreachable!(),
};

/// Configuration of the mutual authentication handler.
///
/// A `listener_port` of `0` disables mutual authentication entirely.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutualAuthConfig {
    /// Port on which the agent performs mutual authentication handshakes with
    /// other agents.
    #[serde(rename = "mesh-auth-mutual-listener-port")]
    pub listener_port: u16,

    /// Upper bound on inbound handshakes in flight. `None` admits every connection.
    #[serde(rename = "mesh-auth-mutual-max-concurrent-handshakes")]
    pub max_concurrent_handshakes: Option<NonZeroUsize>,

    /// Seconds an admitted inbound connection may take to complete its handshake
    /// before its admission slot is reclaimed. Only applies when
    /// `max_concurrent_handshakes` is set.
    #[serde(rename = "mesh-auth-mutual-handshake-timeout-seconds")]
    pub handshake_timeout_secs: NonZeroU64,
}

impl Default for MutualAuthConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

impl MutualAuthConfig {
    /// Creates a config listening on `listener_port` with no admission limit.
    pub fn new(listener_port: u16) -> Self {
        Self {
            listener_port,
            max_concurrent_handshakes: None,
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
        }
    }

    /// Bounds the number of inbound handshakes handled concurrently.
    #[must_use]
    pub fn with_max_concurrent_handshakes(mut self, limit: NonZeroUsize) -> Self {
        self.max_concurrent_handshakes = Some(limit);
        self
    }

    /// Sets the inbound handshake deadline used together with admission control.
    #[must_use]
    pub fn with_handshake_timeout_secs(mut self, secs: NonZeroU64) -> Self {
        self.handshake_timeout_secs = secs;
        self
    }

    /// Returns the deadline for admitted inbound handshakes, if admission control
    /// is enabled.
    pub fn inbound_handshake_deadline(&self) -> Option<Duration> {
        self.max_concurrent_handshakes
            .map(|_| Duration::from_secs(self.handshake_timeout_secs.get()))
    }

    /// Returns `true` when a listener port is configured.
    pub fn is_enabled(&self) -> bool {
        self.listener_port != 0
    }

    /// Reads the config from [`LISTENER_PORT_ENV`] and
    /// [`MAX_CONCURRENT_HANDSHAKES_ENV`]. Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = lookup(LISTENER_PORT_ENV) {
            config.listener_port = port.trim().parse().map_err(|e| {
                Error::InvalidConfig(format!("{LISTENER_PORT_ENV}={port:?}: {e}"))
            })?;
        }

        if let Some(limit) = lookup(MAX_CONCURRENT_HANDSHAKES_ENV) {
            let limit = limit.trim();
            if !limit.is_empty() {
                config.max_concurrent_handshakes = Some(limit.parse().map_err(|e| {
                    Error::InvalidConfig(format!("{MAX_CONCURRENT_HANDSHAKES_ENV}={limit:?}: {e}"))
                })?);
            }
        }

        if let Some(secs) = lookup(HANDSHAKE_TIMEOUT_ENV) {
            let secs = secs.trim();
            if !secs.is_empty() {
                config.handshake_timeout_secs = secs.parse().map_err(|e| {
                    Error::InvalidConfig(format!("{HANDSHAKE_TIMEOUT_ENV}={secs:?}: {e}"))
                })?;
            }
        }

        Ok(config)
    }
}
