//! Client retry and heartbeat policy.
//!
//! A [`ClientPolicy`] bundles the knobs that govern a connection: how many
//! times a call (or connect attempt) is retried, how long each attempt may
//! take, and the two heartbeat windows. Policies are validated before they
//! are installed and treated as immutable afterwards; changing the policy of
//! an open client drops the connection so the new values take effect on the
//! next connect.

use std::time::Duration;
use virtlink_core::{Error, Result};

/// Default per-attempt timeout, matching the host-agent deployments this
/// runtime was written for.
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(180);

/// Retry, timeout and heartbeat parameters for one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPolicy {
    retries: u32,
    retry_timeout: Duration,
    incoming_heartbeat: Option<Duration>,
    outgoing_heartbeat: Option<Duration>,
}

impl ClientPolicy {
    /// Create a policy with the given retry budget and per-attempt timeout.
    ///
    /// Both heartbeats start disabled; enable them with the `with_*`
    /// builders. `retries` counts additional attempts after the first, so
    /// the worst-case call latency is `retry_timeout × (retries + 1)`.
    pub fn new(retries: u32, retry_timeout: Duration) -> Self {
        Self {
            retries,
            retry_timeout,
            incoming_heartbeat: None,
            outgoing_heartbeat: None,
        }
    }

    /// Disconnect when the peer has been silent for `interval`.
    pub fn with_incoming_heartbeat(mut self, interval: Duration) -> Self {
        self.incoming_heartbeat = Some(interval);
        self
    }

    /// Emit a protocol heartbeat when nothing was written for `interval`.
    pub fn with_outgoing_heartbeat(mut self, interval: Duration) -> Self {
        self.outgoing_heartbeat = Some(interval);
        self
    }

    /// Check the policy is usable before installing it.
    pub fn validate(&self) -> Result<()> {
        if self.retry_timeout.is_zero() {
            return Err(Error::Internal("retry timeout must be non-zero".to_string()));
        }
        if self.incoming_heartbeat.is_some_and(|d| d.is_zero()) {
            return Err(Error::Internal("incoming heartbeat must be non-zero".to_string()));
        }
        if self.outgoing_heartbeat.is_some_and(|d| d.is_zero()) {
            return Err(Error::Internal("outgoing heartbeat must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn retry_timeout(&self) -> Duration {
        self.retry_timeout
    }

    pub fn incoming_heartbeat(&self) -> Option<Duration> {
        self.incoming_heartbeat
    }

    pub fn outgoing_heartbeat(&self) -> Option<Duration> {
        self.outgoing_heartbeat
    }
}

impl Default for ClientPolicy {
    fn default() -> Self {
        Self::new(0, DEFAULT_RETRY_TIMEOUT)
    }
}
