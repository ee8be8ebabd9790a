//! Centralized configuration for peers and the TCP bootstrap.
//!
//! `PeerConfig` holds the compiled-in defaults. `PeerOptions` is the runtime
//! copy a peer is constructed with.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Default engine parameters.
pub struct PeerConfig;

impl PeerConfig {
    // Outbound call timeouts
    pub const SYNC_TIMEOUT: Duration = Duration::from_secs(3);
    pub const ASYNC_TIMEOUT: Duration = Duration::from_secs(10);
    pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

    // Identifier pool
    pub const MAX_PENDING_REQUESTS: usize = 100;
    pub const EXHAUSTION_RETRY_INTERVAL: Duration = Duration::from_millis(10);

    // Framing
    pub const END_OF_MESSAGE: u8 = b'\n';
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB

    // TCP bootstrap
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const MAX_CONNECTIONS: usize = 256;
}

/// Runtime options for a single peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PeerOptions {
    /// How long a synchronous call waits for its response.
    pub sync_timeout: Duration,
    /// How long any pending entry may hold an identifier before a sweep reclaims it.
    pub async_timeout: Duration,
    /// Size of the identifier space `[0, max_pending)`.
    pub max_pending: usize,
    /// Largest inbound message accepted before the peer is stopped.
    pub max_message_size: usize,
    /// Pause between sweep/retry rounds while force-waiting for an identifier.
    pub exhaustion_retry_interval: Duration,
    /// Longest a single outbound frame may take to go out before the peer is stopped.
    pub write_timeout: Duration,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            sync_timeout: PeerConfig::SYNC_TIMEOUT,
            async_timeout: PeerConfig::ASYNC_TIMEOUT,
            max_pending: PeerConfig::MAX_PENDING_REQUESTS,
            max_message_size: PeerConfig::MAX_MESSAGE_SIZE,
            exhaustion_retry_interval: PeerConfig::EXHAUSTION_RETRY_INTERVAL,
            write_timeout: PeerConfig::WRITE_TIMEOUT,
        }
    }
}

impl PeerOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the synchronous call timeout.
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Set the pending entry expiry used by sweeps.
    pub fn with_async_timeout(mut self, timeout: Duration) -> Self {
        self.async_timeout = timeout;
        self
    }

    /// Set the identifier pool capacity.
    pub fn with_max_pending(mut self, capacity: usize) -> Self {
        self.max_pending = capacity;
        self
    }

    /// Set the inbound message size limit.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the force-wait retry interval.
    pub fn with_exhaustion_retry_interval(mut self, interval: Duration) -> Self {
        self.exhaustion_retry_interval = interval;
        self
    }

    /// Set the per-frame write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Repair settings the engine cannot run with.
    ///
    /// The pool holds at least one identifier, and a sweep never expires an
    /// entry before its synchronous caller has timed out.
    pub fn normalized(mut self) -> Self {
        if self.max_pending == 0 {
            warn!("max_pending of 0 raised to 1");
            self.max_pending = 1;
        }
        if self.async_timeout < self.sync_timeout {
            warn!(
                "async_timeout {:?} is shorter than sync_timeout {:?}, raising it",
                self.async_timeout, self.sync_timeout
            );
            self.async_timeout = self.sync_timeout;
        }
        self
    }
}
