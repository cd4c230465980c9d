//! Controller-side settings that do not travel to workers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default bound on every setup acknowledgement barrier.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Longest wait for initDone, buildDone or loadDone from the whole pool.
    /// `None` waits forever.
    pub ack_timeout: Option<Duration>,
    /// Look up and persist the shared index in the blob store, if one is attached.
    pub cache_index: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Some(DEFAULT_ACK_TIMEOUT),
            cache_index: true,
        }
    }
}

impl SessionConfig {
    pub fn with_ack_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_cache_index(mut self, enabled: bool) -> Self {
        self.cache_index = enabled;
        self
    }
}
