//! Engine configuration and state types.

use serde::{Deserialize, Serialize};

/// Configuration for a sync engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Contract address whose events are indexed.
    pub contract_address: String,
    /// Backfill cycle interval in seconds.
    pub poll_interval_secs: u64,
    /// Largest block span requested per log query before the fetcher
    /// bisects preemptively. Node providers commonly cap range size; the
    /// fetcher also bisects reactively when a node rejects a range.
    pub max_block_range: u64,
    /// RPC request timeout in seconds; a timeout counts as the node being
    /// unavailable.
    pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            contract_address: String::new(),
            poll_interval_secs: 5,
            max_block_range: 10_000,
            request_timeout_secs: 30,
        }
    }
}

/// Runtime state of the sync engine.
///
/// An explicit state machine plus a cancellation signal replaces any shared
/// "is monitoring" flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Not yet started.
    Idle,
    /// A backfill cycle is scanning a block range.
    Scanning,
    /// Caught up; waiting on the timer with the live subscription attached.
    Live,
    /// Stop requested; in-flight persistence is draining.
    Stopping,
    /// Terminated.
    Stopped,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Scanning => write!(f, "scanning"),
            Self::Live => write!(f, "live"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.poll_interval_secs, 5);
        assert_eq!(cfg.max_block_range, 10_000);
    }

    #[test]
    fn state_display() {
        assert_eq!(SyncState::Scanning.to_string(), "scanning");
        assert_eq!(SyncState::Live.to_string(), "live");
    }
}
