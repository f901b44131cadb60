//! Tunable timing parameters.
//!
//! At this system's scale the only ambient configuration surface is timing;
//! there is no on-disk config format. Defaults match the clock module's
//! constants; tests and operators may override them via environment
//! variables to make timing-sensitive scenarios (election under churn)
//! deterministic or just faster.

use crate::clock::{ELECTION_TIMEOUT_MAX, ELECTION_TIMEOUT_MIN, HEARTBEAT_INTERVAL, RECV_TIMEOUT};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_interval: Duration,
    pub recv_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            election_timeout_min: ELECTION_TIMEOUT_MIN,
            election_timeout_max: ELECTION_TIMEOUT_MAX,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            recv_timeout: RECV_TIMEOUT,
        }
    }
}

impl Config {
    /// Override `election_timeout_*`/`heartbeat_interval`/`recv_timeout`
    /// (milliseconds) from the environment if present, keeping the
    /// defaults otherwise.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Some(ms) = env_millis("RAFT_ELECTION_TIMEOUT_MIN_MS") {
            config.election_timeout_min = Duration::from_millis(ms);
        }
        if let Some(ms) = env_millis("RAFT_ELECTION_TIMEOUT_MAX_MS") {
            config.election_timeout_max = Duration::from_millis(ms);
        }
        if let Some(ms) = env_millis("RAFT_HEARTBEAT_INTERVAL_MS") {
            config.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_millis("RAFT_RECV_TIMEOUT_MS") {
            config.recv_timeout = Duration::from_millis(ms);
        }
        config
    }
}

fn env_millis(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.parse().ok()
}
