//! Clock & timers.
//!
//! Timers are expressed as absolute deadlines on a monotonic clock:
//! re-arming means assigning a new deadline, never recomputing intervals
//! from repeated wall-clock arithmetic.

use rand::Rng;
use std::time::{Duration, Instant};

/// Election timeout is drawn uniformly from this range at startup and on
/// every re-arm.
pub const ELECTION_TIMEOUT_MIN: Duration = Duration::from_millis(500);
pub const ELECTION_TIMEOUT_MAX: Duration = Duration::from_millis(750);

/// Fixed heartbeat cadence while leader.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(485);

/// Bounded transport receive timeout so timer checks still fire during
/// prolonged silence.
pub const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// A re-armable deadline. Re-arming assigns a fresh absolute instant rather
/// than accumulating drift from repeated interval arithmetic.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn due(&self, now: Instant) -> bool {
        now >= self.at
    }

    pub fn at(&self) -> Instant {
        self.at
    }
}

/// The election timer: re-armed on any valid AppendEntries from a
/// current-term leader, any vote grant, and on starting one's own
/// candidacy. The timeout range is a parameter (not a bare constant) so
/// tests can shrink it; `Config::default()` reproduces the range above.
#[derive(Debug)]
pub struct ElectionTimer {
    deadline: Deadline,
    min: Duration,
    max: Duration,
}

impl ElectionTimer {
    pub fn new(now: Instant, min: Duration, max: Duration) -> Self {
        let mut timer = ElectionTimer {
            deadline: Deadline { at: now },
            min,
            max,
        };
        timer.reset(now);
        timer
    }

    pub fn reset(&mut self, now: Instant) {
        let timeout = rand::thread_rng().gen_range(self.min..=self.max);
        self.deadline = Deadline { at: now + timeout };
    }

    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.due(now)
    }
}

/// The leader's heartbeat timer: fires every `interval`, measured from the
/// last emission.
#[derive(Debug)]
pub struct HeartbeatTimer {
    deadline: Deadline,
    interval: Duration,
}

impl HeartbeatTimer {
    pub fn new(now: Instant, interval: Duration) -> Self {
        HeartbeatTimer {
            deadline: Deadline { at: now + interval },
            interval,
        }
    }

    pub fn reset(&mut self, now: Instant) {
        self.deadline = Deadline { at: now + self.interval };
    }

    pub fn due(&self, now: Instant) -> bool {
        self.deadline.due(now)
    }
}
