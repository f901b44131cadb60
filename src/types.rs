//! Identifiers and constants shared across the consensus core.

use std::fmt;

/// A replica identifier: a 4-character hex string.
///
/// Kept as a thin wrapper rather than a bare `String` so that `BROADCAST`
/// and the bootstrap leader id are typed constants instead of repeated
/// string literals scattered through the core.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(pub String);

impl ReplicaId {
    pub fn new(id: impl Into<String>) -> Self {
        ReplicaId(id.into())
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST_ID
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ReplicaId {
    fn from(s: &str) -> Self {
        ReplicaId(s.to_string())
    }
}

/// The reserved address meaning "all peers".
pub const BROADCAST_ID: &str = "FFFF";

/// The reserved "unknown leader" marker used for election-window buffering.
pub const UNKNOWN_LEADER_ID: &str = "FFFF";

/// The well-known id that bootstraps as leader of term 1.
pub const BOOTSTRAP_LEADER_ID: &str = "0000";

/// A monotonic epoch identifying one election cycle.
pub type Term = u64;

/// A position in the replicated log. `-1` denotes "log is empty" on the
/// wire (`prevLogIndex = -1`); internally we use `usize` for actual indices
/// and reserve `i64` only for the wire representation.
pub type WireIndex = i64;

pub fn broadcast() -> ReplicaId {
    ReplicaId(BROADCAST_ID.to_string())
}
