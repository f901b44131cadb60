//! Ambient error taxonomy. Protocol-level conditions (stale votes, log
//! mismatches, unknown message types) are never represented as `Result` —
//! they are ordinary control flow inside the core. `RaftError` only covers
//! bootstrap and transport-boundary failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RaftError {
    #[error("invalid replica id {0:?}: must be 4 hex characters")]
    InvalidReplicaId(String),

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("a cluster needs at least one peer id")]
    NoPeers,

    #[error("failed to bind UDP socket on port {port}: {source}")]
    BindFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}
