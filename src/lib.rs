//! A small single-threaded, leader-based replicated key-value store.
//!
//! The consensus core (election, log replication, commit/apply, client
//! dispatch) lives in [`replica`] and talks only to the [`transport::Cluster`]
//! trait; [`transport`] supplies both the real UDP implementation and an
//! in-memory one used by tests.

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod log;
pub mod message;
pub mod replica;
pub mod role;
pub mod state_machine;
pub mod transport;
pub mod types;

pub use replica::Replica;
pub use types::ReplicaId;
