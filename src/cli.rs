//! Command-line argument parsing for the `raftkv` binary.
//!
//! Invocation: `raftkv <port> <id> <peer-id>...` — one UDP port to bind,
//! this replica's own 4-hex-char id, and the id of every other replica in
//! the cluster. A peer's id doubles as its UDP port (`transport::id_to_port`).

use crate::error::RaftError;
use crate::types::ReplicaId;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "raftkv", about = "A small replicated key-value store")]
pub struct Cli {
    /// UDP port this replica listens on.
    pub port: u16,

    /// This replica's 4-hex-char id.
    pub id: String,

    /// Every other replica's id (also its UDP port).
    #[arg(required = true, num_args = 1..)]
    pub peers: Vec<String>,
}

impl Cli {
    pub fn parsed() -> Result<(u16, ReplicaId, Vec<ReplicaId>), RaftError> {
        let cli = Cli::parse();
        let id = validate_id(&cli.id)?;
        if cli.peers.is_empty() {
            return Err(RaftError::NoPeers);
        }
        let peers = cli
            .peers
            .iter()
            .map(|p| validate_id(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((cli.port, id, peers))
    }
}

fn validate_id(raw: &str) -> Result<ReplicaId, RaftError> {
    if raw.len() == 4 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(ReplicaId::new(raw.to_uppercase()))
    } else {
        Err(RaftError::InvalidReplicaId(raw.to_string()))
    }
}
