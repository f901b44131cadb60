//! Transport: the datagram bus the consensus core treats as an external
//! collaborator.
//!
//! The core only ever talks to a `Cluster`. `UdpCluster` is the real
//! best-effort, unauthenticated JSON-over-UDP implementation; `sim::SimCluster`
//! is an in-memory stand-in used by the integration tests in `tests/` to
//! drive several replicas deterministically in one process, following the
//! teacher's own split between its `Replica` core and a pluggable `Cluster`
//! trait it hands to callers.

use crate::message::Message;
use crate::types::{ReplicaId, BROADCAST_ID};
use log::{debug, warn};
use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Maximum UDP payload this transport will ever send or accept.
pub const MAX_PAYLOAD_BYTES: usize = 65_535;

/// The seam between the consensus core and however messages actually move.
pub trait Cluster {
    /// Send `msg` toward `msg.dst()`. Fire-and-forget: the transport makes
    /// no delivery guarantee.
    fn send(&mut self, msg: &Message);

    /// Block for up to `timeout` waiting for one inbound message addressed
    /// to this replica or to `BROADCAST`; returns `None` on timeout so the
    /// caller's timer checks still run.
    fn recv_timeout(&mut self, timeout: Duration) -> Option<Message>;
}

/// Deterministically derive a peer's UDP port from its 4-hex-char id: the
/// id *is* the port number (a 4-hex-digit id tops out at 0xFFFF, exactly
/// the range of a `u16` port). This keeps the wire transport self-routing
/// from nothing but the id list the CLI already takes, with no separate
/// peer-address configuration needed — a concrete resolution of an
/// otherwise-unspecified transport (see DESIGN.md).
pub fn id_to_port(id: &ReplicaId) -> Option<u16> {
    u16::from_str_radix(&id.0, 16).ok()
}

pub struct UdpCluster {
    socket: UdpSocket,
    self_id: ReplicaId,
    peer_addrs: HashMap<ReplicaId, SocketAddr>,
    recv_buf: [u8; MAX_PAYLOAD_BYTES],
}

impl UdpCluster {
    pub fn bind(port: u16, self_id: ReplicaId, peers: &[ReplicaId]) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("127.0.0.1", port))?;
        socket.set_nonblocking(false)?;
        socket.set_read_timeout(Some(Duration::from_millis(1)))?; // overridden per-call

        let mut peer_addrs = HashMap::new();
        for peer in peers {
            if let Some(peer_port) = id_to_port(peer) {
                peer_addrs.insert(peer.clone(), SocketAddr::from(([127, 0, 0, 1], peer_port)));
            } else {
                warn!("peer id {peer} is not a valid 4-hex-char port; unreachable");
            }
        }

        Ok(UdpCluster {
            socket,
            self_id,
            peer_addrs,
            recv_buf: [0u8; MAX_PAYLOAD_BYTES],
        })
    }

    fn send_to_one(&self, dst: &ReplicaId, payload: &[u8]) {
        match self.peer_addrs.get(dst) {
            Some(addr) => {
                if let Err(e) = self.socket.send_to(payload, addr) {
                    debug!("send to {dst} failed (dropped by best-effort transport): {e}");
                }
            }
            None => warn!("no known address for peer {dst}; dropping message"),
        }
    }
}

impl Cluster for UdpCluster {
    fn send(&mut self, msg: &Message) {
        let payload = match serde_json::to_vec(msg) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to encode outbound message: {e}");
                return;
            }
        };

        if msg.dst().is_broadcast() {
            let peers: Vec<ReplicaId> = self.peer_addrs.keys().cloned().collect();
            for peer in &peers {
                self.send_to_one(peer, &payload);
            }
        } else {
            self.send_to_one(msg.dst(), &payload);
        }
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Option<Message> {
        if let Err(e) = self.socket.set_read_timeout(Some(timeout)) {
            warn!("failed to set socket read timeout: {e}");
        }

        match self.socket.recv(&mut self.recv_buf) {
            Ok(n) => match serde_json::from_slice::<Message>(&self.recv_buf[..n]) {
                Ok(msg) => {
                    if msg.dst().0 == self.self_id.0 || msg.dst().0 == BROADCAST_ID {
                        Some(msg)
                    } else {
                        debug!("dropping message addressed to {}", msg.dst());
                        None
                    }
                }
                Err(e) => {
                    warn!("dropping malformed datagram: {e}");
                    None
                }
            },
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                None
            }
            Err(e) => {
                warn!("socket receive error: {e}");
                None
            }
        }
    }
}

/// In-memory `Cluster` used by tests to drive several replicas in one
/// process without real sockets.
pub mod sim {
    use super::Cluster;
    use crate::message::Message;
    use crate::types::BROADCAST_ID;
    use crossbeam_channel::{Receiver, Sender};
    use std::collections::VecDeque;
    use std::time::Duration;

    pub struct SimCluster {
        self_id: String,
        inbox: Receiver<Message>,
        peers: Vec<(String, Sender<Message>)>,
        pending: VecDeque<Message>,
    }

    impl SimCluster {
        pub fn new(
            self_id: String,
            inbox: Receiver<Message>,
            peers: Vec<(String, Sender<Message>)>,
        ) -> Self {
            SimCluster {
                self_id,
                inbox,
                peers,
                pending: VecDeque::new(),
            }
        }
    }

    impl Cluster for SimCluster {
        fn send(&mut self, msg: &Message) {
            let dst = &msg.dst().0;
            if dst == BROADCAST_ID {
                for (_, tx) in &self.peers {
                    let _ = tx.send(msg.clone());
                }
            } else if let Some((_, tx)) = self.peers.iter().find(|(id, _)| id == dst) {
                let _ = tx.send(msg.clone());
            }
        }

        fn recv_timeout(&mut self, timeout: Duration) -> Option<Message> {
            if let Some(msg) = self.pending.pop_front() {
                return Some(msg);
            }
            match self.inbox.recv_timeout(timeout) {
                Ok(msg) => {
                    if msg.dst().0 == self.self_id || msg.dst().0 == BROADCAST_ID {
                        Some(msg)
                    } else {
                        None
                    }
                }
                Err(_) => None,
            }
        }
    }
}
