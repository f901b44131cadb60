//! Role state.
//!
//! Leader-only bookkeeping (`nextIndex`, `matchIndex`, `pendingWrites`) is
//! expressed as a sum variant of `Role` rather than always-present optional
//! fields, so follower code cannot accidentally read `nextIndex`/`matchIndex`.

use crate::message::Mid;
use crate::types::{ReplicaId, WireIndex};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// A write the leader has accepted but not yet committed and acked.
/// Keyed by the log index of the entry it produced so that commit/apply
/// acks exactly the write that committed, never a same-key write that is
/// still in flight (an earlier design acked *all* queued writes sharing a
/// key on first commit of that key, which could ack a write that had not
/// itself committed).
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub log_index: usize,
    pub client: ReplicaId,
    pub mid: Mid,
    pub key: String,
}

/// Leader-only state.
#[derive(Debug, Default)]
pub struct LeaderState {
    /// Next log index to send to each peer.
    pub next_index: BTreeMap<ReplicaId, usize>,
    /// Highest log index known replicated on each peer, or `-1` if the peer
    /// has not yet sent a single `appendReply` this leadership term. `-1` is
    /// the same "nothing here" sentinel the wire format uses for an empty
    /// log (`WireIndex`), deliberately distinct from the valid index `0` —
    /// seeding this with `0` would let a peer that has never replied count
    /// as having replicated log index 0, letting the first entry of a
    /// freshly-elected leader's log reach quorum without a real majority of
    /// `appendReply`s.
    pub match_index: BTreeMap<ReplicaId, WireIndex>,
    /// Unacknowledged client puts, oldest first.
    pub pending_writes: VecDeque<PendingWrite>,
}

impl LeaderState {
    pub fn new(peers: &[ReplicaId], log_len: usize) -> Self {
        let mut next_index = BTreeMap::new();
        let mut match_index = BTreeMap::new();
        for peer in peers {
            next_index.insert(peer.clone(), log_len);
            match_index.insert(peer.clone(), -1);
        }
        LeaderState {
            next_index,
            match_index,
            pending_writes: VecDeque::new(),
        }
    }
}

/// Candidate-only state: the set of peers (including self) that have
/// granted a vote this term.
#[derive(Debug, Default)]
pub struct CandidateState {
    pub votes: BTreeSet<ReplicaId>,
}

/// One of {follower, candidate, leader}.
#[derive(Debug)]
pub enum Role {
    Follower,
    Candidate(CandidateState),
    Leader(LeaderState),
}

impl Role {
    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader(_))
    }

    pub fn is_candidate(&self) -> bool {
        matches!(self, Role::Candidate(_))
    }

    pub fn as_leader(&self) -> Option<&LeaderState> {
        match self {
            Role::Leader(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_leader_mut(&mut self) -> Option<&mut LeaderState> {
        match self {
            Role::Leader(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_candidate_mut(&mut self) -> Option<&mut CandidateState> {
        match self {
            Role::Candidate(state) => Some(state),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Role::Follower => "follower",
            Role::Candidate(_) => "candidate",
            Role::Leader(_) => "leader",
        }
    }
}
