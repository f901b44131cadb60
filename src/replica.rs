//! The replica event loop: election, replication, client dispatch, and
//! message routing. This module is the consensus core; everything else in
//! this crate exists to feed it messages and expose its state machine to
//! the outside world.

use crate::clock::{ElectionTimer, HeartbeatTimer};
use crate::config::Config;
use crate::log::{Command, Log, LogEntry};
use crate::message::{Message, Mid};
use crate::role::{LeaderState, PendingWrite, Role};
use crate::state_machine::StateMachine;
use crate::transport::Cluster;
use crate::types::{broadcast, ReplicaId, Term, WireIndex, BOOTSTRAP_LEADER_ID, UNKNOWN_LEADER_ID};
use log::{debug, info, warn};
use std::time::Instant;

/// Per-type buffers for client messages received while an election is in
/// progress and the leader is unknown. Replay happens on ascension and on
/// learning a new leader (an earlier design retained these lists but
/// never drained them, leaving clients to retry forever).
#[derive(Debug, Default)]
struct MissBuffer {
    puts: Vec<Message>,
    gets: Vec<Message>,
}

impl MissBuffer {
    fn push(&mut self, msg: Message) {
        match msg {
            Message::Put { .. } => self.puts.push(msg),
            Message::Get { .. } => self.gets.push(msg),
            _ => {}
        }
    }

    fn drain(&mut self) -> Vec<Message> {
        let mut drained: Vec<Message> = self.puts.drain(..).collect();
        drained.extend(self.gets.drain(..));
        drained
    }
}

pub struct Replica<C: Cluster> {
    id: ReplicaId,
    peers: Vec<ReplicaId>,
    cluster: C,
    config: Config,

    current_term: Term,
    voted_for: Option<ReplicaId>,
    role: Role,
    log: Log,
    commit_index: WireIndex,
    last_applied: WireIndex,
    state_machine: StateMachine,
    known_leader: Option<ReplicaId>,

    election_timer: ElectionTimer,
    heartbeat_timer: HeartbeatTimer,

    /// Election-window buffering bookkeeping.
    in_election: bool,
    has_completed_an_election: bool,
    miss_buffer: MissBuffer,
}

impl<C: Cluster> Replica<C> {
    pub fn new(id: ReplicaId, peers: Vec<ReplicaId>, cluster: C, config: Config) -> Self {
        let now = Instant::now();
        let is_bootstrap = id.0 == BOOTSTRAP_LEADER_ID;

        let (role, current_term, known_leader, has_completed_an_election) = if is_bootstrap {
            (
                Role::Leader(LeaderState::new(&peers, 0)),
                1,
                Some(id.clone()),
                true,
            )
        } else {
            (Role::Follower, 0, None, false)
        };

        Replica {
            election_timer: ElectionTimer::new(
                now,
                config.election_timeout_min,
                config.election_timeout_max,
            ),
            heartbeat_timer: HeartbeatTimer::new(now, config.heartbeat_interval),
            id,
            peers,
            cluster,
            config,
            current_term,
            voted_for: None,
            role,
            log: Log::new(),
            commit_index: -1,
            last_applied: -1,
            state_machine: StateMachine::new(),
            known_leader,
            in_election: false,
            has_completed_an_election,
        }
    }

    /// Broadcast the startup `hello` handshake. Advisory only; the core
    /// does not wait for or require a response.
    pub fn announce_hello(&mut self) {
        let leader = self.leader_field();
        self.cluster.send(&Message::Hello {
            src: self.id.clone(),
            dst: broadcast(),
            leader,
        });
    }

    /// Blocks forever, alternating one transport receive with a timer
    /// check.
    pub fn run(&mut self) -> ! {
        loop {
            self.poll();
        }
    }

    /// One iteration of the event loop: a single bounded receive from the
    /// transport, followed by a timer check. Exposed so test drivers can
    /// advance several replicas in round-robin without blocking forever.
    pub fn poll(&mut self) {
        let msg = self.cluster.recv_timeout(self.config.recv_timeout);
        let now = Instant::now();
        if let Some(msg) = msg {
            self.dispatch(msg, now);
        }
        self.tick(now);
    }

    /// Process exactly one already-received message plus a timer check;
    /// exposed separately from `run` so tests can drive a replica
    /// step-by-step without blocking on a real clock.
    pub fn step(&mut self, msg: Option<Message>, now: Instant) {
        if let Some(msg) = msg {
            self.dispatch(msg, now);
        }
        self.tick(now);
    }

    pub fn id(&self) -> &ReplicaId {
        &self.id
    }

    pub fn current_term(&self) -> Term {
        self.current_term
    }

    pub fn role_name(&self) -> &'static str {
        self.role.name()
    }

    pub fn known_leader(&self) -> Option<&ReplicaId> {
        self.known_leader.as_ref()
    }

    pub fn commit_index(&self) -> WireIndex {
        self.commit_index
    }

    pub fn last_applied(&self) -> WireIndex {
        self.last_applied
    }

    pub fn get_applied(&self, key: &str) -> Option<&String> {
        self.state_machine.get(key)
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    // ---- Clock & timers ---------------------------------------------------

    fn tick(&mut self, now: Instant) {
        if !self.role.is_leader() && self.election_timer.expired(now) {
            self.become_candidate(now);
        } else if self.role.is_leader() && self.heartbeat_timer.due(now) {
            self.broadcast_heartbeat(now);
        }
    }

    // ---- Message router -----------------------------------------------

    fn dispatch(&mut self, msg: Message, now: Instant) {
        if !self.addressed_to_me(&msg) {
            debug!("dropping message not addressed to {}", self.id);
            return;
        }

        match msg {
            Message::Hello { src, .. } => debug!("hello from {src}"),
            Message::RequestVote {
                src,
                term,
                candidate_id,
                last_log_index,
                last_log_term,
                ..
            } => self.handle_request_vote(src, term, candidate_id, last_log_index, last_log_term, now),
            Message::Vote {
                src,
                term,
                vote_granted,
                ..
            } => self.handle_vote_reply(src, term, vote_granted, now),
            Message::AppendEntries {
                src,
                leader,
                term,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
                entire_log,
                ..
            } => self.handle_append_entries(
                now,
                src,
                leader,
                term,
                prev_log_index,
                prev_log_term,
                entries,
                leader_commit,
                entire_log,
            ),
            Message::AppendReply {
                src,
                term,
                success,
                match_index,
                ..
            } => self.handle_append_reply(src, term, success, match_index, now),
            Message::Put { .. } | Message::Get { .. } => self.dispatch_client(msg, now),
            Message::Redirect { redirect_message, .. } => self.dispatch_client(*redirect_message, now),
            Message::Ok { .. } => debug!("replica received a client-bound ok message; dropping"),
            Message::Fail { .. } => warn!("replica received an unexpected fail message; dropping"),
        }
    }

    fn addressed_to_me(&self, msg: &Message) -> bool {
        msg.dst().0 == self.id.0 || msg.dst().is_broadcast()
    }

    // ---- Election -------------------------------------------------------

    fn become_candidate(&mut self, now: Instant) {
        self.current_term += 1;
        info!("{} becoming candidate for term {}", self.id, self.current_term);

        let mut candidate = crate::role::CandidateState::default();
        candidate.votes.insert(self.id.clone());
        self.voted_for = Some(self.id.clone());
        self.role = Role::Candidate(candidate);
        self.in_election = true;
        self.election_timer.reset(now);

        let last_log_index = self.log.last_index();
        let last_log_term = self.log.last_term().unwrap_or(0);
        self.cluster.send(&Message::RequestVote {
            src: self.id.clone(),
            dst: broadcast(),
            leader: self.leader_field(),
            term: self.current_term,
            candidate_id: self.id.clone(),
            last_log_index,
            last_log_term,
        });

        // A single-replica cluster has nobody to wait on.
        if self.peers.is_empty() {
            self.become_leader(now);
        }
    }

    fn handle_request_vote(
        &mut self,
        src: ReplicaId,
        term: Term,
        candidate_id: ReplicaId,
        c_last_index: WireIndex,
        c_last_term: Term,
        now: Instant,
    ) {
        self.in_election = true;

        if term > self.current_term {
            self.step_down_to_follower(term, now);
        }

        if term < self.current_term {
            self.send_vote(&src, false);
            return;
        }

        let voted_for_other = matches!(&self.voted_for, Some(v) if v.0 != candidate_id.0);
        let up_to_date = self.candidate_is_up_to_date(c_last_index, c_last_term);
        let grant = !voted_for_other && up_to_date;

        if grant {
            self.voted_for = Some(candidate_id.clone());
            // Provisional: a candidate isn't a leader yet, but the grantor
            // tracks it as the tentative leader until told otherwise.
            self.known_leader = Some(candidate_id);
            self.election_timer.reset(now);
        }

        self.send_vote(&src, grant);
    }

    /// The "up-to-date" test used to decide whether to grant a vote.
    fn candidate_is_up_to_date(&self, c_last_index: WireIndex, c_last_term: Term) -> bool {
        let m_last_term = match self.log.last_term() {
            None => return true,
            Some(t) => t,
        };
        let m_last_index = self.log.last_index();
        if m_last_term < c_last_term {
            return true;
        }
        m_last_term == c_last_term && m_last_index <= c_last_index
    }

    fn handle_vote_reply(&mut self, src: ReplicaId, term: Term, vote_granted: bool, now: Instant) {
        self.in_election = true;

        if term > self.current_term {
            self.step_down_to_follower(term, now);
            return;
        }

        // Stale-candidate handling: drop if not a candidate.
        if !self.role.is_candidate() {
            return;
        }

        if vote_granted {
            let ascend = {
                let candidate = self.role.as_candidate_mut().expect("checked is_candidate");
                candidate.votes.insert(src);
                let quorum = (self.peers.len() + 1 + 1) / 2;
                candidate.votes.len() >= quorum
            };
            if ascend {
                self.become_leader(now);
            }
        }
    }

    fn become_leader(&mut self, now: Instant) {
        info!("{} becoming leader for term {}", self.id, self.current_term);
        let log_len = self.log.len();
        self.role = Role::Leader(LeaderState::new(&self.peers, log_len));
        self.heartbeat_timer.reset(now);
        self.adopt_known_leader(self.id.clone(), now);
        self.broadcast_heartbeat(now);
    }

    fn step_down_to_follower(&mut self, term: Term, _now: Instant) {
        info!("{} stepping down to follower for term {term}", self.id);
        self.current_term = term;
        self.voted_for = None;
        self.role = Role::Follower;
    }

    // ---- Replication: leader side ---------------------------------------

    fn broadcast_heartbeat(&mut self, now: Instant) {
        let last_index = self.log.last_index();
        let last_term = self.log.last_term().unwrap_or(1);
        let msg = Message::AppendEntries {
            src: self.id.clone(),
            dst: broadcast(),
            leader: self.id.clone(),
            term: self.current_term,
            prev_log_index: last_index,
            prev_log_term: last_term,
            entries: vec![],
            leader_commit: self.commit_index,
            entire_log: false,
        };
        self.cluster.send(&msg);
        self.heartbeat_timer.reset(now);
    }

    /// Accept a client `put`: append, enqueue the ack, broadcast the new
    /// tail.
    fn handle_put(&mut self, client: ReplicaId, mid: Mid, key: String, value: String, now: Instant) {
        if !self.role.is_leader() {
            self.send_redirect(
                client.clone(),
                mid.clone(),
                Message::Put {
                    src: client,
                    dst: self.id.clone(),
                    leader: self.leader_field(),
                    mid,
                    key,
                    value,
                },
            );
            return;
        }

        self.log.append(LogEntry {
            command: Command { key: key.clone(), value },
            term: self.current_term,
        });
        let log_index = self.log.len() - 1;

        if let Some(leader) = self.role.as_leader_mut() {
            leader.pending_writes.push_back(PendingWrite {
                log_index,
                client,
                mid,
                key,
            });
        }

        self.broadcast_append_entries_tail(now);
    }

    fn handle_get(&mut self, client: ReplicaId, mid: Mid, key: String) {
        if !self.role.is_leader() {
            self.send_redirect(
                client.clone(),
                mid.clone(),
                Message::Get {
                    src: client,
                    dst: self.id.clone(),
                    leader: self.leader_field(),
                    mid,
                    key,
                },
            );
            return;
        }

        // Missing key is reported as an empty string, not as an absent
        // field.
        let value = self.state_machine.get(&key).cloned().unwrap_or_default();
        self.cluster.send(&Message::Ok {
            src: self.id.clone(),
            dst: client,
            leader: self.id.clone(),
            mid,
            value: Some(value),
        });
    }

    /// The normal-path AE payload shape: the final one or
    /// two log entries, broadcast identically to every peer. Catch-up
    /// beyond that relies entirely on the backfill path below — there is
    /// no per-follower `nextIndex`-driven tail here; catch-up beyond the
    /// last couple of entries relies entirely on the `entireLog` backfill.
    fn broadcast_append_entries_tail(&mut self, now: Instant) {
        let len = self.log.len();
        let (prev_log_index, prev_log_term, entries): (WireIndex, Term, Vec<LogEntry>) = if len == 0
        {
            (-1, 1, vec![])
        } else if len == 1 {
            (0, self.log.term_at(0).expect("len==1"), self.log.tail_from(0))
        } else {
            let p = len - 2;
            (p as WireIndex, self.log.term_at(p).expect("p<len"), self.log.tail_from(p))
        };

        let msg = Message::AppendEntries {
            src: self.id.clone(),
            dst: broadcast(),
            leader: self.id.clone(),
            term: self.current_term,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: self.commit_index,
            entire_log: false,
        };
        self.cluster.send(&msg);
        self.heartbeat_timer.reset(now);
    }

    fn handle_append_reply(
        &mut self,
        src: ReplicaId,
        term: Term,
        success: bool,
        match_index: WireIndex,
        now: Instant,
    ) {
        if term > self.current_term {
            self.step_down_to_follower(term, now);
            return;
        }

        // Role violation: an appendReply addressed to a non-leader is
        // dropped silently.
        if !self.role.is_leader() {
            return;
        }

        if success {
            if let Some(leader) = self.role.as_leader_mut() {
                leader.match_index.insert(src.clone(), match_index);
                leader.next_index.insert(src, (match_index.max(0) as usize) + 1);
            }
            self.advance_commit_and_apply(now);
        } else {
            self.send_backfill(src, match_index);
        }
    }

    /// Commit advancement here is computed from
    /// per-index `matchIndex` majorities (the same approach as
    /// a classic single-threaded Raft `Replica`'s ready-entry scan), not from
    /// a per-key replication tally.
    /// A per-key tally can silently lose
    /// a count when a key is overwritten by a later put before the earlier
    /// one commits; match-index-based advancement has no such gap, and
    /// per the Raft safety rule, a
    /// leader only ever commits directly by counting entries from its own
    /// current term.
    fn advance_commit_and_apply(&mut self, now: Instant) {
        let self_last_index = self.log.last_index();
        if self_last_index < 0 || self_last_index <= self.commit_index {
            return;
        }

        let (quorum, match_values) = match self.role.as_leader() {
            Some(leader) => (
                (self.peers.len() + 1 + 1) / 2,
                leader.match_index.values().copied().collect::<Vec<WireIndex>>(),
            ),
            None => return,
        };

        let mut new_commit = self.commit_index;
        let mut n = self_last_index;
        while n > self.commit_index {
            let idx = n as usize;
            // Peers that have never sent a real `appendReply` this term sit
            // at the `-1` sentinel and so never satisfy `mi >= n` for any
            // real index `n >= 0` — only a peer that has actually
            // acknowledged replicating up to `n` counts toward quorum.
            let count = 1 + match_values.iter().filter(|&&mi| mi >= n).count();
            if count >= quorum && self.log.term_at(idx) == Some(self.current_term) {
                new_commit = n;
                break;
            }
            n -= 1;
        }

        if new_commit > self.commit_index {
            self.commit_index = new_commit;
            self.apply_committed();
        }
    }

    /// Bounds-checked before indexing, so an
    /// out-of-range reported matchIndex cleanly produces no backfill
    /// instead of panicking.
    fn send_backfill(&mut self, dst: ReplicaId, reported_match_index: WireIndex) {
        if self.log.is_empty() {
            return;
        }
        let last = self.log.last_index();
        let idx = reported_match_index.max(0).min(last) as usize;
        let prev_log_term = match self.log.term_at(idx) {
            Some(t) => t,
            None => return,
        };
        let msg = Message::AppendEntries {
            src: self.id.clone(),
            dst,
            leader: self.id.clone(),
            term: self.current_term,
            prev_log_index: idx as WireIndex,
            prev_log_term,
            entries: self.log.tail_from(idx),
            leader_commit: self.commit_index,
            entire_log: true,
        };
        self.cluster.send(&msg);
    }

    // ---- Replication: follower side --------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn handle_append_entries(
        &mut self,
        now: Instant,
        src: ReplicaId,
        leader: ReplicaId,
        term: Term,
        prev_log_index: WireIndex,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
        leader_commit: WireIndex,
        entire_log: bool,
    ) {
        self.election_timer.reset(now);

        if term < self.current_term {
            // A stale leader. The heartbeat path sends no reply at all
            // a stale reconciliation attempt instead gets a clean
            // rejection so the sender's view of our log doesn't regress.
            if !entries.is_empty() {
                self.send_append_reply(&src, false);
            }
            return;
        }

        if term > self.current_term || !matches!(self.role, Role::Follower) {
            self.step_down_to_follower(term, now);
        }
        // Adopting any valid (current-or-newer-term) AE clears votedFor,
        // not only the step-down path above: a follower that granted a vote
        // earlier this term must not keep holding onto it once it has
        // heard from this term's actual leader.
        self.voted_for = None;
        self.adopt_known_leader(leader, now);

        if entries.is_empty() {
            return;
        }

        let success = self.reconcile(prev_log_index, prev_log_term, entries, entire_log);
        self.send_append_reply(&src, success);

        if leader_commit > self.commit_index {
            self.commit_index = leader_commit.min(self.log.last_index());
            self.apply_committed();
        }
    }

    /// The reconciliation algorithm, with the boundary
    /// check ordered before any indexing into the log.
    fn reconcile(
        &mut self,
        prev_log_index: WireIndex,
        prev_log_term: Term,
        entries: Vec<LogEntry>,
        entire_log: bool,
    ) -> bool {
        if self.log.is_empty() {
            if entire_log {
                self.log.replace_all(entries);
                true
            } else {
                false
            }
        } else if self.log.last_index() < prev_log_index || prev_log_index < 0 {
            false
        } else {
            let p = prev_log_index as usize;
            match self.log.term_at(p) {
                Some(t) if t == prev_log_term => {
                    self.log.splice_from(p, entries);
                    true
                }
                _ => false,
            }
        }
    }

    fn send_append_reply(&mut self, dst: &ReplicaId, success: bool) {
        let match_index = self.log.last_index();
        self.cluster.send(&Message::AppendReply {
            src: self.id.clone(),
            dst: dst.clone(),
            leader: self.leader_field(),
            term: self.current_term,
            success,
            match_index,
        });
    }

    /// Entries `(lastApplied, commitIndex]` are applied in strict index
    /// order.
    fn apply_committed(&mut self) {
        while self.commit_index > self.last_applied {
            let next = self.last_applied + 1;
            let idx = next as usize;
            let entry = match self.log.get(idx) {
                Some(e) => e.clone(),
                None => break,
            };
            self.state_machine.apply(&entry.command);
            self.last_applied = next;

            // Ack exactly the write that produced
            // this log index, never every queued write sharing its key.
            let mut acked = None;
            if let Some(leader) = self.role.as_leader_mut() {
                if let Some(pos) = leader.pending_writes.iter().position(|w| w.log_index == idx) {
                    acked = leader.pending_writes.remove(pos);
                }
            }
            if let Some(write) = acked {
                self.cluster.send(&Message::Ok {
                    src: self.id.clone(),
                    dst: write.client,
                    leader: self.id.clone(),
                    mid: write.mid,
                    value: None,
                });
            }
        }
    }

    // ---- Client dispatch + election-window buffering ---------------------

    fn dispatch_client(&mut self, msg: Message, now: Instant) {
        let buffering_active = self.in_election && self.has_completed_an_election;
        let unknown_leader = match &msg {
            Message::Put { leader, .. } | Message::Get { leader, .. } => leader.0 == UNKNOWN_LEADER_ID,
            _ => false,
        };

        if buffering_active && unknown_leader {
            self.miss_buffer.push(msg);
            return;
        }

        match msg {
            Message::Put { src, mid, key, value, .. } => self.handle_put(src, mid, key, value, now),
            Message::Get { src, mid, key, .. } => self.handle_get(src, mid, key),
            other => debug!("dropping non-client message routed as client dispatch: {other:?}"),
        }
    }

    fn send_redirect(&mut self, client: ReplicaId, mid: Mid, original: Message) {
        self.cluster.send(&Message::Redirect {
            src: self.id.clone(),
            dst: client,
            leader: self.leader_field(),
            mid,
            redirect_message: Box::new(original),
        });
    }

    fn send_vote(&mut self, dst: &ReplicaId, granted: bool) {
        self.cluster.send(&Message::Vote {
            src: self.id.clone(),
            dst: dst.clone(),
            leader: self.leader_field(),
            term: self.current_term,
            vote_granted: granted,
        });
    }

    fn leader_field(&self) -> ReplicaId {
        self.known_leader
            .clone()
            .unwrap_or_else(|| ReplicaId::new(UNKNOWN_LEADER_ID))
    }

    /// Marks the end of an election window from this replica's point of
    /// view (it now has a concrete leader, whether itself or a peer) and
    /// replays anything buffered under §4.7 while the leader was unknown.
    fn adopt_known_leader(&mut self, leader: ReplicaId, now: Instant) {
        self.known_leader = Some(leader);
        self.in_election = false;
        self.has_completed_an_election = true;

        let buffered = self.miss_buffer.drain();
        for msg in buffered {
            self.dispatch_client(msg, now);
        }
    }
}
