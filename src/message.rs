//! Message vocabulary and routing tags.
//!
//! Dispatch is an exhaustive tagged union rather than a dynamic string
//! match, so an unhandled message type is a compile-time error rather than
//! a silent runtime no-op.

use crate::log::LogEntry;
use crate::types::{ReplicaId, Term, WireIndex};
use serde::{Deserialize, Serialize};

/// A client-chosen message identifier echoed in responses for correlation.
pub type Mid = String;

/// All messages a replica may send or receive, tagged by `type` on the
/// wire. Every required envelope field (`src`, `dst`, `leader`) is carried
/// by every variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "hello")]
    Hello {
        src: ReplicaId,
        dst: ReplicaId,
        leader: ReplicaId,
    },

    #[serde(rename = "put")]
    Put {
        src: ReplicaId,
        dst: ReplicaId,
        leader: ReplicaId,
        #[serde(rename = "MID")]
        mid: Mid,
        key: String,
        value: String,
    },

    #[serde(rename = "get")]
    Get {
        src: ReplicaId,
        dst: ReplicaId,
        leader: ReplicaId,
        #[serde(rename = "MID")]
        mid: Mid,
        key: String,
    },

    #[serde(rename = "ok")]
    Ok {
        src: ReplicaId,
        dst: ReplicaId,
        leader: ReplicaId,
        #[serde(rename = "MID")]
        mid: Mid,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },

    #[serde(rename = "redirect")]
    Redirect {
        src: ReplicaId,
        dst: ReplicaId,
        leader: ReplicaId,
        #[serde(rename = "MID")]
        mid: Mid,
        #[serde(rename = "redirectMessage")]
        redirect_message: Box<Message>,
    },

    /// Not emitted by the core: unresolved puts stay queued forever. Kept
    /// in the vocabulary for wire completeness and for a future
    /// bounded-retry layer.
    #[serde(rename = "fail")]
    Fail {
        src: ReplicaId,
        dst: ReplicaId,
        leader: ReplicaId,
        #[serde(rename = "MID")]
        mid: Mid,
    },

    #[serde(rename = "requestVote")]
    RequestVote {
        src: ReplicaId,
        dst: ReplicaId,
        leader: ReplicaId,
        term: Term,
        candidate_id: ReplicaId,
        #[serde(rename = "lastLogIndex")]
        last_log_index: WireIndex,
        #[serde(rename = "lastLogTerm")]
        last_log_term: Term,
    },

    #[serde(rename = "vote")]
    Vote {
        src: ReplicaId,
        dst: ReplicaId,
        leader: ReplicaId,
        term: Term,
        #[serde(rename = "voteGranted")]
        vote_granted: bool,
    },

    #[serde(rename = "appendEntries")]
    AppendEntries {
        src: ReplicaId,
        dst: ReplicaId,
        leader: ReplicaId,
        term: Term,
        #[serde(rename = "prevLogIndex")]
        prev_log_index: WireIndex,
        #[serde(rename = "prevLogTerm")]
        prev_log_term: Term,
        entries: Vec<LogEntry>,
        #[serde(rename = "leaderCommit")]
        leader_commit: WireIndex,
        #[serde(rename = "entireLog")]
        entire_log: bool,
    },

    #[serde(rename = "appendReply")]
    AppendReply {
        src: ReplicaId,
        dst: ReplicaId,
        leader: ReplicaId,
        term: Term,
        success: bool,
        #[serde(rename = "matchIndex")]
        match_index: WireIndex,
    },
}

impl Message {
    pub fn src(&self) -> &ReplicaId {
        match self {
            Message::Hello { src, .. }
            | Message::Put { src, .. }
            | Message::Get { src, .. }
            | Message::Ok { src, .. }
            | Message::Redirect { src, .. }
            | Message::Fail { src, .. }
            | Message::RequestVote { src, .. }
            | Message::Vote { src, .. }
            | Message::AppendEntries { src, .. }
            | Message::AppendReply { src, .. } => src,
        }
    }

    pub fn dst(&self) -> &ReplicaId {
        match self {
            Message::Hello { dst, .. }
            | Message::Put { dst, .. }
            | Message::Get { dst, .. }
            | Message::Ok { dst, .. }
            | Message::Redirect { dst, .. }
            | Message::Fail { dst, .. }
            | Message::RequestVote { dst, .. }
            | Message::Vote { dst, .. }
            | Message::AppendEntries { dst, .. }
            | Message::AppendReply { dst, .. } => dst,
        }
    }

    /// `true` for `put`/`get`: the two message kinds client dispatch and
    /// election-window buffering care about.
    pub fn is_client_request(&self) -> bool {
        matches!(self, Message::Put { .. } | Message::Get { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_round_trips_through_json() {
        let msg = Message::Put {
            src: ReplicaId::new("c001"),
            dst: ReplicaId::new("0000"),
            leader: ReplicaId::new("0000"),
            mid: "m1".to_string(),
            key: "a".to_string(),
            value: "1".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"put\""));
        assert!(json.contains("\"MID\":\"m1\""));

        let decoded: Message = serde_json::from_str(&json).unwrap();
        match decoded {
            Message::Put { key, value, .. } => {
                assert_eq!(key, "a");
                assert_eq!(value, "1");
            }
            _ => panic!("expected Put"),
        }
    }

    #[test]
    fn ok_without_value_omits_the_field() {
        let msg = Message::Ok {
            src: ReplicaId::new("0000"),
            dst: ReplicaId::new("c001"),
            leader: ReplicaId::new("0000"),
            mid: "m1".to_string(),
            value: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("value"));
    }

    #[test]
    fn append_entries_prev_log_index_minus_one_round_trips() {
        let msg = Message::AppendEntries {
            src: ReplicaId::new("0000"),
            dst: ReplicaId::new("0001"),
            leader: ReplicaId::new("0000"),
            term: 1,
            prev_log_index: -1,
            prev_log_term: 1,
            entries: vec![],
            leader_commit: -1,
            entire_log: false,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let decoded: Message = serde_json::from_str(&json).unwrap();
        match decoded {
            Message::AppendEntries { prev_log_index, .. } => assert_eq!(prev_log_index, -1),
            _ => panic!("expected AppendEntries"),
        }
    }
}
