//! The replicated log and its entries.

use crate::types::{Term, WireIndex};
use serde::{Deserialize, Serialize};

/// A single key→value binding to be applied on commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub key: String,
    pub value: String,
}

/// An ordered, 0-indexed log entry: a command paired with the term of the
/// leader that created it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub command: Command,
    pub term: Term,
}

/// The replicated log. Entries are never overwritten or deleted by a
/// leader; a follower truncates its suffix only on a matching
/// prior-index/term reconciliation.
#[derive(Clone, Debug, Default)]
pub struct Log {
    entries: Vec<LogEntry>,
}

impl Log {
    pub fn new() -> Self {
        Log { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the last entry, or `-1` if the log is empty (wire form).
    pub fn last_index(&self) -> WireIndex {
        self.entries.len() as WireIndex - 1
    }

    /// Term of the last entry. The "heartbeat, empty log" wire case uses
    /// term 1 as a placeholder prevLogTerm; callers that need that
    /// convention apply it explicitly rather than baking it in here.
    pub fn last_term(&self) -> Option<Term> {
        self.entries.last().map(|e| e.term)
    }

    pub fn get(&self, index: usize) -> Option<&LogEntry> {
        self.entries.get(index)
    }

    pub fn term_at(&self, index: usize) -> Option<Term> {
        self.entries.get(index).map(|e| e.term)
    }

    pub fn append(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// Replace everything from `index` onward with `tail`. Only called
    /// after a matching prevLogIndex/prevLogTerm reconciliation, or on
    /// wholesale log adoption by an empty follower.
    pub fn splice_from(&mut self, index: usize, tail: Vec<LogEntry>) {
        self.entries.truncate(index);
        self.entries.extend(tail);
    }

    pub fn replace_all(&mut self, entries: Vec<LogEntry>) {
        self.entries = entries;
    }

    /// The slice `[from..]`, cloned for wire transmission.
    pub fn tail_from(&self, from: usize) -> Vec<LogEntry> {
        if from >= self.entries.len() {
            Vec::new()
        } else {
            self.entries[from..].to_vec()
        }
    }

    pub fn as_slice(&self) -> &[LogEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(term: Term, key: &str) -> LogEntry {
        LogEntry {
            command: Command {
                key: key.to_string(),
                value: "v".to_string(),
            },
            term,
        }
    }

    #[test]
    fn empty_log_reports_sentinel_last_index() {
        let log = Log::new();
        assert_eq!(log.last_index(), -1);
        assert_eq!(log.last_term(), None);
    }

    #[test]
    fn append_and_tail() {
        let mut log = Log::new();
        log.append(entry(1, "a"));
        log.append(entry(1, "b"));
        assert_eq!(log.len(), 2);
        assert_eq!(log.tail_from(1).len(), 1);
        assert_eq!(log.tail_from(5).len(), 0);
    }

    #[test]
    fn splice_from_truncates_and_extends() {
        let mut log = Log::new();
        log.append(entry(1, "a"));
        log.append(entry(1, "b"));
        log.append(entry(1, "c"));
        log.splice_from(1, vec![entry(2, "x")]);
        assert_eq!(log.len(), 2);
        assert_eq!(log.get(1).unwrap().command.key, "x");
        assert_eq!(log.get(1).unwrap().term, 2);
    }
}
