//! Captured program output: a bounded ring of log lines with a drop counter

use schema::LogStream;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One line of output captured from a supervised program
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Sequence number assigned by the ring
    pub seq: u64,
    /// Stream the line was read from
    pub stream: LogStream,
    /// Line content without the trailing newline
    pub content: String,
    /// RFC3339 capture time
    pub timestamp: String,
}

impl LogEntry {
    /// Create an entry stamped with the current time; the ring assigns `seq`
    pub fn new(stream: LogStream, content: impl Into<String>) -> Self {
        Self {
            seq: 0,
            stream,
            content: content.into(),
            timestamp: schema::current_timestamp(),
        }
    }
}

/// Bounded store of the most recent lines for one program.
///
/// Once full, the oldest line is evicted for every new one and counted in
/// `total_dropped`. Sequence numbers keep increasing across evictions.
#[derive(Debug)]
pub struct LogRing {
    capacity: usize,
    total_dropped: u64,
    next_seq: u64,
    entries: VecDeque<LogEntry>,
}

impl LogRing {
    /// Create a ring holding at most `capacity` lines (clamped to at least 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            total_dropped: 0,
            next_seq: 0,
            entries: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Append a line, evicting the oldest one if the ring is full
    pub fn push(&mut self, mut entry: LogEntry) {
        entry.seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.total_dropped = self.total_dropped.saturating_add(1);
        }
        self.entries.push_back(entry);
    }

    /// Number of lines retained
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is retained
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lines evicted so far
    pub fn total_dropped(&self) -> u64 {
        self.total_dropped
    }

    /// The sequence number the next line will get
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Copy of all retained lines, oldest first, with the next sequence number
    pub fn snapshot(&self) -> (u64, Vec<LogEntry>) {
        (self.next_seq, self.entries.iter().cloned().collect())
    }

    /// Retained lines with `seq` strictly greater than `after_seq`
    pub fn iter_after(&self, after_seq: u64) -> Vec<LogEntry> {
        self.entries
            .iter()
            .filter(|e| e.seq > after_seq)
            .cloned()
            .collect()
    }

    /// The last `n` retained lines, oldest first
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }
}
