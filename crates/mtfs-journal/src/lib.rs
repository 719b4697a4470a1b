#![forbid(unsafe_code)]
//! Append-only journal of metadata mutations.
//!
//! Every mutating coordinator operation appends an entry before the host
//! filesystem is touched. Entries carry a monotonic sequence number, the
//! operation kind, a timestamp, the affected block list, and an opaque
//! payload. `begin`/`commit`/`rollback` are informational transaction
//! brackets: entries are never undone physically, and recovery is a replay
//! decision left to the coordinator. `checkpoint` truncates the log at the
//! current sequence.

use mtfs_store::BlockId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Kind of metadata mutation an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalEntryKind {
    CreateFile,
    DeleteFile,
    WriteData,
    CreateDir,
    DeleteDir,
    UpdateMetadata,
}

/// One journal record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Monotonic, 1-based sequence number.
    pub sequence: u64,
    pub kind: JournalEntryKind,
    /// Seconds since the Unix epoch at append time.
    pub timestamp: u64,
    /// Blocks touched by the operation, if any.
    pub blocks: Vec<BlockId>,
    /// Opaque payload (typically the affected path).
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct JournalState {
    entries: Vec<JournalEntry>,
    sequence: u64,
    in_transaction: bool,
}

/// Append-only journal with informational transaction brackets.
#[derive(Debug, Default)]
pub struct Journal {
    state: Mutex<JournalState>,
}

impl Journal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; returns its sequence number.
    pub fn append(&self, kind: JournalEntryKind, blocks: Vec<BlockId>, payload: Vec<u8>) -> u64 {
        let mut state = self.state.lock();
        state.sequence += 1;
        let sequence = state.sequence;
        state.entries.push(JournalEntry {
            sequence,
            kind,
            timestamp: unix_now(),
            blocks,
            payload,
        });
        debug!(sequence, ?kind, "journal entry appended");
        sequence
    }

    /// Append a free-form operation note as an `UpdateMetadata` entry.
    pub fn log_operation(&self, operation: &str) -> u64 {
        self.append(
            JournalEntryKind::UpdateMetadata,
            Vec::new(),
            operation.as_bytes().to_vec(),
        )
    }

    /// Open an informational transaction bracket.
    pub fn begin_transaction(&self) {
        self.state.lock().in_transaction = true;
        debug!("transaction began");
    }

    /// Close the bracket. No-op outside a transaction.
    pub fn commit_transaction(&self) {
        let mut state = self.state.lock();
        if state.in_transaction {
            state.in_transaction = false;
            debug!("transaction committed");
        }
    }

    /// Abandon the bracket. Entries already appended stay; replay policy
    /// is the coordinator's call.
    pub fn rollback_transaction(&self) {
        let mut state = self.state.lock();
        if state.in_transaction {
            state.in_transaction = false;
            debug!("transaction rolled back");
        }
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.state.lock().in_transaction
    }

    /// Whether entries exist while a transaction bracket is still open —
    /// the startup signal that a replay decision is needed.
    #[must_use]
    pub fn needs_recovery(&self) -> bool {
        let state = self.state.lock();
        state.in_transaction && !state.entries.is_empty()
    }

    /// Clear the open-transaction flag after the coordinator has made its
    /// replay decision.
    pub fn recover(&self) {
        let mut state = self.state.lock();
        state.in_transaction = false;
        info!(entries = state.entries.len(), "journal recovery completed");
    }

    /// Entries with `from <= sequence <= to`.
    #[must_use]
    pub fn entries_in_range(&self, from: u64, to: u64) -> Vec<JournalEntry> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|e| e.sequence >= from && e.sequence <= to)
            .cloned()
            .collect()
    }

    /// Truncate the log at the current sequence. The sequence counter
    /// keeps counting; only the entries go.
    pub fn checkpoint(&self) {
        let mut state = self.state.lock();
        let dropped = state.entries.len();
        state.entries.clear();
        info!(dropped, sequence = state.sequence, "journal checkpoint");
    }

    /// Drop everything and restart the sequence at zero.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.sequence = 0;
        state.in_transaction = false;
        info!("journal cleared");
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.state.lock().sequence
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let journal = Journal::new();
        let a = journal.append(JournalEntryKind::CreateFile, vec![], b"a.txt".to_vec());
        let b = journal.append(JournalEntryKind::WriteData, vec![BlockId(3)], vec![]);
        let c = journal.log_operation("chmod a.txt");
        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(journal.last_sequence(), 3);
        assert_eq!(journal.len(), 3);
    }

    #[test]
    fn range_query_is_inclusive() {
        let journal = Journal::new();
        for i in 0..5 {
            let _ = journal.append(JournalEntryKind::WriteData, vec![], vec![i]);
        }
        let mid = journal.entries_in_range(2, 4);
        assert_eq!(mid.len(), 3);
        assert_eq!(mid[0].sequence, 2);
        assert_eq!(mid[2].sequence, 4);
    }

    #[test]
    fn needs_recovery_requires_open_bracket_and_entries() {
        let journal = Journal::new();
        assert!(!journal.needs_recovery());

        journal.begin_transaction();
        assert!(!journal.needs_recovery()); // bracket open but empty

        let _ = journal.append(JournalEntryKind::DeleteFile, vec![], b"x".to_vec());
        assert!(journal.needs_recovery());

        journal.recover();
        assert!(!journal.needs_recovery());
        assert_eq!(journal.len(), 1); // entries survive recovery
    }

    #[test]
    fn commit_and_rollback_close_the_bracket() {
        let journal = Journal::new();
        journal.begin_transaction();
        journal.commit_transaction();
        assert!(!journal.in_transaction());

        journal.begin_transaction();
        journal.rollback_transaction();
        assert!(!journal.in_transaction());

        // Closing an unopened bracket is a no-op.
        journal.commit_transaction();
        journal.rollback_transaction();
    }

    #[test]
    fn checkpoint_truncates_but_keeps_sequence() {
        let journal = Journal::new();
        for _ in 0..4 {
            let _ = journal.log_operation("op");
        }
        journal.checkpoint();
        assert!(journal.is_empty());
        assert_eq!(journal.last_sequence(), 4);
        let next = journal.log_operation("after checkpoint");
        assert_eq!(next, 5);
    }

    #[test]
    fn clear_restarts_the_sequence() {
        let journal = Journal::new();
        let _ = journal.log_operation("op");
        journal.clear();
        assert!(journal.is_empty());
        assert_eq!(journal.last_sequence(), 0);
        assert_eq!(journal.log_operation("fresh"), 1);
    }

    #[test]
    fn entries_carry_blocks_and_payload() {
        let journal = Journal::new();
        let _ = journal.append(
            JournalEntryKind::WriteData,
            vec![BlockId(1), BlockId(7)],
            b"data/notes.txt".to_vec(),
        );
        let entries = journal.entries_in_range(1, 1);
        assert_eq!(entries[0].blocks, vec![BlockId(1), BlockId(7)]);
        assert_eq!(entries[0].payload, b"data/notes.txt");
        assert_eq!(entries[0].kind, JournalEntryKind::WriteData);
    }
}
