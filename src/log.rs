//! Request log.
//!
//! Entries are kept in arrival order (sequence numbers are taken when a
//! request arrives, not when it completes) and the oldest are dropped once
//! the configured capacity is exceeded.

use crate::matcher::RequestHistory;
use crate::request::RequestMessage;
use crate::resolver::MatcherScore;
use crate::response::ResponseMessage;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// One served request.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub request: Arc<RequestMessage>,
    /// Absent when response generation failed
    pub response: Option<ResponseMessage>,
    pub mapping_id: Option<Uuid>,
    /// Scores of the matched mapping, or of the closest miss
    pub scores: Vec<MatcherScore>,
}

/// Bounded, append-only request history.
#[derive(Debug)]
pub struct RequestLog {
    entries: RwLock<VecDeque<Arc<LogEntry>>>,
    next_sequence: AtomicU64,
    /// 0 means unbounded
    max_entries: usize,
}

impl RequestLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            next_sequence: AtomicU64::new(0),
            max_entries,
        }
    }

    /// Take the sequence number for a newly arrived request.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Insert an entry at its sequence position.
    pub fn append(&self, entry: LogEntry) -> Arc<LogEntry> {
        let entry = Arc::new(entry);
        let mut entries = self.entries.write();

        let position = entries
            .iter()
            .rposition(|e| e.sequence < entry.sequence)
            .map_or(0, |idx| idx + 1);
        entries.insert(position, Arc::clone(&entry));

        if self.max_entries > 0 {
            while entries.len() > self.max_entries {
                if let Some(evicted) = entries.pop_front() {
                    debug!(id = %evicted.id, sequence = evicted.sequence, "Evicted log entry");
                }
            }
        }
        entry
    }

    /// All entries in arrival order.
    pub fn entries(&self) -> Vec<Arc<LogEntry>> {
        self.entries.read().iter().cloned().collect()
    }

    pub fn find(&self, id: &Uuid) -> Option<Arc<LogEntry>> {
        self.entries.read().iter().rev().find(|e| e.id == *id).cloned()
    }

    /// Entries served by a mapping.
    pub fn for_mapping(&self, mapping_id: &Uuid) -> Vec<Arc<LogEntry>> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.mapping_id.as_ref() == Some(mapping_id))
            .cloned()
            .collect()
    }

    /// Entries no mapping matched.
    pub fn unmatched(&self) -> Vec<Arc<LogEntry>> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.mapping_id.is_none())
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl RequestHistory for RequestLog {
    fn matched_mapping(&self, entry_id: &Uuid, excluded_prefix: &str, as_of: u64) -> Option<Uuid> {
        self.entries
            .read()
            .iter()
            .rev()
            .filter(|e| e.sequence < as_of)
            .filter(|e| !e.request.path().starts_with(excluded_prefix))
            .find(|e| e.id == *entry_id)
            .and_then(|e| e.mapping_id)
    }
}
