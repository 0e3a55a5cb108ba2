use std::collections::HashSet;

use crate::types::{ChatBody, TranscriptEntry};

type EntryKey = (i64, String, ChatBody);

/// In-memory chat transcript with bounded retention.
///
/// The same record can arrive both as a push and inside a history response;
/// it is kept once.
#[derive(Debug, Clone)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    seen: HashSet<EntryKey>,
    max_items: usize,
}

impl Transcript {
    /// Create a transcript with an item cap (`max_items >= 1`).
    pub fn new(max_items: usize) -> Self {
        Self {
            entries: Vec::new(),
            seen: HashSet::new(),
            max_items: max_items.max(1),
        }
    }

    /// Current entries in display order.
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append `entry` unless it is already present. Returns whether it was added.
    pub fn append(&mut self, entry: TranscriptEntry) -> bool {
        if !self.seen.insert(key_of(&entry)) {
            return false;
        }
        self.entries.push(entry);
        self.trim_to_max();
        true
    }

    fn trim_to_max(&mut self) {
        if self.entries.len() <= self.max_items {
            return;
        }

        let excess = self.entries.len() - self.max_items;
        for dropped in self.entries.drain(0..excess) {
            self.seen.remove(&key_of(&dropped));
        }
    }
}

fn key_of(entry: &TranscriptEntry) -> EntryKey {
    (entry.timestamp, entry.name.clone(), entry.body.clone())
}
