//! # Archive index
//!
//! In-memory state derived from the log. It is never persisted:
//! replaying the same log always yields the same index.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::warn;

use super::{LabelsEntry, Record};

/// The archive index.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ArchiveIndex {
    /// Identifiers having a message record.
    known: HashSet<i64>,

    /// Identifiers tombstoned by a delete record.
    deleted: HashSet<i64>,

    /// The authoritative label list of each identifier.
    labels: HashMap<i64, Vec<String>>,

    /// Identifiers whose labels changed since the last flush.
    dirty: BTreeSet<i64>,
}

impl ArchiveIndex {
    /// Apply a replayed record.
    pub fn apply(&mut self, record: &Record) {
        match record {
            Record::Message(msg) => {
                if !self.known.insert(msg.message_id) {
                    warn!(id = msg.message_id, "archive holds a duplicate message record");
                }
            }
            Record::Labels(entries) => {
                for entry in entries {
                    self.labels.insert(entry.message_id, entry.labels.clone());
                }
            }
            Record::Delete(ids) => {
                self.deleted.extend(ids);
            }
            Record::Snapshot(ids) => {
                self.known.extend(ids);
            }
        }
    }

    /// Return `true` if a message record exists for the given
    /// identifier, deleted or not.
    pub fn has(&self, id: i64) -> bool {
        self.known.contains(&id)
    }

    pub fn is_deleted(&self, id: i64) -> bool {
        self.deleted.contains(&id)
    }

    /// The labels of the given identifier, empty if unseen.
    pub fn labels_of(&self, id: i64) -> &[String] {
        self.labels.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Replace the labels of the given identifier and mark it dirty.
    pub fn set_labels(&mut self, id: i64, labels: Vec<String>) {
        self.labels.insert(id, labels);
        self.dirty.insert(id);
    }

    /// The number of known, non-deleted messages.
    pub fn count(&self) -> usize {
        let deleted = self
            .deleted
            .iter()
            .filter(|id| self.known.contains(id))
            .count();
        self.known.len() - deleted
    }

    /// Known identifiers, in no particular order.
    pub fn known_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.known.iter().copied()
    }

    pub fn has_dirty_labels(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub(crate) fn insert_message(&mut self, id: i64) {
        self.known.insert(id);
    }

    pub(crate) fn insert_deleted(&mut self, ids: &[i64]) {
        self.deleted.extend(ids);
    }

    /// Drain dirty identifiers into labels entries, ordered by
    /// identifier.
    pub(crate) fn take_dirty(&mut self) -> Vec<LabelsEntry> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .map(|id| LabelsEntry {
                message_id: id,
                labels: self.labels_of(id).to_vec(),
            })
            .collect()
    }

    /// Put back entries whose flush failed.
    pub(crate) fn restore_dirty(&mut self, entries: &[LabelsEntry]) {
        self.dirty
            .extend(entries.iter().map(|entry| entry.message_id));
    }
}
