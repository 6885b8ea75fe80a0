//! # Archive
//!
//! Module dedicated to the archive storage engine. The main structure
//! of this module is [`Archive`]: one append-only [`ArchiveLog`] and
//! its derived [`ArchiveIndex`], guarded together by a single lock.
//!
//! The log cursor and the index are not independently safe under
//! interleaving, so every lookup, read and append holds the lock for
//! its whole duration. Serializing and encoding records (hashing,
//! compression) happens before the lock is taken.

pub mod codec;
mod error;
pub mod header;
mod index;
mod log;
mod record;

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info};

#[doc(inline)]
pub use self::{
    error::{Error, Result},
    header::FileHeader,
    index::ArchiveIndex,
    log::ArchiveLog,
    record::{EncodedRecord, Features, LabelsEntry, MessageRecord, Record, RecordKind},
};

/// The archive.
///
/// Opening an archive replays its whole log to build the index. From
/// then on, lookups are served by the index and the file is only
/// read again by explicit sequential iteration.
#[derive(Debug)]
pub struct Archive {
    path: PathBuf,
    state: Mutex<ArchiveState>,
}

#[derive(Debug)]
struct ArchiveState {
    log: ArchiveLog,
    index: ArchiveIndex,
}

impl Archive {
    /// Open the archive at the given path, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let log = ArchiveLog::open(&path)?;
        Self::replay(path, log)
    }

    /// Open the existing archive at the given path for reading only.
    ///
    /// Lookups, iteration and [`Archive::validate`] work as usual,
    /// every write fails with [`Error::ReadOnlyArchiveError`].
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let log = ArchiveLog::open_read_only(&path)?;
        Self::replay(path, log)
    }

    fn replay(path: PathBuf, mut log: ArchiveLog) -> Result<Self> {
        let mut index = ArchiveIndex::default();

        let mut records = 0;
        while let Some(record) = log.read_next(None)? {
            index.apply(&record);
            records += 1;
        }
        log.rewind();

        info!(
            ?path,
            records,
            messages = index.count(),
            read_only = log.is_read_only(),
            "archive opened"
        );

        Ok(Self {
            path,
            state: Mutex::new(ArchiveState { log, index }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> FileHeader {
        *self.state.lock().log.header()
    }

    /// A copy of the current index.
    pub fn index(&self) -> ArchiveIndex {
        self.state.lock().index.clone()
    }

    pub fn has(&self, id: i64) -> bool {
        self.state.lock().index.has(id)
    }

    pub fn is_deleted(&self, id: i64) -> bool {
        self.state.lock().index.is_deleted(id)
    }

    pub fn labels_of(&self, id: i64) -> Vec<String> {
        self.state.lock().index.labels_of(id).to_vec()
    }

    /// Replace the labels of the given message in memory. Nothing is
    /// written until [`Archive::flush_labels`].
    pub fn set_labels(&self, id: i64, labels: Vec<String>) {
        self.state.lock().index.set_labels(id, labels)
    }

    /// The number of known, non-deleted messages.
    pub fn count(&self) -> usize {
        self.state.lock().index.count()
    }

    /// Append a message record.
    ///
    /// The message becomes known to the index as part of the same
    /// locked operation, once the record is durably written. Fails
    /// with [`Error::DuplicateMessageError`] if the identifier is
    /// already known.
    pub fn append_message(&self, id: i64, data: Vec<u8>) -> Result<()> {
        if self.has(id) {
            return Err(Error::DuplicateMessageError(id));
        }

        let record = Record::Message(MessageRecord {
            message_id: id,
            data,
        })
        .encode()?;

        let mut state = self.state.lock();
        if state.index.has(id) {
            return Err(Error::DuplicateMessageError(id));
        }
        let offset = state.log.append(&record)?;
        state.index.insert_message(id);
        debug!(id, offset, "message archived");

        Ok(())
    }

    /// Write all dirty labels as one labels record.
    ///
    /// Returns the number of entries written. Nothing is appended
    /// when no label changed.
    pub fn flush_labels(&self) -> Result<usize> {
        let mut state = self.state.lock();
        if !state.index.has_dirty_labels() {
            return Ok(0);
        }

        let record = Record::Labels(state.index.take_dirty());
        let written = record.encode().and_then(|encoded| state.log.append(&encoded));

        let Record::Labels(entries) = &record else {
            return Ok(0);
        };

        match written {
            Ok(offset) => {
                debug!(offset, entries = entries.len(), "labels flushed");
                Ok(entries.len())
            }
            Err(err) => {
                state.index.restore_dirty(entries);
                Err(err)
            }
        }
    }

    /// Logically delete the given messages.
    pub fn delete(&self, ids: Vec<i64>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let record = Record::Delete(ids);
        let encoded = record.encode()?;

        let mut state = self.state.lock();
        let offset = state.log.append(&encoded)?;
        if let Record::Delete(ids) = &record {
            state.index.insert_deleted(ids);
            debug!(offset, ids = ids.len(), "messages deleted");
        }

        Ok(())
    }

    /// Restate all known identifiers in a snapshot record and point
    /// the file header at it. Returns the offset of the snapshot.
    pub fn write_snapshot(&self) -> Result<u64> {
        let mut state = self.state.lock();

        let mut ids: Vec<i64> = state.index.known_ids().collect();
        ids.sort_unstable();
        let len = ids.len();

        let record = Record::Snapshot(ids).encode()?;
        let offset = state.log.append(&record)?;
        state.log.set_have_ptr(offset)?;
        debug!(offset, ids = len, "snapshot written");

        Ok(offset)
    }

    /// Move the read cursor back to the first record.
    pub fn rewind(&self) {
        self.state.lock().log.rewind()
    }

    /// Read the next record of the given kind, any kind if `None`.
    pub fn read_next(&self, filter: Option<RecordKind>) -> Result<Option<Record>> {
        self.state.lock().log.read_next(filter)
    }

    /// Read the next message record.
    pub fn next_message(&self) -> Result<Option<MessageRecord>> {
        match self.read_next(Some(RecordKind::Message))? {
            Some(Record::Message(msg)) => Ok(Some(msg)),
            _ => Ok(None),
        }
    }

    /// Decode every record of the log, checking all content hashes.
    ///
    /// Returns the number of message records. The read cursor is
    /// rewound afterwards.
    pub fn validate(&self) -> Result<usize> {
        let mut state = self.state.lock();
        state.log.rewind();

        let mut messages = 0;
        let res = loop {
            match state.log.read_next(None) {
                Ok(Some(Record::Message(_))) => messages += 1,
                Ok(Some(_)) => (),
                Ok(None) => break Ok(messages),
                Err(err) => break Err(err),
            }
        };

        state.log.rewind();
        res
    }
}
