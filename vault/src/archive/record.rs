//! # Record
//!
//! Module dedicated to archive records: their type tag, their
//! feature bits and their decoded payloads.

use std::{fmt, ops::BitOr};

use serde::{Deserialize, Serialize};

use super::{codec, Error, Result};

/// The type tag of a record, as stored in its header.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u16)]
pub enum RecordKind {
    Message = 1,
    Labels = 2,
    Delete = 3,
    Snapshot = 4,
}

impl RecordKind {
    pub fn from_u16(kind: u16) -> Option<Self> {
        match kind {
            1 => Some(Self::Message),
            2 => Some(Self::Labels),
            3 => Some(Self::Delete),
            4 => Some(Self::Snapshot),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message => write!(f, "message"),
            Self::Labels => write!(f, "labels"),
            Self::Delete => write!(f, "delete"),
            Self::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// The feature bits of a record.
///
/// Bit 0 means the payload is compressed, bit 1 means it is prefixed
/// with the hash of its uncompressed form. Both can combine.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Features(u16);

impl Features {
    pub const NONE: Self = Self(0);
    pub const COMPRESSED: Self = Self(1 << 0);
    pub const HASHED: Self = Self(1 << 1);

    const ALL: u16 = Self::COMPRESSED.0 | Self::HASHED.0;

    /// Parse feature bits, rejecting any bit this version does not
    /// know about.
    pub fn from_bits(bits: u16) -> Option<Self> {
        if bits & !Self::ALL == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_compressed(self) -> bool {
        self.contains(Self::COMPRESSED)
    }

    pub fn is_hashed(self) -> bool {
        self.contains(Self::HASHED)
    }
}

impl BitOr for Features {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// The message record payload.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: i64,
    pub data: Vec<u8>,
}

/// One label assignment of a labels record.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LabelsEntry {
    pub message_id: i64,
    pub labels: Vec<String>,
}

/// A decoded archive record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Record {
    /// The raw message for the given identifier.
    Message(MessageRecord),

    /// A batch of label sets. Each entry fully replaces the labels
    /// previously known for its message.
    Labels(Vec<LabelsEntry>),

    /// Identifiers logically deleted from the archive.
    Delete(Vec<i64>),

    /// The whole set of known identifiers at this point of the log.
    Snapshot(Vec<i64>),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Message(_) => RecordKind::Message,
            Self::Labels(_) => RecordKind::Labels,
            Self::Delete(_) => RecordKind::Delete,
            Self::Snapshot(_) => RecordKind::Snapshot,
        }
    }

    /// The features a record of this kind is written with.
    ///
    /// Labels are only compressed: they are mutable metadata written
    /// once per scanned window, and a later batch supersedes them
    /// anyway. Everything else carries a content hash.
    pub fn features(&self) -> Features {
        match self {
            Self::Labels(_) => Features::COMPRESSED,
            Self::Message(_) | Self::Delete(_) | Self::Snapshot(_) => {
                Features::HASHED | Features::COMPRESSED
            }
        }
    }

    /// Serialize the record into its uncompressed, unhashed payload.
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        let kind = self.kind();
        let payload = match self {
            Self::Message(msg) => bincode::serialize(msg),
            Self::Labels(entries) => bincode::serialize(entries),
            Self::Delete(ids) | Self::Snapshot(ids) => bincode::serialize(ids),
        };
        payload.map_err(|err| Error::SerializePayloadError(err, kind))
    }

    /// Deserialize a payload previously produced by
    /// [`Record::to_payload`].
    pub fn from_payload(kind: RecordKind, payload: &[u8]) -> Result<Self> {
        let map_err = |err| Error::DeserializePayloadError(err, kind);
        let record = match kind {
            RecordKind::Message => Self::Message(bincode::deserialize(payload).map_err(map_err)?),
            RecordKind::Labels => Self::Labels(bincode::deserialize(payload).map_err(map_err)?),
            RecordKind::Delete => Self::Delete(bincode::deserialize(payload).map_err(map_err)?),
            RecordKind::Snapshot => {
                Self::Snapshot(bincode::deserialize(payload).map_err(map_err)?)
            }
        };
        Ok(record)
    }

    /// Serialize then encode the record, ready to be appended.
    ///
    /// This is the CPU-bound part of an append (hashing and
    /// compression), and it does not need the archive lock.
    pub fn encode(&self) -> Result<EncodedRecord> {
        let features = self.features();
        let stored = codec::encode(&self.to_payload()?, features)?;
        Ok(EncodedRecord {
            kind: self.kind(),
            features,
            stored,
        })
    }
}

/// A record as stored on disk, minus its header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EncodedRecord {
    pub kind: RecordKind,
    pub features: Features,
    pub stored: Vec<u8>,
}
