use std::{any::Any, io, path::PathBuf, result};

use thiserror::Error;

use crate::{AnyBoxedError, AnyError};

use super::RecordKind;

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
///
/// Format errors mean the file cannot be trusted to be an archive at
/// all, integrity errors mean a record does not match its content
/// hash. Neither is ever recovered automatically.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot open archive at {1}")]
    OpenArchiveError(#[source] io::Error, PathBuf),
    #[error("cannot get metadata of archive at {1}")]
    GetArchiveMetadataError(#[source] io::Error, PathBuf),
    #[error("cannot read header of archive at {1}")]
    ReadHeaderError(#[source] io::Error, PathBuf),
    #[error("cannot write header of archive at {1}")]
    WriteHeaderError(#[source] io::Error, PathBuf),
    #[error("cannot sync archive at {1} to disk")]
    SyncArchiveError(#[source] io::Error, PathBuf),
    #[error("cannot truncate archive at {1} to {2} bytes")]
    TruncateArchiveError(#[source] io::Error, PathBuf, u64),
    #[error("cannot read record at offset {1}")]
    ReadRecordError(#[source] io::Error, u64),
    #[error("cannot write record at offset {1}")]
    WriteRecordError(#[source] io::Error, u64),
    #[error("cannot write to archive at {0}: archive is opened read-only")]
    ReadOnlyArchiveError(PathBuf),

    // format
    #[error("cannot open archive at {1}: file too short for a header ({0} bytes)")]
    TruncatedHeaderError(u64, PathBuf),
    #[error("cannot open archive at {1}: invalid magic {0:#010x}")]
    InvalidMagicError(u32, PathBuf),
    #[error("cannot open archive at {1}: unsupported version {0}")]
    UnsupportedVersionError(u8, PathBuf),
    #[error("cannot read record at offset {1}: unknown record type {0}")]
    UnknownRecordTypeError(u16, u64),
    #[error("cannot read record at offset {1}: unknown feature bits {0:#06x}")]
    UnknownFeatureBitsError(u16, u64),
    #[error("cannot serialize {1} record payload")]
    SerializePayloadError(#[source] bincode::Error, RecordKind),
    #[error("cannot deserialize {1} record payload")]
    DeserializePayloadError(#[source] bincode::Error, RecordKind),
    #[error("cannot write record: payload of {0} bytes is too large")]
    RecordTooLargeError(usize),

    // codec
    #[error("cannot compress record payload")]
    CompressPayloadError(#[source] io::Error),
    #[error("cannot decompress record payload")]
    DecompressPayloadError(#[source] io::Error),
    #[error("cannot decode hashed record: {0} bytes is shorter than its hash")]
    MissingHashError(usize),
    #[error("cannot decode record: content hash mismatch (expected {expected}, got {actual})")]
    IntegrityError { expected: String, actual: String },

    #[error("cannot write message {0}: message already archived")]
    DuplicateMessageError(i64),
}

impl Error {
    /// Return `true` if the error means the file is not a readable
    /// archive (bad header, unknown record type, bad payload).
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::TruncatedHeaderError(..)
                | Self::InvalidMagicError(..)
                | Self::UnsupportedVersionError(..)
                | Self::UnknownRecordTypeError(..)
                | Self::UnknownFeatureBitsError(..)
                | Self::DeserializePayloadError(..)
        )
    }

    /// Return `true` if a record did not match its content hash.
    pub fn is_integrity_error(&self) -> bool {
        matches!(self, Self::IntegrityError { .. })
    }
}

impl AnyError for Error {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl From<Error> for AnyBoxedError {
    fn from(err: Error) -> Self {
        Box::new(err)
    }
}
