//! # Archive log
//!
//! The append-only file abstraction. The log tracks two explicit
//! positions over one file handle: the read cursor, used by
//! sequential iteration, and the logical end, targeted by every
//! append. Moving one never moves the other.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use tracing::{debug, trace, warn};

use super::{
    codec,
    header::{FileHeader, RecordHeader, FILE_HEADER_LEN, MAGIC, RECORD_HEADER_LEN, VERSION},
    EncodedRecord, Error, Features, Record, RecordKind, Result,
};

/// The append-only archive log.
#[derive(Debug)]
pub struct ArchiveLog {
    path: PathBuf,
    file: File,
    header: FileHeader,
    read_only: bool,

    /// Where the next sequential read starts.
    read_offset: u64,

    /// Where the next append lands. Everything before it is made of
    /// complete records.
    end_offset: u64,
}

impl ArchiveLog {
    /// Open the log at the given path, creating it if needed.
    ///
    /// An existing log gets its header validated, then its record
    /// headers walked to find the logical end. A record whose
    /// declared length runs past the end of the file is the remains
    /// of an interrupted append: it is cut off and the file is
    /// shrunk accordingly.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| Error::OpenArchiveError(err, path.clone()))?;

        let len = file
            .metadata()
            .map_err(|err| Error::GetArchiveMetadataError(err, path.clone()))?
            .len();

        let header = if len == 0 {
            debug!(?path, "creating new archive");
            let header = FileHeader::new();
            file.write_all(&header.to_bytes())
                .map_err(|err| Error::WriteHeaderError(err, path.clone()))?;
            file.sync_all()
                .map_err(|err| Error::SyncArchiveError(err, path.clone()))?;
            header
        } else {
            read_file_header(&mut file, len, &path)?
        };

        let mut log = Self {
            path,
            file,
            header,
            read_only: false,
            read_offset: FILE_HEADER_LEN,
            end_offset: len.max(FILE_HEADER_LEN),
        };

        log.recover_end(len)?;

        Ok(log)
    }

    /// Open the existing log at the given path for reading only.
    ///
    /// A truncated tail is ignored rather than cut off, and every
    /// append fails with [`Error::ReadOnlyArchiveError`].
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();

        let mut file = File::open(&path).map_err(|err| Error::OpenArchiveError(err, path.clone()))?;

        let len = file
            .metadata()
            .map_err(|err| Error::GetArchiveMetadataError(err, path.clone()))?
            .len();

        let header = read_file_header(&mut file, len, &path)?;

        let mut log = Self {
            path,
            file,
            header,
            read_only: true,
            read_offset: FILE_HEADER_LEN,
            end_offset: len,
        };

        log.recover_end(len)?;

        Ok(log)
    }

    /// Walk the record headers and cut off a truncated tail.
    fn recover_end(&mut self, len: u64) -> Result<()> {
        let mut offset = FILE_HEADER_LEN;

        while offset + RECORD_HEADER_LEN <= len {
            let header = self.read_record_header(offset)?;
            let next = header.next_offset(offset);
            if next > len {
                break;
            }
            offset = next;
        }

        if offset < len && self.read_only {
            warn!(
                path = ?self.path,
                offset,
                ignored = len - offset,
                "ignoring truncated tail record of read-only archive"
            );
        } else if offset < len {
            warn!(
                path = ?self.path,
                offset,
                discarded = len - offset,
                "discarding truncated tail record"
            );
            self.file
                .set_len(offset)
                .map_err(|err| Error::TruncateArchiveError(err, self.path.clone(), offset))?;
            self.sync()?;
        }

        self.end_offset = offset;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The logical end of the log, where the next record goes.
    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    /// The offset of the next sequential read.
    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    /// Move the read cursor back right after the file header.
    pub fn rewind(&mut self) {
        self.read_offset = FILE_HEADER_LEN;
    }

    fn read_record_header(&mut self, offset: u64) -> Result<RecordHeader> {
        let mut bytes = [0; RECORD_HEADER_LEN as usize];
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(&mut bytes))
            .map_err(|err| Error::ReadRecordError(err, offset))?;
        Ok(RecordHeader::from_bytes(&bytes))
    }

    /// Read the next record matching the given kind, any kind if
    /// `None`.
    ///
    /// Records of other kinds are skipped without reading their
    /// payload. Returns `None` at the end of the log.
    pub fn read_next(&mut self, filter: Option<RecordKind>) -> Result<Option<Record>> {
        loop {
            let offset = self.read_offset;
            if offset + RECORD_HEADER_LEN > self.end_offset {
                return Ok(None);
            }

            let header = self.read_record_header(offset)?;
            let kind = RecordKind::from_u16(header.kind)
                .ok_or(Error::UnknownRecordTypeError(header.kind, offset))?;
            let features = Features::from_bits(header.features)
                .ok_or(Error::UnknownFeatureBitsError(header.features, offset))?;
            let next = header.next_offset(offset);

            if filter.is_some_and(|filter| filter != kind) {
                trace!(offset, %kind, "skipping record");
                self.read_offset = next;
                continue;
            }

            let mut stored = vec![0; header.length as usize];
            self.file
                .read_exact(&mut stored)
                .map_err(|err| Error::ReadRecordError(err, offset))?;
            self.read_offset = next;

            let payload = codec::decode(&stored, features).map_err(|err| {
                warn!(offset, %kind, "cannot decode record: {err}");
                err
            })?;

            trace!(offset, %kind, len = payload.len(), "read record");
            return Record::from_payload(kind, &payload).map(Some);
        }
    }

    /// Append an encoded record at the logical end of the log.
    ///
    /// The record header, the payload and the refreshed file header
    /// are flushed to disk before returning. On failure the file is
    /// cut back to its previous end and its previous header. Returns
    /// the offset of the new record.
    pub fn append(&mut self, record: &EncodedRecord) -> Result<u64> {
        if self.read_only {
            return Err(Error::ReadOnlyArchiveError(self.path.clone()));
        }

        let length = u32::try_from(record.stored.len())
            .map_err(|_| Error::RecordTooLargeError(record.stored.len()))?;
        let header = RecordHeader {
            kind: record.kind.as_u16(),
            features: record.features.bits(),
            length,
        };

        let offset = self.end_offset;
        let mut bytes = Vec::with_capacity(RECORD_HEADER_LEN as usize + record.stored.len());
        bytes.extend_from_slice(&header.to_bytes());
        bytes.extend_from_slice(&record.stored);

        let mut file_header = self.header;
        file_header.touch();

        let res = self
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(&bytes))
            .map_err(|err| Error::WriteRecordError(err, offset))
            .and_then(|()| self.write_header(&file_header))
            .and_then(|()| self.sync());

        if let Err(err) = res {
            self.rollback();
            return Err(err);
        }

        self.header = file_header;
        self.end_offset = header.next_offset(offset);
        trace!(offset, kind = %record.kind, length, "appended record");

        Ok(offset)
    }

    /// Cut the file back to the logical end and restore the current
    /// header, dropping whatever an unfinished append left behind.
    ///
    /// Failures are only logged: the append already failed and a
    /// leftover tail is discarded at the next open anyway.
    fn rollback(&mut self) {
        let offset = self.end_offset;
        debug!(offset, "rolling back unfinished append");

        if let Err(err) = self.file.set_len(offset) {
            debug!(offset, "cannot roll back partial record: {err}");
        }

        let header = self.header;
        if let Err(err) = self.write_header(&header).and_then(|()| self.sync()) {
            debug!("cannot restore archive header: {err}");
        }
    }

    /// Point the file header at the snapshot record at the given
    /// offset.
    pub fn set_have_ptr(&mut self, offset: u64) -> Result<()> {
        let mut header = self.header;
        header.have_ptr = offset;
        header.touch();
        self.write_header(&header)?;
        self.sync()?;
        self.header = header;
        Ok(())
    }

    fn write_header(&mut self, header: &FileHeader) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnlyArchiveError(self.path.clone()));
        }

        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.write_all(&header.to_bytes()))
            .map_err(|err| Error::WriteHeaderError(err, self.path.clone()))
    }

    fn sync(&mut self) -> Result<()> {
        self.file
            .sync_all()
            .map_err(|err| Error::SyncArchiveError(err, self.path.clone()))
    }
}

/// Read and validate the header of an existing archive file.
fn read_file_header(file: &mut File, len: u64, path: &Path) -> Result<FileHeader> {
    if len < FILE_HEADER_LEN {
        return Err(Error::TruncatedHeaderError(len, path.to_owned()));
    }

    let mut bytes = [0; FILE_HEADER_LEN as usize];
    file.read_exact(&mut bytes)
        .map_err(|err| Error::ReadHeaderError(err, path.to_owned()))?;

    let header = FileHeader::from_bytes(&bytes);
    if header.magic != MAGIC {
        return Err(Error::InvalidMagicError(header.magic, path.to_owned()));
    }
    if header.version != VERSION {
        return Err(Error::UnsupportedVersionError(header.version, path.to_owned()));
    }

    Ok(header)
}
