//! # Mbox
//!
//! Module dedicated to replaying an archive as a standard mailbox
//! stream. The main structure of this module is [`MboxWriter`].

use std::{
    any::Any,
    collections::HashSet,
    io::{self, BufWriter, Write},
    result,
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{archive, AnyBoxedError, AnyError, Archive};

/// The separator line starting every message.
pub const SEPARATOR: &str = "From MAILER-DAEMON Thu Jan  1 01:00:00 1970";

/// The header carrying the labels of a message.
pub const LABELS_HEADER: &str = "X-Gmail-Labels";

/// The header carrying the identifier of a message.
pub const MESSAGE_ID_HEADER: &str = "X-Gmail-MsgID";

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read message from archive")]
    ReadArchiveError(#[source] archive::Error),
    #[error("cannot write message {1} to mbox")]
    WriteMessageError(#[source] io::Error, i64),
    #[error("cannot flush mbox")]
    FlushError(#[source] io::Error),
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

/// The mbox writer.
///
/// Messages are written in archive order, each one preceded by the
/// separator line and the labels and identifier headers, and
/// followed by an empty line. Body lines starting with `From ` are
/// escaped with a leading `>`.
pub struct MboxWriter<'a> {
    archive: &'a Archive,
    include_deleted: bool,
}

impl<'a> MboxWriter<'a> {
    pub fn new(archive: &'a Archive) -> Self {
        Self {
            archive,
            include_deleted: false,
        }
    }

    pub fn set_include_deleted(&mut self, include: bool) {
        self.include_deleted = include;
    }

    pub fn with_include_deleted(mut self, include: bool) -> Self {
        self.set_include_deleted(include);
        self
    }

    /// Write the whole archive to the given writer, returning the
    /// number of messages written.
    ///
    /// A message identifier archived more than once is only written
    /// the first time.
    pub fn write(&self, out: impl Write) -> Result<usize> {
        let mut out = BufWriter::new(out);
        let mut written = HashSet::new();

        self.archive.rewind();

        while let Some(msg) = self
            .archive
            .next_message()
            .map_err(Error::ReadArchiveError)?
        {
            let id = msg.message_id;

            if !self.include_deleted && self.archive.is_deleted(id) {
                debug!(id, "skipping deleted message");
                continue;
            }

            if written.contains(&id) {
                warn!(id, "message archived more than once, skipping copy");
                continue;
            }

            let labels = self.archive.labels_of(id);
            write_message(&mut out, id, &labels, &msg.data)
                .map_err(|err| Error::WriteMessageError(err, id))?;
            written.insert(id);
        }

        out.flush().map_err(Error::FlushError)?;
        self.archive.rewind();

        info!(written = written.len(), "mbox written");
        Ok(written.len())
    }
}

fn write_message(out: &mut impl Write, id: i64, labels: &[String], body: &[u8]) -> io::Result<()> {
    writeln!(out, "{SEPARATOR}")?;
    if !labels.is_empty() {
        writeln!(out, "{LABELS_HEADER}: {}", labels.join(", "))?;
    }
    writeln!(out, "{MESSAGE_ID_HEADER}: {id}")?;

    let body = body.strip_suffix(b"\n").unwrap_or(body);
    if !body.is_empty() {
        for line in body.split(|byte| *byte == b'\n') {
            if line.starts_with(b"From ") {
                out.write_all(b">")?;
            }
            out.write_all(line)?;
            out.write_all(b"\n")?;
        }
    }

    out.write_all(b"\n")
}
