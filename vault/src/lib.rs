//! Rust library to keep a durable, append-only copy of a remote
//! mailbox.
//!
//! The library is made of two halves. The [`archive`] is a single
//! self-describing file: a fixed header followed by typed,
//! feature-tagged records (messages, label batches, tombstones and
//! snapshots), optionally hashed and compressed. Its in-memory
//! [`ArchiveIndex`](crate::archive::ArchiveIndex) is rebuilt by
//! replaying the whole log at open time.
//!
//! The [`sync`] pipeline drives the archive: an adaptive-window
//! scanner diffs the remote listing against the index, pushes unseen
//! messages onto a bounded queue and batches label updates, while a
//! pool of fetch workers retrieves bodies and appends them to the
//! archive.
//!
//! The remote mailbox itself is abstracted behind the
//! [`RemoteBuilder`](crate::remote::RemoteBuilder) and
//! [`Remote`](crate::remote::Remote) traits. A Gmail IMAP
//! implementation is available behind the `imap` cargo feature.
//!
//! Archives can be replayed to a standard mailbox stream using the
//! [`mbox`] module.

pub mod archive;
pub mod config;
mod error;
#[cfg(feature = "imap")]
pub mod imap;
pub mod mbox;
pub mod remote;
pub mod retry;
pub mod sync;

#[doc(inline)]
pub use self::{
    archive::Archive,
    error::{AnyBoxedError, AnyError, AnyResult},
};
