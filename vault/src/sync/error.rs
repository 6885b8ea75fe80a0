use std::{any::Any, result};

use thiserror::Error;
use tokio::task::JoinError;

use crate::{archive, remote, AnyBoxedError, AnyError};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot open remote connection")]
    BuildRemoteError(#[source] remote::Error),
    #[error("cannot list remote messages {1} to {2}")]
    SearchRangeError(#[source] remote::Error, u32, u32),
    #[error("cannot fetch remote message {1}")]
    FetchMessageError(#[source] remote::Error, i64),

    #[error("cannot update archive")]
    ArchiveError(#[source] archive::Error),
    #[error("cannot run archive task")]
    JoinArchiveTaskError(#[source] JoinError),
    #[error("cannot join sync task")]
    JoinSyncTaskError(#[source] JoinError),

    #[error("cannot push message {0} to fetch queue: queue is closed")]
    QueueClosedError(i64),
    #[error("cannot synchronize archive: sync cancelled")]
    CancelledError,
}

impl Error {
    /// Return `true` if the error only reports a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::CancelledError)
    }

    /// Map a remote error, keeping cancellations as such.
    pub(crate) fn from_remote(err: remote::Error, f: impl FnOnce(remote::Error) -> Self) -> Self {
        match err {
            remote::Error::CancelledError => Self::CancelledError,
            err => f(err),
        }
    }
}

impl From<archive::Error> for Error {
    fn from(err: archive::Error) -> Self {
        Self::ArchiveError(err)
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
