use std::{any::Any, result, time::Duration};

use thiserror::Error;

use crate::{AnyBoxedError, AnyError};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
///
/// Remote implementations wrap their own transport errors into one of
/// these variants, so the sync pipeline can decide what to retry and
/// what to abort on without knowing the transport.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot authenticate to remote mailbox")]
    AuthError(#[source] AnyBoxedError),
    #[error("cannot reach remote mailbox")]
    NetworkError(#[source] AnyBoxedError),
    #[error("cannot select remote folder {1}")]
    SelectMailboxError(#[source] AnyBoxedError, String),
    #[error("cannot execute remote action")]
    ExecuteError(#[source] AnyBoxedError),
    #[error("cannot parse remote response: {0}")]
    InvalidResponseError(String),
    #[error("cannot find remote message {0}")]
    MessageNotFoundError(u32),
    #[error("cannot execute remote action: timed out after {0:?}")]
    TimeoutError(Duration),
    #[error("cannot execute remote action: cancelled")]
    CancelledError,
}

impl Error {
    /// Return `true` if the action can be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError(_) | Self::TimeoutError(_))
    }

    /// Return `true` if no further action can succeed with the same
    /// credentials.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::AuthError(_))
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
