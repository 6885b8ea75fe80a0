use std::{any::Any, result};

use thiserror::Error;

use crate::{remote, AnyBoxedError, AnyError};

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot connect to IMAP server {1}:{2}")]
    ConnectError(#[source] imap::Error, String, u16),
    #[error("cannot login to IMAP server as {1}")]
    LoginError(#[source] imap::Error, String),
    #[error("cannot examine IMAP folder {1}")]
    ExamineFolderError(#[source] imap::Error, String),
    #[error("cannot list IMAP folders")]
    ListFoldersError(#[source] imap::Error),
    #[error("cannot fetch IMAP envelopes {1}:{2}")]
    FetchEnvelopesError(#[source] imap::Error, u32, u32),
    #[error("cannot fetch IMAP message {1}")]
    FetchMessageError(#[source] imap::Error, u32),
    #[error("cannot parse IMAP envelopes response: {0}")]
    ParseEnvelopesError(String),
    #[error("cannot get UID or Gmail message id of IMAP message {0}")]
    MissingEnvelopeIdError(u32),
}

impl Error {
    fn imap_error(&self) -> Option<&imap::Error> {
        match self {
            Self::ConnectError(err, ..)
            | Self::LoginError(err, ..)
            | Self::ExamineFolderError(err, ..)
            | Self::ListFoldersError(err)
            | Self::FetchEnvelopesError(err, ..)
            | Self::FetchMessageError(err, ..) => Some(err),
            Self::ParseEnvelopesError(_) | Self::MissingEnvelopeIdError(_) => None,
        }
    }

    /// Return `true` if the underlying connection broke.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self.imap_error(),
            Some(imap::Error::Io(_) | imap::Error::ConnectionLost)
        )
    }

    /// Return `true` if the server refused the credentials.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Self::LoginError(..)) && !self.is_network_error()
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

impl From<Error> for remote::Error {
    fn from(err: Error) -> Self {
        if err.is_network_error() || matches!(err, Error::ConnectError(..)) {
            remote::Error::NetworkError(err.into())
        } else if err.is_auth_error() {
            remote::Error::AuthError(err.into())
        } else if let Error::ExamineFolderError(_, folder) = &err {
            let folder = folder.clone();
            remote::Error::SelectMailboxError(err.into(), folder)
        } else {
            remote::Error::ExecuteError(err.into())
        }
    }
}
