//! # Configuration
//!
//! Module dedicated to the vault configuration. The main structure
//! of this module is [`VaultConfig`], usually deserialized from a
//! TOML file.

use std::{
    any::Any,
    fs, io,
    path::{Path, PathBuf},
    result,
};

use secret::Secret;
use serde::{Deserialize, Serialize};
use shellexpand_utils::shellexpand_path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    sync::{DEFAULT_CONNECTIONS, MIN_CONNECTIONS},
    AnyBoxedError, AnyError,
};

/// The default remote folder, holding every Gmail message.
pub const DEFAULT_FOLDER: &str = "[Gmail]/All Mail";

/// The default IMAP host.
pub const DEFAULT_HOST: &str = "imap.gmail.com";

/// The default IMAP port.
pub const DEFAULT_PORT: u16 = 993;

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot find default configuration directory")]
    GetConfigDirError,
    #[error("cannot read configuration file at {1}")]
    ReadConfigFileError(#[source] io::Error, PathBuf),
    #[error("cannot parse configuration file at {1}")]
    ParseConfigFileError(#[source] toml::de::Error, PathBuf),

    #[error("cannot get password")]
    GetPasswordError(#[source] secret::Error),
    #[error("cannot get password: password is empty")]
    GetPasswordEmptyError,
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

/// The vault configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VaultConfig {
    /// The account login.
    pub email: String,

    /// The account password, either raw (`password.raw = "…"`) or
    /// printed on the first line of a shell command
    /// (`password.command = "…"`).
    #[serde(default, skip_serializing_if = "Secret::is_empty")]
    pub password: Secret,

    /// The remote folder to archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,

    /// The path of the archive file.
    pub vault: PathBuf,

    /// The number of parallel remote connections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<usize>,

    /// The IMAP host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// The IMAP port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl VaultConfig {
    /// The default configuration file path:
    /// `$XDG_CONFIG_HOME/vault/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("vault").join("config.toml"))
            .ok_or(Error::GetConfigDirError)
    }

    /// Read and parse the configuration file at the given path.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(?path, "reading configuration file");

        let content = fs::read_to_string(path)
            .map_err(|err| Error::ReadConfigFileError(err, path.to_owned()))?;

        toml::from_str(&content).map_err(|err| Error::ParseConfigFileError(err, path.to_owned()))
    }

    /// Read and parse the configuration file at the given path, or
    /// at the default path if `None`.
    pub fn from_some_path(path: Option<impl AsRef<Path>>) -> Result<Self> {
        match path {
            Some(path) => Self::from_path(path),
            None => Self::from_path(Self::default_path()?),
        }
    }

    pub fn folder(&self) -> &str {
        self.folder.as_deref().unwrap_or(DEFAULT_FOLDER)
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or(DEFAULT_HOST)
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// The archive path, with `~` and environment variables
    /// expanded.
    pub fn vault_path(&self) -> PathBuf {
        shellexpand_path(&self.vault)
    }

    /// The number of remote connections, at least
    /// [`MIN_CONNECTIONS`].
    pub fn connections(&self) -> usize {
        let connections = self.connections.unwrap_or(DEFAULT_CONNECTIONS);

        if connections < MIN_CONNECTIONS {
            warn!(connections, "minimum number of connections is {MIN_CONNECTIONS}");
            return MIN_CONNECTIONS;
        }

        connections
    }

    /// The number of fetch workers: every connection but the
    /// scanner's one.
    pub fn fetch_workers(&self) -> usize {
        self.connections() - 1
    }

    /// Get the account password, running the password command if
    /// needed. Only the first line of the secret is kept.
    pub async fn password(&self) -> Result<String> {
        let passwd = self.password.get().await.map_err(Error::GetPasswordError)?;
        let passwd = passwd.lines().next().ok_or(Error::GetPasswordEmptyError)?;
        Ok(passwd.to_owned())
    }
}
