//! # IMAP
//!
//! Module dedicated to the Gmail IMAP remote. Folders are examined
//! read-only. Envelopes are listed with the Gmail `X-GM-MSGID` and
//! `X-GM-LABELS` extensions, and the message UID is used as the
//! sequence identifier to fetch bodies back.
//!
//! The Gmail message identifier is not exposed by the typed fetch
//! responses of the session, so envelopes are listed with a raw
//! `FETCH` command whose response is parsed here.
//!
//! The underlying IMAP session is blocking: every action runs in a
//! blocking task, which takes the session and gives it back once
//! done. A session lost on the way (broken connection, timed out
//! action) is rebuilt by the next action.

mod error;

use async_trait::async_trait;
use imap::{ConnectionMode, ImapConnection, Session, TlsKind};
use imap_proto::{AttributeValue, Response};
use tokio::task;
use tracing::{debug, info, trace, warn};

use crate::{
    config::VaultConfig,
    remote::{self, Remote, RemoteBuilder, RemoteEnvelope},
};

#[doc(inline)]
pub use self::error::{Error, Result};

/// The blocking IMAP session.
pub type ImapSession = Session<Box<dyn ImapConnection>>;

/// The query listing envelopes.
const ENVELOPE_QUERY: &str = "(UID X-GM-MSGID X-GM-LABELS)";

/// The query fetching a whole message.
const BODY_QUERY: &str = "RFC822";

/// The IMAP remote builder.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImapRemoteBuilder {
    host: String,
    port: u16,
    login: String,
    password: String,
    folder: String,
    trace: bool,
}

impl ImapRemoteBuilder {
    pub fn new(
        host: impl ToString,
        port: u16,
        login: impl ToString,
        password: impl ToString,
        folder: impl ToString,
    ) -> Self {
        Self {
            host: host.to_string(),
            port,
            login: login.to_string(),
            password: password.to_string(),
            folder: folder.to_string(),
            trace: false,
        }
    }

    /// Create a builder from the given configuration and the already
    /// resolved password.
    pub fn from_config(config: &VaultConfig, password: impl ToString) -> Self {
        Self::new(
            config.host(),
            config.port(),
            &config.email,
            password,
            config.folder(),
        )
    }

    /// Log every IMAP exchange.
    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.set_trace(trace);
        self
    }

    /// Connect, login and examine the configured folder. Returns the
    /// session and the number of messages in the folder.
    fn connect(&self) -> Result<(ImapSession, u32)> {
        debug!(host = %self.host, port = self.port, "connecting to imap server");

        let client = imap::ClientBuilder::new(&self.host, self.port)
            .tls_kind(TlsKind::Rust)
            .mode(ConnectionMode::Tls)
            .connect()
            .map_err(|err| Error::ConnectError(err, self.host.clone(), self.port))?;

        let mut session = client
            .login(&self.login, &self.password)
            .map_err(|(err, _client)| Error::LoginError(err, self.login.clone()))?;
        session.debug = self.trace;

        let mailbox = session
            .examine(&self.folder)
            .map_err(|err| Error::ExamineFolderError(err, self.folder.clone()))?;

        debug!(folder = %self.folder, exists = mailbox.exists, "imap folder examined");

        Ok((session, mailbox.exists))
    }

    async fn connect_blocking(&self) -> remote::Result<(ImapSession, u32)> {
        let builder = self.clone();
        task::spawn_blocking(move || builder.connect())
            .await
            .map_err(|err| remote::Error::NetworkError(err.into()))?
            .map_err(Into::into)
    }
}

#[async_trait]
impl RemoteBuilder for ImapRemoteBuilder {
    type Remote = ImapRemote;

    async fn build(self) -> remote::Result<Self::Remote> {
        info!(login = %self.login, folder = %self.folder, "building new imap remote");
        let (session, count) = self.connect_blocking().await?;

        Ok(ImapRemote {
            builder: self,
            session: Some(session),
            count,
        })
    }
}

/// The IMAP remote.
pub struct ImapRemote {
    builder: ImapRemoteBuilder,
    session: Option<ImapSession>,
    count: u32,
}

impl ImapRemote {
    /// Execute the given action in a blocking task.
    ///
    /// The session is kept for the next action unless the connection
    /// broke, in which case the next action opens a new one.
    async fn exec<T: Send + 'static>(
        &mut self,
        action: impl FnOnce(&mut ImapSession) -> Result<T> + Send + 'static,
    ) -> remote::Result<T> {
        let mut session = match self.session.take() {
            Some(session) => session,
            None => {
                warn!("imap session lost, reconnecting");
                let (session, count) = self.builder.connect_blocking().await?;
                if count != self.count {
                    debug!(before = self.count, after = count, "imap folder changed");
                }
                session
            }
        };

        let (session, res) = task::spawn_blocking(move || {
            let res = action(&mut session);
            (session, res)
        })
        .await
        .map_err(|err| remote::Error::NetworkError(err.into()))?;

        match res {
            Ok(res) => {
                self.session = Some(session);
                Ok(res)
            }
            Err(err) => {
                if !err.is_network_error() {
                    self.session = Some(session);
                }
                Err(err.into())
            }
        }
    }
}

#[async_trait]
impl Remote for ImapRemote {
    fn messages_count(&self) -> u32 {
        self.count
    }

    async fn list_mailboxes(&mut self) -> remote::Result<Vec<String>> {
        self.exec(|session| {
            let names = session
                .list(Some(""), Some("*"))
                .map_err(Error::ListFoldersError)?;
            Ok(names.iter().map(|name| name.name().to_owned()).collect())
        })
        .await
    }

    async fn search_range(&mut self, begin: u32, end: u32) -> remote::Result<Vec<RemoteEnvelope>> {
        let envelopes = self
            .exec(move |session| {
                let cmd = format!("FETCH {begin}:{end} {ENVELOPE_QUERY}");
                let data = session
                    .run_command_and_read_response(cmd)
                    .map_err(|err| Error::FetchEnvelopesError(err, begin, end))?;
                parse_envelopes(&data)
            })
            .await?;

        trace!(begin, end, envelopes = envelopes.len(), "imap envelopes listed");
        Ok(envelopes)
    }

    async fn fetch_body(&mut self, uid: u32) -> remote::Result<Vec<u8>> {
        let body = self
            .exec(move |session| {
                let fetches = session
                    .uid_fetch(uid.to_string(), BODY_QUERY)
                    .map_err(|err| Error::FetchMessageError(err, uid))?;
                let body = fetches
                    .iter()
                    .find(|fetch| fetch.uid == Some(uid))
                    .and_then(|fetch| fetch.body())
                    .map(ToOwned::to_owned);
                Ok(body)
            })
            .await?;

        body.ok_or(remote::Error::MessageNotFoundError(uid))
    }
}

/// Parse the untagged responses of an envelopes `FETCH` command.
///
/// Responses other than `FETCH` are skipped, and so are `FETCH`
/// responses carrying neither a UID nor a Gmail message identifier
/// (unsolicited flag updates). Any other `FETCH` response must carry
/// both.
fn parse_envelopes(mut data: &[u8]) -> Result<Vec<RemoteEnvelope>> {
    let mut envelopes = Vec::new();

    while !data.is_empty() {
        let (rest, res) = imap_proto::parser::parse_response(data).map_err(|_| {
            let line = data.split(|byte| *byte == b'\n').next().unwrap_or_default();
            Error::ParseEnvelopesError(String::from_utf8_lossy(line).trim_end().to_owned())
        })?;
        data = rest;

        let Response::Fetch(seq, attrs) = res else {
            trace!("skipping unsolicited imap response");
            continue;
        };

        let mut uid = None;
        let mut msg_id = None;
        let mut labels = Vec::new();

        for attr in attrs {
            match attr {
                AttributeValue::Uid(id) => uid = Some(id),
                AttributeValue::GmailMsgId(id) => msg_id = Some(id),
                AttributeValue::GmailLabels(names) => {
                    labels = names.into_iter().map(|name| name.into_owned()).collect();
                }
                _ => (),
            }
        }

        match (uid, msg_id) {
            (Some(uid), Some(msg_id)) => {
                envelopes.push(RemoteEnvelope::new(uid, msg_id as i64, labels));
            }
            (None, None) => {
                trace!(seq, "skipping imap fetch response without identifiers");
            }
            _ => return Err(Error::MissingEnvelopeIdError(seq)),
        }
    }

    Ok(envelopes)
}

impl Drop for ImapRemote {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.logout() {
                debug!("cannot logout from imap session: {err}");
                debug!("{err:?}");
            }
        }
    }
}
