//! # Remote
//!
//! Module dedicated to the remote mailbox abstraction. The sync
//! pipeline only knows about the [`RemoteBuilder`] and [`Remote`]
//! traits: one builder is cloned for every connection, and every
//! built [`Remote`] is owned by exactly one task.

mod error;

use async_trait::async_trait;

#[doc(inline)]
pub use self::error::{Error, Result};

/// The minimal description of a remote message.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct RemoteEnvelope {
    /// The transient, session-scoped position of the message in the
    /// remote folder. Only used to fetch the body back.
    pub sequence_id: u32,

    /// The stable identifier of the message.
    pub message_id: i64,

    /// The ordered labels of the message.
    pub labels: Vec<String>,
}

impl RemoteEnvelope {
    pub fn new(sequence_id: u32, message_id: i64, labels: Vec<String>) -> Self {
        Self {
            sequence_id,
            message_id,
            labels,
        }
    }
}

/// The remote builder.
///
/// Defines how to open a new, ready-to-use connection to the remote
/// folder being archived.
#[async_trait]
pub trait RemoteBuilder: Clone + Send + Sync + 'static {
    /// The type of the remote connection being built.
    type Remote: Remote;

    /// Open a new connection, authenticate and select the folder.
    async fn build(self) -> Result<Self::Remote>;
}

/// A connection to the remote folder being archived.
#[async_trait]
pub trait Remote: Send + 'static {
    /// The total number of messages reported by the remote when the
    /// folder was selected.
    fn messages_count(&self) -> u32;

    /// List the names of all remote folders.
    async fn list_mailboxes(&mut self) -> Result<Vec<String>>;

    /// List the envelopes of the messages whose positions fall in
    /// the inclusive range `begin..=end`.
    async fn search_range(&mut self, begin: u32, end: u32) -> Result<Vec<RemoteEnvelope>>;

    /// Fetch the raw body of the given message.
    async fn fetch_body(&mut self, sequence_id: u32) -> Result<Vec<u8>>;
}
