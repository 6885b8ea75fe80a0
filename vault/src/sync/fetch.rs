//! # Fetch worker
//!
//! The consumer side of the pipeline. Every worker owns its remote
//! connection, pops messages from the shared queue, fetches their
//! body and appends them to the archive.

use std::sync::Arc;

use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    archive::{self, Archive},
    remote::{self, Remote},
    retry::Retry,
};

use super::{
    progress::SyncProgress, Error, FetchItem, FetchQueue, Result, SyncEvent, SyncEventHandler,
};

/// The fetch worker.
pub(crate) struct FetchWorker<R: Remote> {
    pub id: usize,
    pub remote: R,
    pub archive: Arc<Archive>,
    pub queue: Arc<FetchQueue>,
    pub progress: Arc<SyncProgress>,
    pub retry: Retry,
    pub token: CancellationToken,
    pub handler: Option<Arc<SyncEventHandler>>,
}

impl<R: Remote> FetchWorker<R> {
    /// Process messages until the queue is closed and drained.
    ///
    /// A message that cannot be fetched, or that turns out to be
    /// already archived, is reported back and skipped. Anything else
    /// going wrong stops the worker.
    pub async fn run(mut self) -> Result<Vec<(FetchItem, Error)>> {
        let mut failures = Vec::new();
        debug!(worker = self.id, "fetch worker started");

        while let Some(item) = self.queue.pop().await {
            let FetchItem {
                sequence_id,
                message_id,
            } = item;

            let body = self
                .retry
                .run(&self.token, &mut self.remote, |remote| remote.fetch_body(sequence_id))
                .await;

            let body = match body {
                Ok(body) => body,
                Err(remote::Error::CancelledError) => return Err(Error::CancelledError),
                Err(err) if err.is_auth_error() => {
                    return Err(Error::FetchMessageError(err, message_id));
                }
                Err(err) => {
                    let err = Error::FetchMessageError(err, message_id);
                    warn!(worker = self.id, "{err}, skipping it");
                    debug!("{err:?}");
                    self.progress.inc_failed();
                    failures.push((item, err));
                    continue;
                }
            };

            let archive = self.archive.clone();
            let len = body.len();
            let res = task::spawn_blocking(move || archive.append_message(message_id, body))
                .await
                .map_err(Error::JoinArchiveTaskError)?;

            match res {
                Ok(()) => {
                    trace!(worker = self.id, id = message_id, len, "message fetched");
                    self.progress.inc_fetched();
                    SyncEvent::ArchivedMessage(message_id)
                        .emit(&self.handler)
                        .await;
                }
                Err(err @ archive::Error::DuplicateMessageError(_)) => {
                    warn!(worker = self.id, "{err}, skipping it");
                    self.progress.inc_failed();
                    failures.push((item, Error::ArchiveError(err)));
                }
                Err(err) => return Err(Error::ArchiveError(err)),
            }
        }

        if self.token.is_cancelled() {
            return Err(Error::CancelledError);
        }

        debug!(worker = self.id, failures = failures.len(), "fetch worker done");
        Ok(failures)
    }
}
