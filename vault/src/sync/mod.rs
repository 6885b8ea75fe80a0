//! # Synchronization
//!
//! Module dedicated to archiving a remote folder. The main structure
//! of this module is [`SyncBuilder`].
//!
//! One run opens one connection for the [scanner](scan) and one per
//! [fetch worker](fetch). The scanner produces messages to archive
//! into a bounded [`FetchQueue`], workers consume them. Every task
//! observes the same cancellation token: cancelling it from outside
//! stops the run, and any fatal error inside the run cancels it too.

mod error;
mod fetch;
pub mod progress;
mod queue;
pub mod report;
pub mod scan;

use std::{fmt, future::Future, pin::Pin, sync::Arc, time::Duration};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    remote::RemoteBuilder,
    retry::Retry,
    Archive, AnyResult,
};

#[doc(inline)]
pub use self::{
    error::{Error, Result},
    progress::{ProgressReporter, ProgressSnapshot, SyncProgress},
    queue::{FetchItem, FetchQueue},
    report::SyncReport,
};
use self::{fetch::FetchWorker, scan::Scanner};

/// The default number of remote connections.
pub const DEFAULT_CONNECTIONS: usize = 4;

/// The minimum number of remote connections: one for the scanner,
/// at least one for fetching.
pub const MIN_CONNECTIONS: usize = 2;

/// The default interval between two progress reports.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// The synchronization builder.
#[derive(Clone)]
pub struct SyncBuilder<B: RemoteBuilder> {
    remote_builder: B,
    archive: Arc<Archive>,
    connections: Option<usize>,
    retry: Option<Retry>,
    report_interval: Option<Duration>,
    handler: Option<Arc<SyncEventHandler>>,
    token: Option<CancellationToken>,
}

impl<B: RemoteBuilder> SyncBuilder<B> {
    /// Create a new synchronization builder archiving the folder
    /// opened by the given remote builder into the given archive.
    pub fn new(remote_builder: B, archive: Arc<Archive>) -> Self {
        Self {
            remote_builder,
            archive,
            connections: None,
            retry: None,
            report_interval: None,
            handler: None,
            token: None,
        }
    }

    pub fn set_some_connections(&mut self, connections: Option<usize>) {
        self.connections = connections;
    }

    pub fn set_connections(&mut self, connections: usize) {
        self.set_some_connections(Some(connections));
    }

    pub fn with_some_connections(mut self, connections: Option<usize>) -> Self {
        self.set_some_connections(connections);
        self
    }

    pub fn with_connections(mut self, connections: usize) -> Self {
        self.set_connections(connections);
        self
    }

    /// The number of remote connections, at least
    /// [`MIN_CONNECTIONS`].
    pub fn get_connections(&self) -> usize {
        self.connections
            .unwrap_or(DEFAULT_CONNECTIONS)
            .max(MIN_CONNECTIONS)
    }

    /// The number of fetch workers: every connection but the
    /// scanner's one.
    pub fn get_fetch_workers(&self) -> usize {
        self.get_connections() - 1
    }

    pub fn set_some_retry(&mut self, retry: Option<Retry>) {
        self.retry = retry;
    }

    pub fn set_retry(&mut self, retry: Retry) {
        self.set_some_retry(Some(retry));
    }

    pub fn with_some_retry(mut self, retry: Option<Retry>) -> Self {
        self.set_some_retry(retry);
        self
    }

    pub fn with_retry(mut self, retry: Retry) -> Self {
        self.set_retry(retry);
        self
    }

    pub fn get_retry(&self) -> Retry {
        self.retry.clone().unwrap_or_default()
    }

    pub fn set_some_report_interval(&mut self, interval: Option<Duration>) {
        self.report_interval = interval;
    }

    pub fn set_report_interval(&mut self, interval: Duration) {
        self.set_some_report_interval(Some(interval));
    }

    pub fn with_some_report_interval(mut self, interval: Option<Duration>) -> Self {
        self.set_some_report_interval(interval);
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.set_report_interval(interval);
        self
    }

    pub fn get_report_interval(&self) -> Duration {
        self.report_interval.unwrap_or(DEFAULT_REPORT_INTERVAL)
    }

    pub fn set_some_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        &mut self,
        handler: Option<impl Fn(SyncEvent) -> F + Send + Sync + 'static>,
    ) {
        self.handler = handler.map(box_handler);
    }

    pub fn set_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        &mut self,
        handler: impl Fn(SyncEvent) -> F + Send + Sync + 'static,
    ) {
        self.set_some_handler(Some(handler));
    }

    pub fn with_some_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        mut self,
        handler: Option<impl Fn(SyncEvent) -> F + Send + Sync + 'static>,
    ) -> Self {
        self.set_some_handler(handler);
        self
    }

    pub fn with_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
        mut self,
        handler: impl Fn(SyncEvent) -> F + Send + Sync + 'static,
    ) -> Self {
        self.set_handler(handler);
        self
    }

    pub fn set_some_cancellation_token(&mut self, token: Option<CancellationToken>) {
        self.token = token;
    }

    pub fn set_cancellation_token(&mut self, token: CancellationToken) {
        self.set_some_cancellation_token(Some(token));
    }

    pub fn with_some_cancellation_token(mut self, token: Option<CancellationToken>) -> Self {
        self.set_some_cancellation_token(token);
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.set_cancellation_token(token);
        self
    }

    /// Run the synchronization.
    ///
    /// Returns the report once the whole folder has been scanned and
    /// every queued message processed, or as soon as the caller's
    /// token is cancelled, in which case the report is flagged as
    /// such. A fatal error cancels all tasks and is returned once
    /// they all stopped.
    pub async fn sync(self) -> Result<SyncReport> {
        let outer_token = self.token.clone().unwrap_or_default();
        let token = outer_token.child_token();
        let retry = self.get_retry();
        let workers = self.get_fetch_workers();

        info!(connections = workers + 1, "synchronizing archive");

        let remote = build_remote(self.remote_builder.clone(), &retry, &token).await?;

        let progress = Arc::new(SyncProgress::default());
        let queue = Arc::new(FetchQueue::new(
            scan::MIN_WINDOW as usize,
            token.clone(),
        ));

        let reporter_token = token.child_token();
        let reporter = ProgressReporter::new(
            progress.clone(),
            self.get_report_interval(),
            self.handler.clone(),
        )
        .spawn(reporter_token.clone());

        let scanner = Scanner {
            remote,
            archive: self.archive.clone(),
            queue: queue.clone(),
            progress: progress.clone(),
            retry: retry.clone(),
            token: token.clone(),
            handler: self.handler.clone(),
        };

        let scanner = spawn_task(&token, scanner.run());

        let workers = (0..workers).map(|id| {
            let builder = self.remote_builder.clone();
            let archive = self.archive.clone();
            let queue = queue.clone();
            let progress = progress.clone();
            let retry = retry.clone();
            let token = token.clone();
            let handler = self.handler.clone();

            spawn_task(&token.clone(), async move {
                let remote = build_remote(builder, &retry, &token).await?;
                let worker = FetchWorker {
                    id,
                    remote,
                    archive,
                    queue,
                    progress,
                    retry,
                    token,
                    handler,
                };
                worker.run().await
            })
        });
        let workers = join_all(workers).await;
        let scanner = scanner.await;

        reporter_token.cancel();
        if let Err(err) = reporter.await {
            debug!("cannot join progress reporter: {err:?}");
        }

        let mut report = SyncReport::default();
        let mut errors = Vec::new();

        match scanner {
            Ok(Ok(())) => (),
            Ok(Err(err)) => errors.push(err),
            Err(err) => errors.push(Error::JoinSyncTaskError(err)),
        }

        for worker in workers {
            match worker {
                Ok(Ok(failures)) => report.failures.extend(failures),
                Ok(Err(err)) => errors.push(err),
                Err(err) => {
                    warn!("sync task stopped abnormally: {err}");
                    errors.push(Error::JoinSyncTaskError(err));
                }
            }
        }

        if let Some(err) = errors.into_iter().find(|err| !err.is_cancelled()) {
            return Err(err);
        }

        report.progress = progress.snapshot();
        report.cancelled = token.is_cancelled();

        SyncEvent::Progress(report.progress)
            .emit(&self.handler)
            .await;

        if report.cancelled {
            warn!("synchronization cancelled: {}", report.progress);
        } else {
            info!("synchronization done: {}", report.progress);
        }

        Ok(report)
    }
}

/// Build one remote connection, retrying transient failures.
async fn build_remote<B: RemoteBuilder>(
    mut builder: B,
    retry: &Retry,
    token: &CancellationToken,
) -> Result<B::Remote> {
    retry
        .run(token, &mut builder, |builder| builder.clone().build())
        .await
        .map_err(|err| Error::from_remote(err, Error::BuildRemoteError))
}

/// Spawn a pipeline task.
///
/// The token is cancelled as soon as the task fails, or if it panics,
/// so the tasks blocked on the queue always get released.
fn spawn_task<T: Send + 'static>(
    token: &CancellationToken,
    task: impl Future<Output = Result<T>> + Send + 'static,
) -> JoinHandle<Result<T>> {
    let token = token.clone();
    tokio::spawn(async move {
        let guard = token.clone().drop_guard();
        let res = cancel_on_error(&token, task.await);
        guard.disarm();
        res
    })
}

/// Cancel every task sharing the token if the given result carries
/// a fatal error.
fn cancel_on_error<T>(token: &CancellationToken, res: Result<T>) -> Result<T> {
    if let Err(err) = &res {
        if !err.is_cancelled() {
            warn!("{err}, cancelling synchronization");
            debug!("{err:?}");
            token.cancel();
        }
    }
    res
}

/// Wrap the given async function into a [`SyncEventHandler`].
pub(crate) fn box_handler<F: Future<Output = AnyResult<()>> + Send + 'static>(
    handler: impl Fn(SyncEvent) -> F + Send + Sync + 'static,
) -> Arc<SyncEventHandler> {
    Arc::new(
        move |evt: SyncEvent| -> Pin<Box<dyn Future<Output = AnyResult<()>> + Send>> {
            Box::pin(handler(evt))
        },
    )
}

/// The synchronization async event handler.
pub type SyncEventHandler =
    dyn Fn(SyncEvent) -> Pin<Box<dyn Future<Output = AnyResult<()>> + Send>> + Send + Sync;

/// The synchronization event.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum SyncEvent {
    /// The remote folder holds the given number of messages.
    SelectedFolder(u32),

    /// The given inclusive range got listed and diffed.
    ScannedWindow {
        from: u32,
        to: u32,
        new: usize,
        label_updates: usize,
    },

    /// The given message got fetched and archived.
    ArchivedMessage(i64),

    /// A periodic progress report.
    Progress(ProgressSnapshot),
}

impl SyncEvent {
    pub async fn emit(&self, handler: &Option<Arc<SyncEventHandler>>) {
        if let Some(handler) = handler.as_ref() {
            if let Err(err) = handler(self.clone()).await {
                debug!("error while emitting sync event: {err}");
                trace!("{err:?}");
            } else {
                trace!("emitted sync event {self:?}");
            }
        }
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelectedFolder(n) => write!(f, "Selected folder with {n} messages"),
            Self::ScannedWindow {
                from,
                to,
                new,
                label_updates,
            } => write!(
                f,
                "Scanned messages {from} to {to}: {new} new, {label_updates} label updates"
            ),
            Self::ArchivedMessage(id) => write!(f, "Archived message {id}"),
            Self::Progress(snapshot) => write!(f, "{snapshot}"),
        }
    }
}
