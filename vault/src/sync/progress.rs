//! # Sync progress
//!
//! Counters shared by the scanner and the fetch workers, plus the
//! periodic reporter reading them. Producers only touch atomics, so
//! reporting never blocks them.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{SyncEvent, SyncEventHandler};

/// The live sync counters.
#[derive(Debug, Default)]
pub struct SyncProgress {
    to_scan: AtomicU64,
    scanned: AtomicU64,
    to_fetch: AtomicU64,
    fetched: AtomicU64,
    failed: AtomicU64,
    labels_updated: AtomicU64,
}

impl SyncProgress {
    pub fn set_to_scan(&self, n: u64) {
        self.to_scan.store(n, Ordering::Relaxed);
    }

    pub fn add_scanned(&self, n: u64) {
        self.scanned.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_to_fetch(&self, n: u64) {
        self.to_fetch.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_fetched(&self) {
        self.fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_labels_updated(&self, n: u64) {
        self.labels_updated.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            to_scan: self.to_scan.load(Ordering::Relaxed),
            scanned: self.scanned.load(Ordering::Relaxed),
            to_fetch: self.to_fetch.load(Ordering::Relaxed),
            fetched: self.fetched.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            labels_updated: self.labels_updated.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the sync counters.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct ProgressSnapshot {
    pub to_scan: u64,
    pub scanned: u64,
    pub to_fetch: u64,
    pub fetched: u64,
    pub failed: u64,
    pub labels_updated: u64,
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} scanned, {} of {} fetched, {} label updates",
            self.scanned, self.to_scan, self.fetched, self.to_fetch, self.labels_updated
        )?;

        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }

        Ok(())
    }
}

/// The periodic progress reporter.
///
/// Every interval, a snapshot is sent to the event handler if any,
/// or logged otherwise.
pub struct ProgressReporter {
    progress: Arc<SyncProgress>,
    interval: Duration,
    handler: Option<Arc<SyncEventHandler>>,
}

impl ProgressReporter {
    pub fn new(
        progress: Arc<SyncProgress>,
        interval: Duration,
        handler: Option<Arc<SyncEventHandler>>,
    ) -> Self {
        Self {
            progress,
            interval,
            handler,
        }
    }

    /// Spawn the reporter. It stops once the token is cancelled.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(self.interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => self.report().await,
                }
            }
        })
    }

    async fn report(&self) {
        let snapshot = self.progress.snapshot();
        match &self.handler {
            Some(_) => SyncEvent::Progress(snapshot).emit(&self.handler).await,
            None => info!("{snapshot}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{atomic::AtomicUsize, Arc},
        time::Duration,
    };

    use tokio_util::sync::CancellationToken;

    use crate::sync::box_handler;

    use super::*;

    #[test]
    fn snapshot_display() {
        let progress = SyncProgress::default();
        progress.set_to_scan(250);
        progress.add_scanned(100);
        progress.add_to_fetch(3);
        progress.inc_fetched();
        progress.add_labels_updated(7);

        assert_eq!(
            progress.snapshot().to_string(),
            "100 of 250 scanned, 1 of 3 fetched, 7 label updates"
        );

        progress.inc_failed();
        assert_eq!(
            progress.snapshot().to_string(),
            "100 of 250 scanned, 1 of 3 fetched, 7 label updates, 1 failed"
        );
    }

    #[test_log::test(tokio::test)]
    async fn reporter_emits_until_cancelled() {
        let progress = Arc::new(SyncProgress::default());
        progress.set_to_scan(42);

        let reports = Arc::new(AtomicUsize::new(0));
        let handler = {
            let reports = reports.clone();
            box_handler(move |evt| {
                let reports = reports.clone();
                async move {
                    if let SyncEvent::Progress(snapshot) = evt {
                        assert_eq!(snapshot.to_scan, 42);
                        reports.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(())
                }
            })
        };

        let token = CancellationToken::new();
        let reporter = ProgressReporter::new(progress, Duration::from_millis(10), Some(handler))
            .spawn(token.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        reporter.await.unwrap();

        let n = reports.load(Ordering::Relaxed);
        assert!(n >= 2, "{n} reports");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(reports.load(Ordering::Relaxed), n);
    }
}
