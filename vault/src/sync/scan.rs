//! # Scanner
//!
//! The producer side of the pipeline. The scanner walks the remote
//! folder window by window, diffs every listing against the archive
//! index, queues unknown messages and flushes label changes once per
//! window.

use std::{collections::HashSet, sync::Arc};

use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    archive::{self, Archive},
    remote::{Remote, RemoteEnvelope},
    retry::Retry,
};

use super::{
    progress::SyncProgress, Error, FetchItem, FetchQueue, Result, SyncEvent, SyncEventHandler,
};

/// The smallest scan window.
pub const MIN_WINDOW: u32 = 100;

/// The largest scan window.
pub const MAX_WINDOW: u32 = 3200;

/// The adaptive scan window.
///
/// The window doubles after a round without any new message, so
/// already archived history is crossed quickly, and halves after a
/// round with new messages, so the fetch backlog stays bounded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Window(u32);

impl Default for Window {
    fn default() -> Self {
        Self(MIN_WINDOW)
    }
}

impl Window {
    pub fn size(self) -> u32 {
        self.0
    }

    /// The window to use after a round that queued `new` messages.
    pub fn next(self, new: usize) -> Self {
        if new == 0 {
            Self((self.0 * 2).min(MAX_WINDOW))
        } else {
            Self((self.0 / 2).max(MIN_WINDOW))
        }
    }

    /// The inclusive range of the window starting at `begin`, clamped
    /// to `total`.
    pub fn range(self, begin: u32, total: u32) -> (u32, u32) {
        (begin, begin.saturating_add(self.0 - 1).min(total))
    }
}

/// The outcome of diffing one listing against the index.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct WindowDiff {
    /// Listed messages not archived yet.
    pub unknown: Vec<FetchItem>,

    /// The number of messages whose labels changed.
    pub label_updates: usize,
}

/// Diff the given listing against the archive index and flush the
/// resulting label changes as one record.
///
/// Labels are compared as ordered sequences.
pub fn diff_window(archive: &Archive, envelopes: Vec<RemoteEnvelope>) -> archive::Result<WindowDiff> {
    let mut diff = WindowDiff::default();

    for envelope in envelopes {
        if !archive.has(envelope.message_id) {
            diff.unknown
                .push(FetchItem::new(envelope.sequence_id, envelope.message_id));
        }

        if archive.labels_of(envelope.message_id) != envelope.labels {
            archive.set_labels(envelope.message_id, envelope.labels);
            diff.label_updates += 1;
        }
    }

    archive.flush_labels()?;

    Ok(diff)
}

/// The folder scanner.
pub(crate) struct Scanner<R: Remote> {
    pub remote: R,
    pub archive: Arc<Archive>,
    pub queue: Arc<FetchQueue>,
    pub progress: Arc<SyncProgress>,
    pub retry: Retry,
    pub token: CancellationToken,
    pub handler: Option<Arc<SyncEventHandler>>,
}

impl<R: Remote> Scanner<R> {
    /// Scan the whole folder, then close the queue.
    ///
    /// The queue is closed whatever the outcome, so workers always
    /// get to drain it and return.
    pub async fn run(mut self) -> Result<()> {
        let res = self.scan().await;
        self.queue.close();
        res
    }

    async fn scan(&mut self) -> Result<()> {
        let total = self.remote.messages_count();
        self.progress.set_to_scan(total as u64);
        SyncEvent::SelectedFolder(total).emit(&self.handler).await;
        info!(total, "scanning remote folder");

        let mut seen = HashSet::new();
        let mut window = Window::default();
        let mut begin = 1;

        while begin <= total {
            if self.token.is_cancelled() {
                return Err(Error::CancelledError);
            }

            let (from, to) = window.range(begin, total);
            self.queue.set_capacity(window.size() as usize);

            let envelopes = self
                .retry
                .run(&self.token, &mut self.remote, |remote| remote.search_range(from, to))
                .await
                .map_err(|err| Error::from_remote(err, |err| Error::SearchRangeError(err, from, to)))?;

            let archive = self.archive.clone();
            let diff = task::spawn_blocking(move || diff_window(&archive, envelopes))
                .await
                .map_err(Error::JoinArchiveTaskError)??;

            let unknown: Vec<_> = diff
                .unknown
                .into_iter()
                .filter(|item| seen.insert(item.message_id))
                .collect();
            let new = unknown.len();

            self.progress.add_to_fetch(new as u64);
            for item in unknown {
                self.queue.push(item).await?;
            }

            self.progress.add_scanned((to - from + 1) as u64);
            self.progress.add_labels_updated(diff.label_updates as u64);

            debug!(
                from,
                to,
                window = window.size(),
                new,
                labels = diff.label_updates,
                "window scanned"
            );

            SyncEvent::ScannedWindow {
                from,
                to,
                new,
                label_updates: diff.label_updates,
            }
            .emit(&self.handler)
            .await;

            window = window.next(new);
            begin = to + 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::{archive::Archive, remote::RemoteEnvelope};

    use super::*;

    #[test]
    fn window_doubles_up_to_ceiling() {
        let mut window = Window::default();
        let mut sizes = vec![window.size()];
        for _ in 0..7 {
            window = window.next(0);
            sizes.push(window.size());
        }
        assert_eq!(sizes, [100, 200, 400, 800, 1600, 3200, 3200, 3200]);
    }

    #[test]
    fn window_halves_down_to_floor() {
        let mut window = Window::default();
        for _ in 0..5 {
            window = window.next(0);
        }
        assert_eq!(window.size(), MAX_WINDOW);

        let mut sizes = vec![];
        for _ in 0..7 {
            window = window.next(1);
            sizes.push(window.size());
        }
        assert_eq!(sizes, [1600, 800, 400, 200, 100, 100, 100]);
    }

    #[test]
    fn window_range_is_clamped() {
        assert_eq!(Window::default().range(1, 250), (1, 100));
        assert_eq!(Window::default().range(201, 250), (201, 250));
        assert_eq!(Window(MAX_WINDOW).range(u32::MAX - 1, u32::MAX), (u32::MAX - 1, u32::MAX));
    }

    #[test_log::test]
    fn diff_queues_unknown_and_batches_labels() {
        let dir = tempdir().unwrap();
        let archive = Archive::open(dir.path().join("vault.db")).unwrap();
        archive.append_message(1, b"one".to_vec()).unwrap();
        archive.set_labels(1, vec!["a".into()]);
        archive.flush_labels().unwrap();

        let envelopes = vec![
            RemoteEnvelope::new(1, 1, vec!["a".into()]),
            RemoteEnvelope::new(2, 2, vec!["b".into()]),
            RemoteEnvelope::new(3, 3, vec![]),
        ];
        let diff = diff_window(&archive, envelopes).unwrap();

        assert_eq!(diff.unknown, [FetchItem::new(2, 2), FetchItem::new(3, 3)]);
        assert_eq!(diff.label_updates, 1);
        assert_eq!(archive.labels_of(2), ["b"]);
        assert!(!archive.index().has_dirty_labels());
    }

    #[test_log::test]
    fn diff_compares_labels_in_order() {
        let dir = tempdir().unwrap();
        let archive = Archive::open(dir.path().join("vault.db")).unwrap();
        archive.set_labels(1, vec!["a".into(), "b".into()]);
        archive.flush_labels().unwrap();

        let envelopes = vec![RemoteEnvelope::new(1, 1, vec!["b".into(), "a".into()])];
        let diff = diff_window(&archive, envelopes).unwrap();

        assert_eq!(diff.label_updates, 1);
        assert_eq!(archive.labels_of(1), ["b", "a"]);
    }
}
