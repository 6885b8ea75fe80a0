use std::{collections::HashSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;
use vault::{
    archive,
    remote::{self, Remote, RemoteBuilder, RemoteEnvelope},
    retry::Retry,
    sync::{Error, SyncBuilder, SyncEvent},
    AnyBoxedError, Archive,
};

#[derive(Clone, Debug)]
struct FakeMessage {
    id: i64,
    labels: Vec<String>,
    body: Vec<u8>,
}

#[derive(Debug, Default)]
struct FakeState {
    messages: Vec<FakeMessage>,
    builds: usize,
    max_builds: Option<usize>,
    failing: HashSet<u32>,
    failing_search: Option<u32>,
    panicking: bool,
    fetch_delay: Option<Duration>,
    searches: Vec<(u32, u32)>,
    fetches: usize,
}

/// An in-memory remote folder. Sequence identifiers are 1-based
/// positions in the message list.
#[derive(Clone, Debug, Default)]
struct FakeMailbox {
    state: Arc<Mutex<FakeState>>,
}

impl FakeMailbox {
    fn with_messages(n: i64) -> Self {
        let mailbox = Self::default();
        for id in 1..=n {
            mailbox.push(id * 1000, labels(&["\\Inbox"]));
        }
        mailbox
    }

    fn push(&self, id: i64, labels: Vec<String>) {
        let body = format!("Message-ID: <{id}@localhost>\r\n\r\nbody of {id}\r\n").into_bytes();
        self.state
            .lock()
            .messages
            .push(FakeMessage { id, labels, body });
    }
}

#[async_trait]
impl RemoteBuilder for FakeMailbox {
    type Remote = FakeRemote;

    async fn build(self) -> remote::Result<Self::Remote> {
        let count = {
            let mut state = self.state.lock();
            if state.max_builds.is_some_and(|max| state.builds >= max) {
                let err = remote::Error::InvalidResponseError("invalid credentials".into());
                return Err(remote::Error::AuthError(err.into()));
            }
            state.builds += 1;
            state.messages.len() as u32
        };

        Ok(FakeRemote {
            mailbox: self,
            count,
        })
    }
}

struct FakeRemote {
    mailbox: FakeMailbox,
    count: u32,
}

#[async_trait]
impl Remote for FakeRemote {
    fn messages_count(&self) -> u32 {
        self.count
    }

    async fn list_mailboxes(&mut self) -> remote::Result<Vec<String>> {
        Ok(vec!["INBOX".into(), "[Gmail]/All Mail".into()])
    }

    async fn search_range(&mut self, begin: u32, end: u32) -> remote::Result<Vec<RemoteEnvelope>> {
        let mut state = self.mailbox.state.lock();
        state.searches.push((begin, end));

        if state.failing_search == Some(begin) {
            let err = remote::Error::InvalidResponseError("connection reset".into());
            return Err(remote::Error::NetworkError(err.into()));
        }

        let envelopes = state.messages[(begin - 1) as usize..end as usize]
            .iter()
            .zip(begin..)
            .map(|(msg, seq)| RemoteEnvelope::new(seq, msg.id, msg.labels.clone()))
            .collect();

        Ok(envelopes)
    }

    async fn fetch_body(&mut self, seq: u32) -> remote::Result<Vec<u8>> {
        let (delay, panicking) = {
            let state = self.mailbox.state.lock();
            (state.fetch_delay, state.panicking)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if panicking {
            panic!("remote connection poisoned");
        }

        let mut state = self.mailbox.state.lock();
        state.fetches += 1;

        if state.failing.contains(&seq) {
            let err = remote::Error::InvalidResponseError("connection reset".into());
            return Err(remote::Error::NetworkError(err.into()));
        }

        state
            .messages
            .get((seq - 1) as usize)
            .map(|msg| msg.body.clone())
            .ok_or(remote::Error::MessageNotFoundError(seq))
    }
}

fn labels(labels: &[&str]) -> Vec<String> {
    labels.iter().map(ToString::to_string).collect()
}

fn fast_retry() -> Retry {
    Retry::default()
        .with_timeout(Duration::from_secs(5))
        .with_backoff(Duration::from_millis(1))
}

fn sync_builder(mailbox: &FakeMailbox, archive: &Arc<Archive>) -> SyncBuilder<FakeMailbox> {
    SyncBuilder::new(mailbox.clone(), archive.clone())
        .with_connections(3)
        .with_retry(fast_retry())
        .with_report_interval(Duration::from_millis(20))
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn full_sync_archives_every_message() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.db");
    let archive = Arc::new(Archive::open(&path).unwrap());
    let mailbox = FakeMailbox::with_messages(250);

    let events = Arc::new(Mutex::new(Vec::new()));
    let report = sync_builder(&mailbox, &archive)
        .with_handler({
            let events = events.clone();
            move |evt| {
                let events = events.clone();
                async move {
                    events.lock().push(evt);
                    Ok(())
                }
            }
        })
        .sync()
        .await
        .unwrap();

    assert!(report.is_complete(), "{report:?}");
    assert_eq!(report.progress.to_scan, 250);
    assert_eq!(report.progress.scanned, 250);
    assert_eq!(report.progress.to_fetch, 250);
    assert_eq!(report.progress.fetched, 250);
    assert_eq!(report.progress.labels_updated, 250);

    {
        let state = mailbox.state.lock();
        // one scanner connection plus two fetch workers
        assert_eq!(state.builds, 3);
        // every window brought new messages, so it never grew
        assert_eq!(state.searches, [(1, 100), (101, 200), (201, 250)]);
    }

    let events = events.lock();
    assert!(events.contains(&SyncEvent::SelectedFolder(250)));
    assert_eq!(
        events
            .iter()
            .filter(|evt| matches!(evt, SyncEvent::ArchivedMessage(_)))
            .count(),
        250
    );

    drop(archive);
    let archive = Archive::open(&path).unwrap();
    assert_eq!(archive.count(), 250);
    assert_eq!(archive.validate().unwrap(), 250);
    for id in 1..=250 {
        assert!(archive.has(id * 1000));
        assert_eq!(archive.labels_of(id * 1000), ["\\Inbox"]);
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn resync_only_updates_labels() {
    let dir = tempdir().unwrap();
    let archive = Arc::new(Archive::open(dir.path().join("vault.db")).unwrap());
    let mailbox = FakeMailbox::with_messages(250);

    sync_builder(&mailbox, &archive).sync().await.unwrap();

    {
        let mut state = mailbox.state.lock();
        state.messages[4].labels = labels(&["\\Inbox", "\\Starred"]);
        state.searches.clear();
        state.fetches = 0;
    }

    let report = sync_builder(&mailbox, &archive).sync().await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.progress.to_fetch, 0);
    assert_eq!(report.progress.fetched, 0);
    assert_eq!(report.progress.labels_updated, 1);
    assert_eq!(archive.labels_of(5000), ["\\Inbox", "\\Starred"]);

    let state = mailbox.state.lock();
    assert_eq!(state.fetches, 0);
    // nothing new in the first window, so the second one doubled
    assert_eq!(state.searches, [(1, 100), (101, 250)]);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn failing_message_is_reported_and_skipped() {
    let dir = tempdir().unwrap();
    let archive = Arc::new(Archive::open(dir.path().join("vault.db")).unwrap());
    let mailbox = FakeMailbox::with_messages(20);
    mailbox.state.lock().failing.insert(7);

    let report = sync_builder(&mailbox, &archive).sync().await.unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.failures.len(), 1);
    let (item, err) = &report.failures[0];
    assert_eq!(item.sequence_id, 7);
    assert_eq!(item.message_id, 7000);
    assert!(matches!(err, Error::FetchMessageError(_, 7000)), "{err:?}");

    assert_eq!(report.progress.fetched, 19);
    assert_eq!(report.progress.failed, 1);
    assert_eq!(archive.count(), 19);
    assert!(!archive.has(7000));

    // the default policy made three attempts for the failing message
    assert_eq!(mailbox.state.lock().fetches, 19 + 3);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn message_listed_twice_is_fetched_once() {
    let dir = tempdir().unwrap();
    let archive = Arc::new(Archive::open(dir.path().join("vault.db")).unwrap());
    let mailbox = FakeMailbox::with_messages(150);
    {
        let mut state = mailbox.state.lock();
        let dup = state.messages[9].clone();
        state.messages[119] = dup;
    }

    let report = sync_builder(&mailbox, &archive).sync().await.unwrap();

    assert!(report.is_complete(), "{report:?}");
    assert_eq!(report.progress.fetched, 149);
    assert_eq!(archive.count(), 149);
    assert!(!archive.has(120_000));
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn cancellation_stops_the_run() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.db");
    let archive = Arc::new(Archive::open(&path).unwrap());
    let mailbox = FakeMailbox::with_messages(100);
    mailbox.state.lock().fetch_delay = Some(Duration::from_millis(20));

    let token = CancellationToken::new();
    let sync = tokio::spawn(
        sync_builder(&mailbox, &archive)
            .with_connections(2)
            .with_cancellation_token(token.clone())
            .sync(),
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    token.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), sync)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(report.cancelled);
    assert!(report.progress.fetched < 100, "{}", report.progress);

    let fetched = report.progress.fetched as usize;
    assert_eq!(archive.count(), fetched);
    drop(archive);

    let archive = Archive::open(&path).unwrap();
    assert_eq!(archive.count(), fetched);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn worker_auth_failure_aborts_the_run() {
    let dir = tempdir().unwrap();
    let archive = Arc::new(Archive::open(dir.path().join("vault.db")).unwrap());
    let mailbox = FakeMailbox::with_messages(500);
    mailbox.state.lock().max_builds = Some(1);

    let err = sync_builder(&mailbox, &archive).sync().await.unwrap_err();

    assert!(
        matches!(err, Error::BuildRemoteError(remote::Error::AuthError(_))),
        "{err:?}"
    );
    assert_eq!(archive.count(), 0);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn worker_panic_cancels_the_run() {
    let dir = tempdir().unwrap();
    let archive = Arc::new(Archive::open(dir.path().join("vault.db")).unwrap());
    let mailbox = FakeMailbox::with_messages(400);
    mailbox.state.lock().panicking = true;

    // the only worker dies while the scanner still has more than a
    // full queue of messages to push
    let sync = sync_builder(&mailbox, &archive).with_connections(2).sync();
    let err = tokio::time::timeout(Duration::from_secs(5), sync)
        .await
        .expect("sync should stop once a worker panicked")
        .unwrap_err();

    assert!(
        matches!(&err, Error::JoinSyncTaskError(err) if err.is_panic()),
        "{err:?}"
    );
    assert_eq!(archive.count(), 0);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn duplicate_message_is_reported_and_skipped() {
    let dir = tempdir().unwrap();
    let archive = Arc::new(Archive::open(dir.path().join("vault.db")).unwrap());
    let mailbox = FakeMailbox::with_messages(20);
    mailbox.state.lock().fetch_delay = Some(Duration::from_millis(50));

    // the last message gets archived behind the workers' back, right
    // after being queued
    let report = sync_builder(&mailbox, &archive)
        .with_handler({
            let archive = archive.clone();
            move |evt| {
                let archive = archive.clone();
                async move {
                    if let SyncEvent::ScannedWindow { .. } = evt {
                        archive.append_message(20_000, b"archived elsewhere".to_vec())?;
                    }
                    Ok::<_, AnyBoxedError>(())
                }
            }
        })
        .sync()
        .await
        .unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.failures.len(), 1, "{report:?}");
    let (item, err) = &report.failures[0];
    assert_eq!(item.sequence_id, 20);
    assert_eq!(item.message_id, 20_000);
    assert!(
        matches!(
            err,
            Error::ArchiveError(archive::Error::DuplicateMessageError(20_000))
        ),
        "{err:?}"
    );

    assert_eq!(report.progress.fetched, 19);
    assert_eq!(report.progress.failed, 1);
    assert_eq!(archive.count(), 20);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn worker_archive_failure_aborts_the_run() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("vault.db");
    let mailbox = FakeMailbox::with_messages(10);

    let archive = Arc::new(Archive::open(&path).unwrap());
    sync_builder(&mailbox, &archive).sync().await.unwrap();
    drop(archive);

    // new messages without labels, so the scanner has nothing to
    // write and only workers hit the read-only archive
    for id in 11..=15 {
        mailbox.push(id * 1000, Vec::new());
    }

    let archive = Arc::new(Archive::open_read_only(&path).unwrap());
    let err = sync_builder(&mailbox, &archive).sync().await.unwrap_err();

    assert!(
        matches!(
            err,
            Error::ArchiveError(archive::Error::ReadOnlyArchiveError(_))
        ),
        "{err:?}"
    );
    assert_eq!(archive.count(), 10);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn search_failure_aborts_the_scan() {
    let dir = tempdir().unwrap();
    let archive = Arc::new(Archive::open(dir.path().join("vault.db")).unwrap());
    let mailbox = FakeMailbox::with_messages(250);
    mailbox.state.lock().failing_search = Some(101);

    let err = sync_builder(&mailbox, &archive).sync().await.unwrap_err();

    assert!(
        matches!(
            err,
            Error::SearchRangeError(remote::Error::NetworkError(_), 101, 200)
        ),
        "{err:?}"
    );

    let state = mailbox.state.lock();
    // one successful window, then three attempts at the second one
    assert_eq!(state.searches, [(1, 100), (101, 200), (101, 200), (101, 200)]);
    assert!(archive.count() <= 100);
}

