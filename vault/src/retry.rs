//! # Retry
//!
//! Module dedicated to retrying remote actions. Every attempt is
//! bounded by a timeout, and only transient failures (network errors
//! and timeouts) are attempted again, after an exponential backoff.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::remote::{Error, Result};

/// The retry policy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Retry {
    /// The maximum number of attempts, the first one included.
    pub attempts: u8,

    /// The maximum duration of one attempt.
    pub timeout: Duration,

    /// The pause after the first failed attempt. It doubles after
    /// every subsequent failure.
    pub backoff: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(30),
            backoff: Duration::from_secs(1),
        }
    }
}

impl Retry {
    pub fn set_attempts(&mut self, attempts: u8) {
        self.attempts = attempts.max(1);
    }

    pub fn with_attempts(mut self, attempts: u8) -> Self {
        self.set_attempts(attempts);
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.set_timeout(timeout);
        self
    }

    pub fn set_backoff(&mut self, backoff: Duration) {
        self.backoff = backoff;
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.set_backoff(backoff);
        self
    }

    /// Run the given action against the given target until it
    /// succeeds, fails with a non-retryable error, or runs out of
    /// attempts.
    ///
    /// Cancelling the token interrupts both the pending attempt and
    /// the backoff pause, and makes the whole run fail with
    /// [`Error::CancelledError`].
    pub async fn run<R, T, F>(&self, token: &CancellationToken, target: &mut R, mut f: F) -> Result<T>
    where
        R: Send,
        F: for<'a> FnMut(&'a mut R) -> BoxFuture<'a, Result<T>>,
    {
        let mut attempt = 1;
        let mut backoff = self.backoff;

        loop {
            let res = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::CancelledError),
                res = timeout(self.timeout, f(&mut *target)) => {
                    res.unwrap_or(Err(Error::TimeoutError(self.timeout)))
                }
            };

            match res {
                Ok(res) => return Ok(res),
                Err(err) if err.is_retryable() && attempt < self.attempts => {
                    warn!(attempt, ?backoff, "{err}, retrying");
                    debug!("{err:?}");

                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Err(Error::CancelledError),
                        _ = sleep(backoff) => (),
                    }

                    attempt += 1;
                    backoff *= 2;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io, time::Duration};

    use tokio_util::sync::CancellationToken;

    use crate::remote::Error;

    use super::Retry;

    fn network_error() -> Error {
        Error::NetworkError(Box::new(crate::archive::Error::ReadRecordError(
            io::Error::new(io::ErrorKind::ConnectionReset, "reset"),
            0,
        )))
    }

    fn fast() -> Retry {
        Retry::default()
            .with_timeout(Duration::from_millis(50))
            .with_backoff(Duration::from_millis(1))
    }

    #[test_log::test(tokio::test)]
    async fn retries_transient_errors() {
        let token = CancellationToken::new();
        let mut calls = 0u8;

        let res = fast()
            .run(&token, &mut calls, |calls| {
                Box::pin(async move {
                    *calls += 1;
                    if *calls < 3 {
                        Err(network_error())
                    } else {
                        Ok(*calls)
                    }
                })
            })
            .await;

        assert_eq!(res.unwrap(), 3);
    }

    #[test_log::test(tokio::test)]
    async fn gives_up_after_last_attempt() {
        let token = CancellationToken::new();
        let mut calls = 0u8;

        let res: Result<(), _> = fast()
            .run(&token, &mut calls, |calls| {
                Box::pin(async move {
                    *calls += 1;
                    Err(network_error())
                })
            })
            .await;

        assert!(matches!(res, Err(Error::NetworkError(_))));
        assert_eq!(calls, 3);
    }

    #[test_log::test(tokio::test)]
    async fn does_not_retry_auth_errors() {
        let token = CancellationToken::new();
        let mut calls = 0u8;

        let res: Result<(), _> = fast()
            .run(&token, &mut calls, |calls| {
                Box::pin(async move {
                    *calls += 1;
                    Err(Error::AuthError(Box::new(Error::CancelledError)))
                })
            })
            .await;

        assert!(matches!(res, Err(Error::AuthError(_))));
        assert_eq!(calls, 1);
    }

    #[test_log::test(tokio::test)]
    async fn times_out_slow_attempts() {
        let token = CancellationToken::new();
        let mut calls = 0u8;

        let res: Result<(), _> = fast()
            .with_attempts(2)
            .run(&token, &mut calls, |calls| {
                Box::pin(async move {
                    *calls += 1;
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
            })
            .await;

        assert!(matches!(res, Err(Error::TimeoutError(_))));
        assert_eq!(calls, 2);
    }

    #[test_log::test(tokio::test)]
    async fn stops_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let mut calls = 0u8;

        let res = fast()
            .run(&token, &mut calls, |calls| {
                Box::pin(async move {
                    *calls += 1;
                    Ok(())
                })
            })
            .await;

        assert!(matches!(res, Err(Error::CancelledError)));
        assert_eq!(calls, 0);
    }
}
