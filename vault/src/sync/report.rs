//! # Sync report
//!
//! Module dedicated to the synchronization report.

use super::{progress::ProgressSnapshot, Error, FetchItem};

/// The synchronization report.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// The counters at the end of the synchronization.
    pub progress: ProgressSnapshot,

    /// The messages that could not be archived, and why.
    pub failures: Vec<(FetchItem, Error)>,

    /// Whether the synchronization was interrupted by the caller
    /// before completion.
    pub cancelled: bool,
}

impl SyncReport {
    /// Return `true` if the whole folder got archived.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failures.is_empty()
    }
}
