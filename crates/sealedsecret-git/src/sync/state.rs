//! Publication state of a repository session.

use std::time::Instant;

use parking_lot::RwLock;

/// Tracks what the session has committed locally and what reached the remote.
///
/// A failed fetch or push leaves local commits in place. They are counted as
/// pending until a later mutation pushes them together with its own commit.
#[derive(Debug)]
pub struct SyncState {
    /// The last commit the remote accepted.
    pushed_commit: RwLock<Option<String>>,
    /// Local commits not yet accepted by the remote.
    pending_commits: RwLock<u32>,
    /// The last successful push time.
    last_sync: RwLock<Option<Instant>>,
    /// The last error message, if any.
    last_error: RwLock<Option<String>>,
    /// Number of consecutive failures.
    failure_count: RwLock<u32>,
}

impl SyncState {
    /// Creates a new SyncState.
    pub fn new() -> Self {
        Self {
            pushed_commit: RwLock::new(None),
            pending_commits: RwLock::new(0),
            last_sync: RwLock::new(None),
            last_error: RwLock::new(None),
            failure_count: RwLock::new(0),
        }
    }

    /// Returns the last commit the remote accepted.
    pub fn pushed_commit(&self) -> Option<String> {
        self.pushed_commit.read().clone()
    }

    /// Returns the number of local commits not yet pushed.
    pub fn pending_commits(&self) -> u32 {
        *self.pending_commits.read()
    }

    /// Returns the time of the last successful push.
    pub fn last_sync(&self) -> Option<Instant> {
        *self.last_sync.read()
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns the number of consecutive failures.
    pub fn failure_count(&self) -> u32 {
        *self.failure_count.read()
    }

    /// Returns true if everything committed locally has been pushed.
    pub fn is_in_sync(&self) -> bool {
        self.pending_commits() == 0 && self.last_error.read().is_none()
    }

    /// Records a local commit.
    pub(crate) fn record_commit(&self) {
        *self.pending_commits.write() += 1;
    }

    /// Records a successful push of `commit`.
    pub(crate) fn record_success(&self, commit: impl Into<String>) {
        let mut pushed = self.pushed_commit.write();
        let mut pending = self.pending_commits.write();
        let mut last_sync = self.last_sync.write();
        let mut last_error = self.last_error.write();
        let mut failure_count = self.failure_count.write();

        *pushed = Some(commit.into());
        *pending = 0;
        *last_sync = Some(Instant::now());
        *last_error = None;
        *failure_count = 0;
    }

    /// Records a failed mutation.
    pub(crate) fn record_failure(&self, error: impl Into<String>) {
        let mut last_error = self.last_error.write();
        let mut failure_count = self.failure_count.write();

        *last_error = Some(error.into());
        *failure_count += 1;
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}
