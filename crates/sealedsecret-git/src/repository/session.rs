//! Repository session: one private clone, one branch, serialized mutations.

use std::fmt;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Commit, ErrorCode, Repository, Signature};
use tempfile::{NamedTempFile, TempDir};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BranchName, SessionConfig};
use crate::error::SessionError;
use crate::sync::{RemoteSynchronizer, SyncState, apply_transport_timeout, clone_fetch_options};

const COMMIT_TAG: &str = "[SEALEDSECRET-PROVIDER]";

/// Longest wait for a stopped blocking task to hand back what it holds.
const RELEASE_GRACE: Duration = Duration::from_secs(2);

/// A commit produced by a publish or delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// Hex object id.
    pub id: String,
    /// Commit message.
    pub message: String,
}

/// A working copy of one remote branch, shared by every caller that
/// publishes to it.
///
/// The handle is cheap to clone. Publish and delete take the session lock
/// for their whole write, commit, fetch and push cycle, so callers never see
/// each other's partial work. Reads go straight to the working tree without
/// the lock; files are replaced by rename, so a read returns either the old
/// or the new content.
///
/// The clone lives in a private temporary directory that is removed when the
/// last handle is dropped.
#[derive(Clone)]
pub struct RepositorySession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    repo: Arc<Mutex<Repository>>,
    state: SyncState,
    // declared last so the repository is closed before its directory goes
    workdir: TempDir,
}

impl RepositorySession {
    /// Clones the remote and checks out the source branch, creating it when
    /// it does not exist yet.
    ///
    /// # Errors
    ///
    /// Fails if the clone or branch checkout fails, if `cancel` fires, or if
    /// the clone takes longer than the configured clone timeout.
    pub async fn open(
        config: SessionConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, SessionError> {
        let workdir = tempfile::Builder::new()
            .prefix("sealedsecret-")
            .tempdir()
            .map_err(|e| SessionError::io(std::env::temp_dir(), e))?;

        apply_transport_timeout(config.clone_timeout().min(config.sync_timeout()))?;

        info!("Cloning {} into {:?}", config.url(), workdir.path());

        let path = workdir.path().to_path_buf();
        let clone_config = config.clone();
        let repo = run_blocking("clone", config.clone_timeout(), cancel, move |token| {
            checkpoint(token, "clone")?;
            let repo = clone_blocking(&clone_config, &path, token)?;
            materialize_branch(&repo, &clone_config)?;
            Ok(repo)
        })
        .await?;

        info!(
            "Session ready on branch {} of {}",
            config.source_branch(),
            config.url()
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                repo: Arc::new(Mutex::new(repo)),
                state: SyncState::new(),
                workdir,
            }),
        })
    }

    /// Writes `content` to `path`, commits and publishes it.
    ///
    /// Existing content at `path` is replaced. On a fetch or push failure the
    /// local commit is kept and goes out with the next successful mutation.
    pub async fn publish(
        &self,
        path: &str,
        content: impl Into<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<CommitInfo, SessionError> {
        let rel = validate_path(path)?;
        let content = content.into();

        let result = self
            .mutate("publish", cancel, move |repo, inner, token| {
                checkpoint(token, "publish")?;

                write_atomic(&inner.workdir.path().join(&rel), &content)?;
                let mut index = repo.index().map_err(|e| SessionError::git("stage", e))?;
                index
                    .add_path(&rel)
                    .and_then(|()| index.write())
                    .map_err(|e| SessionError::git("stage", e))?;

                let info = commit(repo, &inner.config, "created", &rel)?;
                inner.state.record_commit();

                RemoteSynchronizer::new(repo, &inner.config, token, "publish")
                    .reconcile(inner.config.publish_policy())?;
                Ok(info)
            })
            .await;

        self.track("publish", path, &result);
        result
    }

    /// Returns the content of `path` in the working tree.
    ///
    /// A directory, or a path running through a file, is not found. Does not
    /// take the session lock and does not contact the remote.
    pub async fn read(&self, path: &str) -> Result<Vec<u8>, SessionError> {
        let rel = validate_path(path)?;
        let inner = Arc::clone(&self.inner);

        tokio::task::spawn_blocking(move || {
            let full = inner.workdir.path().join(&rel);
            match std::fs::read(&full) {
                Ok(bytes) => Ok(bytes),
                Err(e) if is_missing_file(&full, &e) => Err(SessionError::not_found(rel)),
                Err(e) => Err(SessionError::io(full, e)),
            }
        })
        .await
        .map_err(|e| SessionError::Task {
            operation: "read",
            message: e.to_string(),
        })?
    }

    /// Removes `path`, commits and publishes the removal.
    ///
    /// Fails with [`SessionError::NotFound`] when `path` is not tracked.
    pub async fn delete(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<CommitInfo, SessionError> {
        let rel = validate_path(path)?;

        let result = self
            .mutate("delete", cancel, move |repo, inner, token| {
                checkpoint(token, "delete")?;

                let mut index = repo.index().map_err(|e| SessionError::git("stage", e))?;
                if index.get_path(&rel, 0).is_none() {
                    return Err(SessionError::not_found(rel));
                }
                index
                    .remove_path(&rel)
                    .and_then(|()| index.write())
                    .map_err(|e| SessionError::git("stage", e))?;

                let full = inner.workdir.path().join(&rel);
                match std::fs::remove_file(&full) {
                    Ok(()) => {},
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                    Err(e) => return Err(SessionError::io(full, e)),
                }

                let info = commit(repo, &inner.config, "deleted", &rel)?;
                inner.state.record_commit();

                RemoteSynchronizer::new(repo, &inner.config, token, "delete")
                    .reconcile(inner.config.delete_policy())?;
                Ok(info)
            })
            .await;

        self.track("delete", path, &result);
        result
    }

    /// Returns the id of the commit the source branch points at, or `None`
    /// while the branch has no commits.
    pub async fn head_commit(&self) -> Result<Option<String>, SessionError> {
        let repo = self.inner.repo.lock().await;
        Ok(resolve_head(&repo)?.map(|commit| commit.id().to_string()))
    }

    /// Returns the session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Returns the repository URL.
    pub fn url(&self) -> &str {
        self.inner.config.url()
    }

    /// Returns the branch this session writes to.
    pub fn source_branch(&self) -> &BranchName {
        self.inner.config.source_branch()
    }

    /// Returns the branch review requests target.
    pub fn target_branch(&self) -> &BranchName {
        self.inner.config.target_branch()
    }

    /// Returns the publication state.
    pub fn sync_state(&self) -> &SyncState {
        &self.inner.state
    }

    /// Takes the session lock, then runs `f` on the blocking pool under the
    /// sync timeout. Waiting for the lock is cancellable but not timed.
    ///
    /// A task that outlives [`RELEASE_GRACE`] after a timeout or cancel keeps
    /// the lock until libgit2 returns, at the latest when its socket timeout
    /// fires.
    async fn mutate<T, F>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: FnOnce(&Repository, &SessionInner, &CancellationToken) -> Result<T, SessionError>
            + Send
            + 'static,
    {
        let repo = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Cancelled { operation }),
            guard = Arc::clone(&self.inner.repo).lock_owned() => guard,
        };

        let inner = Arc::clone(&self.inner);
        let timeout = inner.config.sync_timeout();
        run_blocking(operation, timeout, cancel, move |token| {
            f(&repo, &inner, token)
        })
        .await
    }

    fn track(&self, operation: &str, path: &str, result: &Result<CommitInfo, SessionError>) {
        match result {
            Ok(info) => {
                info!("{} {} as {}", operation, path, info.id);
                self.inner.state.record_success(&info.id);
            },
            Err(e) if e.is_not_found() => {},
            Err(e) => {
                warn!("{} {} failed: {}", operation, path, e);
                self.inner.state.record_failure(e.to_string());
            },
        }
    }
}

impl fmt::Debug for RepositorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositorySession")
            .field("url", &self.inner.config.url())
            .field("source_branch", &self.inner.config.source_branch())
            .field("workdir", &self.inner.workdir.path())
            .finish()
    }
}

/// Runs `f` on the blocking pool.
///
/// `f` receives a child of `cancel`. When `timeout` elapses or `cancel`
/// fires, the child is cancelled and the task gets [`RELEASE_GRACE`] to
/// return, so anything `f` holds (the session lock in particular) is
/// normally released before the error is returned. A task stuck inside
/// libgit2 is left to finish on its own.
async fn run_blocking<T, F>(
    operation: &'static str,
    timeout: Duration,
    cancel: &CancellationToken,
    f: F,
) -> Result<T, SessionError>
where
    T: Send + 'static,
    F: FnOnce(&CancellationToken) -> Result<T, SessionError> + Send + 'static,
{
    let token = cancel.child_token();
    let task_token = token.clone();
    let mut task = tokio::task::spawn_blocking(move || f(&task_token));

    let stopped = tokio::select! {
        joined = &mut task => return flatten(operation, joined),
        _ = cancel.cancelled() => SessionError::Cancelled { operation },
        _ = tokio::time::sleep(timeout) => {
            warn!("{} exceeded {:?}, cancelling", operation, timeout);
            SessionError::Timeout {
                operation,
                seconds: timeout.as_secs(),
            }
        },
    };
    token.cancel();

    match tokio::time::timeout(RELEASE_GRACE, &mut task).await {
        Ok(joined) => match flatten(operation, joined) {
            Err(SessionError::Cancelled { .. }) => Err(stopped),
            other => other,
        },
        Err(_) => {
            warn!(
                "{} still running {:?} after it was stopped, detaching",
                operation, RELEASE_GRACE
            );
            Err(stopped)
        },
    }
}

fn flatten<T>(
    operation: &'static str,
    joined: Result<Result<T, SessionError>, tokio::task::JoinError>,
) -> Result<T, SessionError> {
    joined.map_err(|e| SessionError::Task {
        operation,
        message: e.to_string(),
    })?
}

fn is_missing_file(full: &Path, err: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        err.kind(),
        ErrorKind::NotFound | ErrorKind::IsADirectory | ErrorKind::NotADirectory
    ) || full.is_dir()
}

fn checkpoint(cancel: &CancellationToken, operation: &'static str) -> Result<(), SessionError> {
    if cancel.is_cancelled() {
        return Err(SessionError::Cancelled { operation });
    }
    Ok(())
}

fn clone_blocking(
    config: &SessionConfig,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<Repository, SessionError> {
    let remote_name = config.remote_name();
    let mut builder = RepoBuilder::new();
    builder.fetch_options(clone_fetch_options(config, cancel));
    builder.remote_create(move |repo, _name, url| repo.remote(remote_name, url));

    builder.clone(config.url(), path).map_err(|e| {
        if cancel.is_cancelled() {
            SessionError::Cancelled { operation: "clone" }
        } else {
            SessionError::Clone {
                url: config.url().to_string(),
                message: e.message().to_string(),
            }
        }
    })
}

/// Creates the source branch, or reuses it when it already exists, and
/// checks it out.
///
/// The start point is the remote-tracking branch when the remote already has
/// the source branch, otherwise the cloned HEAD. An empty remote leaves the
/// branch unborn until the first commit.
fn materialize_branch(repo: &Repository, config: &SessionConfig) -> Result<(), SessionError> {
    let branch = config.source_branch();
    let branch_error = |e: git2::Error| SessionError::Branch {
        branch: branch.to_string(),
        message: e.message().to_string(),
    };

    let start = match repo.find_reference(&branch.remote_ref(config.remote_name())) {
        Ok(reference) => Some(reference.peel_to_commit().map_err(branch_error)?),
        Err(e) if e.code() == ErrorCode::NotFound => resolve_head(repo)?,
        Err(e) => return Err(branch_error(e)),
    };

    match &start {
        Some(commit) => match repo.branch(branch.as_str(), commit, false) {
            Ok(_) => info!("Created branch {} at {}", branch, commit.id()),
            Err(e) if is_branch_exists(&e) => debug!("Branch {} already exists", branch),
            Err(e) => return Err(branch_error(e)),
        },
        None => debug!("Remote has no commits yet, {} starts unborn", branch),
    }

    repo.set_head(&branch.full_ref()).map_err(branch_error)?;
    if start.is_some() {
        repo.checkout_head(Some(CheckoutBuilder::new().force()))
            .map_err(branch_error)?;
    }

    Ok(())
}

/// An "already exists" failure from branch creation means a previous run
/// created it; the session reuses it.
fn is_branch_exists(err: &git2::Error) -> bool {
    err.code() == ErrorCode::Exists
}

fn resolve_head(repo: &Repository) -> Result<Option<Commit<'_>>, SessionError> {
    match repo.head() {
        Ok(head) => head
            .peel_to_commit()
            .map(Some)
            .map_err(|e| SessionError::git("resolve HEAD", e)),
        Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => Ok(None),
        Err(e) => Err(SessionError::git("resolve HEAD", e)),
    }
}

fn commit(
    repo: &Repository,
    config: &SessionConfig,
    action: &str,
    rel: &Path,
) -> Result<CommitInfo, SessionError> {
    let message = commit_message(action, rel);
    let signature = Signature::now(config.author_name(), config.author_email())
        .map_err(|e| SessionError::git("commit", e))?;

    let tree_id = repo
        .index()
        .and_then(|mut index| index.write_tree())
        .map_err(|e| SessionError::git("commit", e))?;
    let tree = repo
        .find_tree(tree_id)
        .map_err(|e| SessionError::git("commit", e))?;

    let parent = resolve_head(repo)?;
    let parents: Vec<&Commit<'_>> = parent.iter().collect();

    let id = repo
        .commit(
            Some("HEAD"),
            &signature,
            &signature,
            &message,
            &tree,
            &parents,
        )
        .map_err(|e| SessionError::git("commit", e))?;

    debug!("Committed {}: {}", id, message);
    Ok(CommitInfo {
        id: id.to_string(),
        message,
    })
}

fn commit_message(action: &str, rel: &Path) -> String {
    format!("{} {} --> {}", COMMIT_TAG, action, slash_path(rel))
}

fn slash_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalises a caller-supplied path into a tree-relative one.
fn validate_path(path: &str) -> Result<PathBuf, SessionError> {
    let invalid = |reason: &'static str| SessionError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    let mut rel = PathBuf::new();
    for component in Path::new(path.trim()).components() {
        match component {
            Component::Normal(part) if part == ".git" => {
                return Err(invalid("path must not touch the .git directory"));
            },
            Component::Normal(part) => rel.push(part),
            Component::CurDir => {},
            Component::ParentDir => return Err(invalid("path must not contain '..'")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("path must be relative"));
            },
        }
    }

    if rel.as_os_str().is_empty() {
        return Err(invalid("path is empty"));
    }

    Ok(rel)
}

/// Replaces `target` through a temporary file in the same directory.
fn write_atomic(target: &Path, content: &[u8]) -> Result<(), SessionError> {
    let parent = target.parent().ok_or_else(|| SessionError::InvalidPath {
        path: target.display().to_string(),
        reason: "path has no parent directory",
    })?;
    std::fs::create_dir_all(parent).map_err(|e| SessionError::io(parent, e))?;

    let mut file = NamedTempFile::new_in(parent).map_err(|e| SessionError::io(parent, e))?;
    file.write_all(content)
        .map_err(|e| SessionError::io(file.path(), e))?;
    file.persist(target)
        .map_err(|e| SessionError::io(target, e.error))?;

    Ok(())
}
