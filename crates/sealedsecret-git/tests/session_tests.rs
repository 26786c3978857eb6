//! Repository session tests against a local bare remote.

mod common;

use std::time::{Duration, Instant};

use common::TestRemote;
use sealedsecret_git::{ConflictPolicy, RepositorySession, SessionConfig, SessionError};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn open(remote: &TestRemote, branch: &str) -> RepositorySession {
    RepositorySession::open(remote.config(branch), &CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn publish_reaches_remote_branch() {
    let remote = TestRemote::new();
    let session = open(&remote, "sealed-secrets").await;
    let cancel = CancellationToken::new();

    let commit = session
        .publish("apps/db.yaml", b"kind: SealedSecret\n".to_vec(), &cancel)
        .await
        .unwrap();

    assert_eq!(
        commit.message,
        "[SEALEDSECRET-PROVIDER] created --> apps/db.yaml"
    );
    assert_eq!(remote.branch_tip("sealed-secrets"), Some(commit.id.clone()));
    assert_eq!(
        remote.file_at("sealed-secrets", "apps/db.yaml"),
        Some(b"kind: SealedSecret\n".to_vec())
    );
    assert_eq!(
        remote.file_at("sealed-secrets", "README.md"),
        Some(b"# sealed secrets\n".to_vec())
    );
    // the target branch is never written
    assert!(remote.file_at("main", "apps/db.yaml").is_none());
    assert_eq!(session.head_commit().await.unwrap(), Some(commit.id));
    assert!(session.sync_state().is_in_sync());
}

#[tokio::test]
async fn publish_overwrites_previous_content() {
    let remote = TestRemote::new();
    let session = open(&remote, "sealed-secrets").await;
    let cancel = CancellationToken::new();

    session.publish("db.yaml", "first", &cancel).await.unwrap();
    session.publish("db.yaml", "second", &cancel).await.unwrap();

    assert_eq!(session.read("db.yaml").await.unwrap(), b"second");
    assert_eq!(
        remote.file_at("sealed-secrets", "db.yaml"),
        Some(b"second".to_vec())
    );
    let messages = remote.commit_messages("sealed-secrets");
    assert_eq!(
        messages[..2],
        [
            "[SEALEDSECRET-PROVIDER] created --> db.yaml".to_string(),
            "[SEALEDSECRET-PROVIDER] created --> db.yaml".to_string(),
        ]
    );
}

#[tokio::test]
async fn read_and_delete_of_missing_path_are_not_found() {
    let remote = TestRemote::new();
    let session = open(&remote, "sealed-secrets").await;
    let cancel = CancellationToken::new();

    let err = session.read("missing.yaml").await.unwrap_err();
    assert!(err.is_not_found());

    let tip = remote.branch_tip("sealed-secrets");
    let err = session.delete("missing.yaml", &cancel).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(remote.branch_tip("sealed-secrets"), tip);
    assert_eq!(session.sync_state().failure_count(), 0);
}

#[tokio::test]
async fn read_of_directory_is_not_found() {
    let remote = TestRemote::new();
    let session = open(&remote, "sealed-secrets").await;

    session
        .publish("apps/db.yaml", "x", &CancellationToken::new())
        .await
        .unwrap();

    for path in ["apps", "apps/db.yaml/nested"] {
        let err = session.read(path).await.unwrap_err();
        assert!(err.is_not_found(), "{path}: {err}");
    }
}

#[tokio::test]
async fn delete_removes_file_everywhere() {
    let remote = TestRemote::new();
    let session = open(&remote, "sealed-secrets").await;
    let cancel = CancellationToken::new();

    session.publish("apps/db.yaml", "x", &cancel).await.unwrap();
    let commit = session.delete("apps/db.yaml", &cancel).await.unwrap();

    assert_eq!(
        commit.message,
        "[SEALEDSECRET-PROVIDER] deleted --> apps/db.yaml"
    );
    assert!(session.read("apps/db.yaml").await.unwrap_err().is_not_found());
    assert!(remote.file_at("sealed-secrets", "apps/db.yaml").is_none());
    assert_eq!(remote.branch_tip("sealed-secrets"), Some(commit.id));

    // a path can be published again after removal
    session.publish("apps/db.yaml", "y", &cancel).await.unwrap();
    assert_eq!(
        remote.file_at("sealed-secrets", "apps/db.yaml"),
        Some(b"y".to_vec())
    );
}

#[tokio::test]
async fn invalid_paths_are_rejected_before_any_write() {
    let remote = TestRemote::new();
    let session = open(&remote, "sealed-secrets").await;
    let cancel = CancellationToken::new();

    for path in ["../escape.yaml", "/abs.yaml", ".git/config", ""] {
        let err = session.publish(path, "x", &cancel).await.unwrap_err();
        assert!(
            matches!(err, SessionError::InvalidPath { .. }),
            "{path:?}: {err}"
        );
    }
    assert!(remote.branch_tip("sealed-secrets").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publishes_are_serialized() {
    let remote = TestRemote::new();
    let session = open(&remote, "sealed-secrets").await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let session = session.clone();
        tasks.push(tokio::spawn(async move {
            session
                .publish(
                    &format!("apps/secret-{i}.yaml"),
                    format!("value-{i}"),
                    &CancellationToken::new(),
                )
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let reader = open(&remote, "sealed-secrets").await;
    for i in 0..8 {
        let path = format!("apps/secret-{i}.yaml");
        let expected = format!("value-{i}").into_bytes();
        assert_eq!(remote.file_at("sealed-secrets", &path), Some(expected.clone()));
        assert_eq!(reader.read(&path).await.unwrap(), expected);
    }
    // README commit plus one commit per publish
    assert_eq!(remote.commit_messages("sealed-secrets").len(), 9);
    assert_eq!(
        remote.branch_tip("sealed-secrets"),
        session.head_commit().await.unwrap()
    );
}

#[tokio::test]
async fn reopening_reuses_existing_branch() {
    let remote = TestRemote::new();
    let cancel = CancellationToken::new();

    let first = open(&remote, "sealed-secrets").await;
    first.publish("a.yaml", "a", &cancel).await.unwrap();
    drop(first);

    let second = open(&remote, "sealed-secrets").await;
    assert_eq!(second.read("a.yaml").await.unwrap(), b"a");

    second.publish("b.yaml", "b", &cancel).await.unwrap();
    assert_eq!(remote.file_at("sealed-secrets", "a.yaml"), Some(b"a".to_vec()));
    assert_eq!(remote.file_at("sealed-secrets", "b.yaml"), Some(b"b".to_vec()));
    assert_eq!(remote.commit_messages("sealed-secrets").len(), 3);
}

#[tokio::test]
async fn source_branch_equal_to_default_branch_is_reused() {
    let remote = TestRemote::new();
    let session = open(&remote, "main").await;

    session
        .publish("db.yaml", "x", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(remote.file_at("main", "db.yaml"), Some(b"x".to_vec()));
    assert_eq!(remote.commit_messages("main").len(), 2);
}

#[tokio::test]
async fn empty_remote_gets_first_commit() {
    let remote = TestRemote::empty();
    let session = open(&remote, "sealed-secrets").await;
    assert_eq!(session.head_commit().await.unwrap(), None);

    let commit = session
        .publish("db.yaml", "x", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(remote.branch_tip("sealed-secrets"), Some(commit.id));
    assert_eq!(remote.commit_messages("sealed-secrets").len(), 1);
}

#[tokio::test]
async fn force_publish_overwrites_outside_writers() {
    let remote = TestRemote::new();
    let session = open(&remote, "sealed-secrets").await;
    let cancel = CancellationToken::new();

    session.publish("a.yaml", "a", &cancel).await.unwrap();
    remote.commit_outside("sealed-secrets", "outside.yaml", b"other");

    let commit = session.publish("b.yaml", "b", &cancel).await.unwrap();

    assert_eq!(remote.branch_tip("sealed-secrets"), Some(commit.id));
    assert!(remote.file_at("sealed-secrets", "outside.yaml").is_none());
    assert_eq!(remote.file_at("sealed-secrets", "b.yaml"), Some(b"b".to_vec()));
}

#[tokio::test]
async fn diverged_delete_is_rejected_and_retried_later() {
    let remote = TestRemote::new();
    let session = open(&remote, "sealed-secrets").await;
    let cancel = CancellationToken::new();

    session.publish("a.yaml", "a", &cancel).await.unwrap();
    let outside = remote.commit_outside("sealed-secrets", "outside.yaml", b"other");

    let err = session.delete("a.yaml", &cancel).await.unwrap_err();
    assert!(matches!(err, SessionError::PushRejected { .. }), "{err}");
    assert!(err.is_transient());
    assert_eq!(remote.branch_tip("sealed-secrets"), Some(outside));
    assert_eq!(session.sync_state().pending_commits(), 1);
    assert_eq!(session.sync_state().failure_count(), 1);

    // the local delete commit goes out with the next forced publish
    session.publish("b.yaml", "b", &cancel).await.unwrap();
    assert!(remote.file_at("sealed-secrets", "a.yaml").is_none());
    assert_eq!(remote.file_at("sealed-secrets", "b.yaml"), Some(b"b".to_vec()));
    assert!(session.sync_state().is_in_sync());
}

#[tokio::test]
async fn publish_policy_can_reject_divergence() {
    let remote = TestRemote::new();
    let config = remote
        .builder("sealed-secrets")
        .publish_policy(ConflictPolicy::RejectOnDivergence)
        .build()
        .unwrap();
    let session = RepositorySession::open(config, &CancellationToken::new())
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    session.publish("a.yaml", "a", &cancel).await.unwrap();
    remote.commit_outside("sealed-secrets", "outside.yaml", b"other");

    let err = session.publish("b.yaml", "b", &cancel).await.unwrap_err();
    assert!(matches!(err, SessionError::PushRejected { .. }), "{err}");
    assert_eq!(
        remote.file_at("sealed-secrets", "outside.yaml"),
        Some(b"other".to_vec())
    );
}

#[tokio::test]
async fn cancelled_publish_changes_nothing() {
    let remote = TestRemote::new();
    let session = open(&remote, "sealed-secrets").await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = session.publish("a.yaml", "a", &cancel).await.unwrap_err();
    assert!(matches!(err, SessionError::Cancelled { .. }));
    assert!(session.read("a.yaml").await.unwrap_err().is_not_found());
    assert!(remote.branch_tip("sealed-secrets").is_none());

    // the lock was released
    session
        .publish("a.yaml", "a", &CancellationToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn open_fails_for_missing_remote() {
    let dir = tempfile::tempdir().unwrap();
    let config = SessionConfig::builder()
        .url(dir.path().join("nope.git").to_string_lossy())
        .source_branch("sealed-secrets")
        .build()
        .unwrap();

    let err = RepositorySession::open(config, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Clone { .. }), "{err}");
}

#[tokio::test]
async fn open_with_cancelled_token_fails() {
    let remote = TestRemote::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = RepositorySession::open(remote.config("sealed-secrets"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Cancelled { operation: "clone" }), "{err}");
}

/// Accepts connections and never answers them.
async fn silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://127.0.0.1:{port}/org/secrets.git")
}

#[tokio::test]
async fn open_against_silent_server_times_out() {
    let config = SessionConfig::builder()
        .url(silent_server().await)
        .source_branch("sealed-secrets")
        .clone_timeout(Duration::from_secs(1))
        .sync_timeout(Duration::from_secs(1))
        .build()
        .unwrap();
    let started = Instant::now();

    let err = tokio::time::timeout(
        Duration::from_secs(15),
        RepositorySession::open(config, &CancellationToken::new()),
    )
    .await
    .expect("open must give up on its own")
    .unwrap_err();

    assert!(
        matches!(
            err,
            SessionError::Timeout { operation: "clone", .. } | SessionError::Clone { .. }
        ),
        "{err}"
    );
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn cancel_interrupts_stalled_clone() {
    let config = SessionConfig::builder()
        .url(silent_server().await)
        .source_branch("sealed-secrets")
        .clone_timeout(Duration::from_secs(30))
        .sync_timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });
    let started = Instant::now();

    let opening = RepositorySession::open(config, &cancel);
    let err = tokio::time::timeout(Duration::from_secs(15), opening)
        .await
        .expect("cancel must end the clone")
        .unwrap_err();

    assert!(matches!(err, SessionError::Cancelled { operation: "clone" }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(10));
}
