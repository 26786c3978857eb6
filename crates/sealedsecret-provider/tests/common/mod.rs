//! Shared fixtures for publisher tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use git2::build::TreeUpdateBuilder;
use git2::{FileMode, Repository, Signature};
use indexmap::IndexMap;
use sealedsecret_core::{
    KeyResolveError, PublicKey, PublicKeyResolver, ReadinessPoller, SealError,
    SealedSecretDocument, Sealer, SecretManifest,
};
use sealedsecret_git::{
    MergeRequest, Project, ReviewApi, ReviewError, ReviewRequest, SessionConfig,
};
use tempfile::TempDir;

/// Bare repository with one commit on `main`.
pub struct TestRemote {
    _dir: TempDir,
    path: PathBuf,
}

impl TestRemote {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.git");
        let repo = Repository::init_bare(&path).unwrap();
        repo.set_head("refs/heads/main").unwrap();

        let blob = repo.blob(b"# sealed secrets\n").unwrap();
        let empty = repo.treebuilder(None).unwrap().write().unwrap();
        let empty = repo.find_tree(empty).unwrap();
        let mut update = TreeUpdateBuilder::new();
        update.upsert("README.md", blob, FileMode::Blob);
        let tree_id = update.create_updated(&repo, &empty).unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let signature = Signature::now("Someone", "someone@example.com").unwrap();
        repo.commit(
            Some("refs/heads/main"),
            &signature,
            &signature,
            "initial",
            &tree,
            &[],
        )
        .unwrap();

        Self { _dir: dir, path }
    }

    pub fn url(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn config(&self, branch: &str) -> SessionConfig {
        SessionConfig::builder()
            .url(self.url())
            .source_branch(branch)
            .build()
            .unwrap()
    }

    /// Content of `path` at the tip of `branch`.
    pub fn file_at(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        let repo = Repository::open_bare(&self.path).unwrap();
        let reference = repo.find_reference(&format!("refs/heads/{}", branch)).ok()?;
        let tree = reference.peel_to_tree().unwrap();
        let entry = tree.get_path(Path::new(path)).ok()?;
        let object = entry.to_object(&repo).unwrap();
        Some(object.as_blob().unwrap().content().to_vec())
    }
}

/// Sealer that tags every value with the key fingerprint instead of
/// encrypting it.
pub struct FakeSealer;

impl Sealer for FakeSealer {
    fn seal(&self, secret: &SecretManifest, key: &PublicKey) -> Result<Vec<u8>, SealError> {
        let fingerprint = key.fingerprint();
        let encrypted: IndexMap<String, String> = secret
            .data
            .iter()
            .chain(secret.string_data.iter())
            .map(|(name, value)| {
                (
                    name.clone(),
                    format!("sealed:{}:{}", &fingerprint[..8], value.len()),
                )
            })
            .collect();

        SealedSecretDocument::new(secret, encrypted)
            .to_yaml()
            .map_err(|e| SealError::new(&secret.name, e.to_string()))
    }
}

/// Key service that is not ready for the first `not_ready` calls and whose
/// key can be rotated.
pub struct KeyService {
    key: Mutex<Result<PublicKey, KeyResolveError>>,
    not_ready: AtomicU32,
    calls: AtomicU32,
}

impl KeyService {
    pub fn new(key: &str) -> Self {
        Self::starting(0, key)
    }

    pub fn starting(not_ready: u32, key: &str) -> Self {
        Self {
            key: Mutex::new(Ok(PublicKey::from(key))),
            not_ready: AtomicU32::new(not_ready),
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing(err: KeyResolveError) -> Self {
        Self {
            key: Mutex::new(Err(err)),
            not_ready: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        }
    }

    pub fn rotate(&self, key: &str) {
        *self.key.lock().unwrap() = Ok(PublicKey::from(key));
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublicKeyResolver for KeyService {
    async fn resolve(&self) -> Result<PublicKey, KeyResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.not_ready.load(Ordering::SeqCst);
        if pending > 0 {
            self.not_ready.store(pending - 1, Ordering::SeqCst);
            return Err(KeyResolveError::not_found("sealed-secrets-controller"));
        }
        self.key.lock().unwrap().clone()
    }
}

/// Review API that accepts the first request per source branch and reports
/// a duplicate afterwards.
#[derive(Default)]
pub struct FakeReviewApi {
    pub web_url: String,
    pub requests: Mutex<Vec<ReviewRequest>>,
}

#[async_trait]
impl ReviewApi for FakeReviewApi {
    async fn find_projects(&self, _search: &str) -> Result<Vec<Project>, ReviewError> {
        Ok(vec![Project {
            id: 7,
            web_url: self.web_url.clone(),
            path_with_namespace: "org/secrets".to_string(),
        }])
    }

    async fn create_merge_request(
        &self,
        _project_id: u64,
        request: &ReviewRequest,
    ) -> Result<MergeRequest, ReviewError> {
        let mut requests = self.requests.lock().unwrap();
        let duplicate = requests
            .iter()
            .any(|r| r.source_branch == request.source_branch);
        requests.push(request.clone());
        if duplicate {
            return Err(ReviewError::Api {
                status: 409,
                message: "Another open merge request already exists for this source branch: !1"
                    .to_string(),
            });
        }
        Ok(MergeRequest {
            iid: 1,
            web_url: format!("{}/-/merge_requests/1", self.web_url),
        })
    }
}

/// Pollers with short intervals so retries finish quickly.
pub fn fast_poller(deadline: Duration) -> ReadinessPoller {
    ReadinessPoller::builder()
        .deadline(deadline)
        .initial_interval(Duration::from_millis(10))
        .max_interval(Duration::from_millis(20))
        .build()
}
