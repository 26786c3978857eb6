//! Shared fixtures for the Git backend tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use git2::build::TreeUpdateBuilder;
use git2::{FileMode, Repository, Signature, Sort};
use sealedsecret_git::{SessionConfig, SessionConfigBuilder};
use tempfile::TempDir;

/// A bare repository on disk acting as the remote.
pub struct TestRemote {
    _dir: TempDir,
    path: PathBuf,
}

impl TestRemote {
    /// A remote whose `main` branch holds a single commit with a README.
    pub fn new() -> Self {
        let remote = Self::empty();
        remote.commit_outside("main", "README.md", b"# sealed secrets\n");
        remote
    }

    /// A remote without any commits.
    pub fn empty() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.git");
        let repo = Repository::init_bare(&path).unwrap();
        repo.set_head("refs/heads/main").unwrap();
        Self { _dir: dir, path }
    }

    /// The clone URL.
    pub fn url(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    /// A config builder pointing at this remote.
    pub fn builder(&self, branch: &str) -> SessionConfigBuilder {
        SessionConfig::builder()
            .url(self.url())
            .source_branch(branch)
            .author("SEALEDSECRET-PROVIDER", "bot@example.com")
    }

    /// A config pointing at this remote.
    pub fn config(&self, branch: &str) -> SessionConfig {
        self.builder(branch).build().unwrap()
    }

    fn open(&self) -> Repository {
        Repository::open_bare(&self.path).unwrap()
    }

    /// The commit `branch` points at, if the branch exists.
    pub fn branch_tip(&self, branch: &str) -> Option<String> {
        let repo = self.open();
        let reference = repo.find_reference(&format!("refs/heads/{}", branch)).ok()?;
        Some(reference.peel_to_commit().unwrap().id().to_string())
    }

    /// The content of `path` at the tip of `branch`.
    pub fn file_at(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        let repo = self.open();
        let reference = repo.find_reference(&format!("refs/heads/{}", branch)).ok()?;
        let tree = reference.peel_to_tree().unwrap();
        let entry = tree.get_path(Path::new(path)).ok()?;
        let object = entry.to_object(&repo).unwrap();
        Some(object.as_blob().unwrap().content().to_vec())
    }

    /// Commit messages on `branch`, newest first.
    pub fn commit_messages(&self, branch: &str) -> Vec<String> {
        let repo = self.open();
        let Ok(reference) = repo.find_reference(&format!("refs/heads/{}", branch)) else {
            return Vec::new();
        };
        let tip = reference.peel_to_commit().unwrap().id();

        let mut walk = repo.revwalk().unwrap();
        walk.set_sorting(Sort::TOPOLOGICAL).unwrap();
        walk.push(tip).unwrap();
        walk.map(|oid| {
            let commit = repo.find_commit(oid.unwrap()).unwrap();
            commit.message().unwrap_or_default().to_string()
        })
        .collect()
    }

    /// Writes `path` onto `branch` directly in the remote, the way another
    /// writer would, and returns the new tip.
    pub fn commit_outside(&self, branch: &str, path: &str, content: &[u8]) -> String {
        let repo = self.open();
        let refname = format!("refs/heads/{}", branch);
        let parent = repo
            .find_reference(&refname)
            .ok()
            .map(|r| r.peel_to_commit().unwrap());

        let blob = repo.blob(content).unwrap();
        let mut update = TreeUpdateBuilder::new();
        update.upsert(path, blob, FileMode::Blob);
        let baseline = match &parent {
            Some(commit) => commit.tree().unwrap(),
            None => {
                let empty = repo.treebuilder(None).unwrap().write().unwrap();
                repo.find_tree(empty).unwrap()
            },
        };
        let tree_id = update.create_updated(&repo, &baseline).unwrap();
        let tree = repo.find_tree(tree_id).unwrap();

        let signature = Signature::now("Someone Else", "someone@example.com").unwrap();
        let parents: Vec<_> = parent.iter().collect();
        repo.commit(
            Some(refname.as_str()),
            &signature,
            &signature,
            &format!("outside change to {}", path),
            &tree,
            &parents,
        )
        .unwrap()
        .to_string()
    }
}
