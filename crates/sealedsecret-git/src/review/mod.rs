//! Review requests for published branches.
//!
//! After a session pushes its source branch, the provider asks the hosting
//! platform to merge it into the target branch. Submission is idempotent: a
//! request that is already open counts as success.

mod client;
mod submitter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ReviewError;
use crate::repository::BranchName;

pub use client::GitLabClient;
pub use submitter::{ReviewSubmitter, SubmitOutcome, is_duplicate_request, search_hint};

/// Title of every review request.
pub const REVIEW_TITLE: &str = "SealedSecrets update";

/// Description of every review request.
pub const REVIEW_DESCRIPTION: &str =
    "This MR was automatically created by the sealedsecret provider.";

/// A request to merge the source branch into the target branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
    pub description: String,
    pub remove_source_branch: bool,
}

impl ReviewRequest {
    /// Creates the standard request for `source` into `target`.
    pub fn new(source: &BranchName, target: &BranchName) -> Self {
        Self {
            source_branch: source.to_string(),
            target_branch: target.to_string(),
            title: REVIEW_TITLE.to_string(),
            description: REVIEW_DESCRIPTION.to_string(),
            remove_source_branch: true,
        }
    }
}

/// A project on the hosting platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub web_url: String,
    #[serde(default)]
    pub path_with_namespace: String,
}

/// A created merge request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub iid: u64,
    #[serde(default)]
    pub web_url: String,
}

/// The hosting platform's review API.
#[async_trait]
pub trait ReviewApi: Send + Sync {
    /// Lists projects visible to the caller whose name matches `search`.
    async fn find_projects(&self, search: &str) -> Result<Vec<Project>, ReviewError>;

    /// Opens a merge request in `project_id`.
    async fn create_merge_request(
        &self,
        project_id: u64,
        request: &ReviewRequest,
    ) -> Result<MergeRequest, ReviewError>;
}
