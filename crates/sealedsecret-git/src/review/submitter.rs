//! Idempotent review request submission.

use std::sync::Arc;

use tracing::{debug, info};
use url::Url;

use super::{GitLabClient, MergeRequest, ReviewApi, ReviewRequest};
use crate::error::ReviewError;
use crate::repository::BranchName;

const DUPLICATE_REQUEST_MESSAGE: &str =
    "Another open merge request already exists for this source branch";

/// What a submission did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new merge request was opened.
    Created(MergeRequest),
    /// A merge request for the source branch was already open.
    AlreadyOpen,
}

/// Opens a merge request from the session's source branch into its target
/// branch, treating an already open request as success.
#[derive(Clone)]
pub struct ReviewSubmitter {
    api: Arc<dyn ReviewApi>,
}

impl ReviewSubmitter {
    /// Creates a submitter over any review API.
    pub fn new(api: Arc<dyn ReviewApi>) -> Self {
        Self { api }
    }

    /// Creates a submitter for the GitLab instance hosting `remote_url`.
    pub fn gitlab(remote_url: &str, token: impl Into<String>) -> Result<Self, ReviewError> {
        Ok(Self::new(Arc::new(GitLabClient::for_repository(
            remote_url, token,
        )?)))
    }

    /// Requests review of `source` into `target` for the project whose web
    /// URL is exactly `remote_url`.
    ///
    /// # Errors
    ///
    /// Fails with [`ReviewError::ProjectNotFound`] when no visible project
    /// has that URL, and with the API error for anything but a duplicate
    /// request.
    pub async fn submit(
        &self,
        remote_url: &str,
        source: &BranchName,
        target: &BranchName,
    ) -> Result<SubmitOutcome, ReviewError> {
        let hint = search_hint(remote_url)?;
        let projects = self.api.find_projects(&hint).await?;
        debug!("{} projects match '{}'", projects.len(), hint);

        let project = projects
            .into_iter()
            .find(|project| project.web_url == remote_url)
            .ok_or_else(|| ReviewError::ProjectNotFound {
                url: remote_url.to_string(),
            })?;

        let request = ReviewRequest::new(source, target);
        match self.api.create_merge_request(project.id, &request).await {
            Ok(merge_request) => {
                info!(
                    "Opened merge request !{} for {} -> {}",
                    merge_request.iid, source, target
                );
                Ok(SubmitOutcome::Created(merge_request))
            },
            Err(err) if is_duplicate_request(&err) => {
                debug!("Merge request for {} is already open", source);
                Ok(SubmitOutcome::AlreadyOpen)
            },
            Err(err) => Err(err),
        }
    }
}

impl std::fmt::Debug for ReviewSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewSubmitter").finish_non_exhaustive()
    }
}

/// Returns true if the API refused the request because one is already open
/// for the same source branch.
pub fn is_duplicate_request(err: &ReviewError) -> bool {
    match err {
        ReviewError::Api { message, .. } => message.contains(DUPLICATE_REQUEST_MESSAGE),
        _ => false,
    }
}

/// Returns the last non-empty path segment of `remote_url`, used to narrow
/// the project search.
pub fn search_hint(remote_url: &str) -> Result<String, ReviewError> {
    let path = match Url::parse(remote_url) {
        Ok(url) => url.path().to_string(),
        // scp-like `git@host:group/project` or a plain path
        Err(_) => remote_url
            .rsplit_once(':')
            .map_or(remote_url, |(_, path)| path)
            .to_string(),
    };

    path.split('/')
        .filter(|segment| !segment.is_empty())
        .next_back()
        .map(str::to_string)
        .ok_or_else(|| ReviewError::invalid_url(remote_url, "URL has no project path"))
}
