//! GitLab REST v4 client.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use tracing::debug;
use url::Url;

use super::{MergeRequest, Project, ReviewApi, ReviewRequest};
use crate::error::ReviewError;

const TOKEN_HEADER: &str = "PRIVATE-TOKEN";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`ReviewApi`] backed by the GitLab REST API.
#[derive(Clone)]
pub struct GitLabClient {
    http: Client,
    api_base: Url,
    token: String,
}

impl GitLabClient {
    /// Creates a client for an explicit API base such as
    /// `https://gitlab.example.com/api/v4`.
    pub fn new(api_base: Url, token: impl Into<String>) -> Result<Self, ReviewError> {
        if api_base.cannot_be_a_base() {
            return Err(ReviewError::invalid_url(
                api_base.as_str(),
                "not usable as an API base",
            ));
        }

        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            api_base,
            token: token.into(),
        })
    }

    /// Creates a client for the GitLab instance hosting `remote_url`.
    pub fn for_repository(remote_url: &str, token: impl Into<String>) -> Result<Self, ReviewError> {
        Self::new(api_base_for(remote_url)?, token)
    }

    /// Returns the API base URL.
    pub fn api_base(&self) -> &Url {
        &self.api_base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ReviewError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ReviewError::invalid_url(self.api_base.as_str(), "not usable as an API base")
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl ReviewApi for GitLabClient {
    async fn find_projects(&self, search: &str) -> Result<Vec<Project>, ReviewError> {
        let mut url = self.endpoint(&["projects"])?;
        url.query_pairs_mut()
            .append_pair("membership", "true")
            .append_pair("search", search)
            .append_pair("per_page", "100");

        debug!("Searching projects matching '{}'", search);
        let response = self
            .http
            .get(url)
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }

    async fn create_merge_request(
        &self,
        project_id: u64,
        request: &ReviewRequest,
    ) -> Result<MergeRequest, ReviewError> {
        let id = project_id.to_string();
        let url = self.endpoint(&["projects", &id, "merge_requests"])?;

        debug!(
            "Opening merge request {} -> {} in project {}",
            request.source_branch, request.target_branch, project_id
        );
        let response = self
            .http
            .post(url)
            .header(TOKEN_HEADER, &self.token)
            .json(request)
            .send()
            .await?;

        Ok(check_status(response).await?.json().await?)
    }
}

impl fmt::Debug for GitLabClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitLabClient")
            .field("api_base", &self.api_base.as_str())
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Derives `scheme://host[:port]/api/v4` from a repository URL.
pub(crate) fn api_base_for(remote_url: &str) -> Result<Url, ReviewError> {
    let url =
        Url::parse(remote_url).map_err(|e| ReviewError::invalid_url(remote_url, e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ReviewError::invalid_url(
            remote_url,
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }
    let host = url
        .host_str()
        .ok_or_else(|| ReviewError::invalid_url(remote_url, "missing host"))?;

    let base = match url.port() {
        Some(port) => format!("{}://{}:{}/api/v4", url.scheme(), host, port),
        None => format!("{}://{}/api/v4", url.scheme(), host),
    };
    Url::parse(&base).map_err(|e| ReviewError::invalid_url(remote_url, e.to_string()))
}

async fn check_status(response: Response) -> Result<Response, ReviewError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ReviewError::Api {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// Extracts the human readable part of a GitLab error body.
///
/// GitLab sends `{"message": "..."}`, `{"message": ["..."]}`,
/// `{"message": {"field": ["..."]}}` or `{"error": "..."}`.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.trim().to_string();
    };

    let field = value.get("message").or_else(|| value.get("error"));
    match field {
        Some(serde_json::Value::String(message)) => message.clone(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map_or_else(|| item.to_string(), str::to_string))
            .collect::<Vec<_>>()
            .join("; "),
        Some(other) => other.to_string(),
        None => body.trim().to_string(),
    }
}
