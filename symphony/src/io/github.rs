//! Repository hosting API: default-branch lookup and pull request creation.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::core::classifier::{FailureClass, classify_http_status};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("symphony/", env!("CARGO_PKG_VERSION"));
const ERROR_BODY_LIMIT: usize = 500;

/// Operations the publish pipeline needs from the hosting service.
pub trait PullRequestHost {
    fn default_branch(&self) -> Result<String, HostError>;
    /// Open a pull request and return its web URL.
    fn create_pull_request(&self, request: &NewPullRequest) -> Result<String, HostError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("request to {endpoint} failed: {message}")]
    Transport {
        endpoint: String,
        message: String,
        transient: bool,
    },
    #[error("{endpoint} returned HTTP {status}: {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },
    #[error("unexpected response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

impl HostError {
    /// Timeouts, connection failures, rate limiting and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { transient, .. } => *transient,
            Self::Api {
                status, message, ..
            } => classify_http_status(*status, message) == FailureClass::Transient,
            Self::Decode { .. } => false,
        }
    }
}

/// `owner/name` identifying a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl RepoSlug {
    /// Take the last two path segments of a clone URL, dropping a trailing `.git`.
    ///
    /// Accepts both `https://host/owner/name(.git)` and `git@host:owner/name(.git)`.
    pub fn from_url(url: &str) -> Option<Self> {
        let trimmed = url.trim().trim_end_matches('/');
        let mut segments = trimmed
            .rsplit(['/', ':'])
            .filter(|segment| !segment.is_empty());
        let name = segments.next()?;
        let name = name.strip_suffix(".git").unwrap_or(name);
        let owner = segments.next()?;
        if name.is_empty() || owner.contains(['@', '.']) {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Deserialize)]
struct RepositoryResponse {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

/// Blocking GitHub REST client scoped to one repository.
pub struct GitHubClient {
    client: Client,
    api_url: String,
    slug: RepoSlug,
    token: String,
}

impl fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubClient")
            .field("api_url", &self.api_url)
            .field("slug", &self.slug)
            .finish_non_exhaustive()
    }
}

impl GitHubClient {
    pub fn new(
        api_url: &str,
        slug: RepoSlug,
        token: &str,
        timeout: Duration,
    ) -> Result<Self, HostError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| HostError::Transport {
                endpoint: api_url.to_string(),
                message: err.to_string(),
                transient: false,
            })?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            slug,
            token: token.to_string(),
        })
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}{suffix}",
            self.api_url, self.slug.owner, self.slug.name
        )
    }

    fn send(
        &self,
        endpoint: &str,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<Response, HostError> {
        let response = request
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .map_err(|err| HostError::Transport {
                endpoint: endpoint.to_string(),
                transient: err.is_timeout() || err.is_connect(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(api_error(endpoint, status, response))
    }
}

impl PullRequestHost for GitHubClient {
    #[instrument(skip_all, fields(repo = %self.slug))]
    fn default_branch(&self) -> Result<String, HostError> {
        let endpoint = self.endpoint("");
        let response = self.send(&endpoint, self.client.get(&endpoint))?;
        let repo: RepositoryResponse = read_json(&endpoint, response)?;
        debug!(default_branch = %repo.default_branch, "resolved default branch");
        Ok(repo.default_branch)
    }

    #[instrument(skip_all, fields(repo = %self.slug, head = %request.head, base = %request.base))]
    fn create_pull_request(&self, request: &NewPullRequest) -> Result<String, HostError> {
        let endpoint = self.endpoint("/pulls");
        let response = self.send(&endpoint, self.client.post(&endpoint).json(request))?;
        let created: PullRequestResponse = read_json(&endpoint, response)?;
        info!(url = %created.html_url, "pull request created");
        Ok(created.html_url)
    }
}

/// Read the whole body, then decode it. A body that stops arriving is a
/// transport failure and may be retried; a body that arrives but does not
/// parse is not.
fn read_json<T: DeserializeOwned>(endpoint: &str, response: Response) -> Result<T, HostError> {
    let bytes = response.bytes().map_err(|err| HostError::Transport {
        endpoint: endpoint.to_string(),
        message: format!("reading response body: {err}"),
        transient: true,
    })?;
    serde_json::from_slice(&bytes).map_err(|err| HostError::Decode {
        endpoint: endpoint.to_string(),
        message: err.to_string(),
    })
}

fn api_error(endpoint: &str, status: StatusCode, response: Response) -> HostError {
    let body = response.text().unwrap_or_default();
    let message = match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(parsed) => parsed.message,
        Err(_) => body.chars().take(ERROR_BODY_LIMIT).collect(),
    };
    HostError::Api {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        message,
    }
}
